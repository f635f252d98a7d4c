//! Connection lifecycle and the shared adapter session.
//!
//! `unconnected -> connecting -> connected -> (failed | closed)`. Validation
//! and authentication happen while connecting; a failed connect is terminal.
//! A connected handle owns exactly one adapter session, reused by every query,
//! mutation and native call until `close`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as Json;
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::adapter::{
    Exchange, NativeAdapter, NativePage, NativeRecord, NativeRequest, PageCursor, WriteOutcome,
};
use crate::config::{CalendarToken, ConnectionConfig, EngineKind, ParameterMap};
use crate::descriptor::{MutationDescriptor, NativeCallDescriptor, Predicate, QueryDescriptor};
use crate::error::{HandlerError, HandlerResult};
use crate::materializer::RowStream;
use crate::metrics::HandlerMetrics;
use crate::mutation::{self, MutationOutcome};
use crate::passthrough::validate_native_call;
use crate::row::Row;
use crate::schema::{SchemaRegistry, TableDescriptor};
use crate::settings::EngineSettings;
use crate::transport::{HttpTransport, Transport};
use crate::translator::translate;
use crate::value::Value;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unconnected = 0,
    Connecting = 1,
    Connected = 2,
    Failed = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Failed,
            4 => Self::Closed,
            _ => Self::Unconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Outcome of [`Connection::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckStatus {
    pub success: bool,
    pub error_message: Option<String>,
}

/// Handle to one external system. Clones share the same session.
#[derive(Clone)]
pub struct Connection {
    kind: EngineKind,
    params: Arc<ParameterMap>,
    settings: EngineSettings,
    transport: Option<Arc<dyn Transport>>,
    metrics: Arc<HandlerMetrics>,
    state: Arc<AtomicU8>,
    session: Arc<OnceCell<Arc<Session>>>,
}

impl Connection {
    /// An unconnected handle; nothing is validated until [`Connection::open`].
    pub fn new(kind: EngineKind, params: ParameterMap) -> Self {
        Self {
            kind,
            params: Arc::new(params),
            settings: EngineSettings::default(),
            transport: None,
            metrics: Arc::new(HandlerMetrics::default()),
            state: Arc::new(AtomicU8::new(ConnectionState::Unconnected as u8)),
            session: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Routes every native call through `transport` instead of HTTP.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates parameters and authenticates over HTTP.
    pub async fn connect(kind: EngineKind, params: ParameterMap) -> HandlerResult<Self> {
        let connection = Self::new(kind, params);
        connection.open().await?;
        Ok(connection)
    }

    pub async fn connect_with_transport(
        kind: EngineKind,
        params: ParameterMap,
        transport: Arc<dyn Transport>,
    ) -> HandlerResult<Self> {
        let connection = Self::new(kind, params).with_transport(transport);
        connection.open().await?;
        Ok(connection)
    }

    /// Connects once; a failure leaves the handle in `failed` for good.
    pub async fn open(&self) -> HandlerResult<()> {
        if let Err(current) = self.state.compare_exchange(
            ConnectionState::Unconnected as u8,
            ConnectionState::Connecting as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return Err(HandlerError::validation(format!(
                "connection is {}, not unconnected",
                ConnectionState::from_u8(current).as_str()
            )));
        }
        let span = info_span!("conduit.connect", engine = self.kind.as_str());
        match self.establish().instrument(span).await {
            Ok(session) => {
                let tables = session.registry.len();
                let session = Arc::new(session);
                // The cell is only written here, after the state guard above.
                let _ = self.session.set(Arc::clone(&session));
                if !self.advance(ConnectionState::Connected) {
                    // `close` ran while connecting; it found no session to tear down.
                    let mut adapter = session.adapter.lock().await;
                    session.closed.store(true, Ordering::SeqCst);
                    if let Err(err) = adapter.close(&session.exchange).await {
                        warn!(
                            engine = self.kind.as_str(),
                            error = %err,
                            "close after connect failed"
                        );
                    }
                    info!(engine = self.kind.as_str(), "closed while connecting");
                    return Err(HandlerError::ConnectionClosed);
                }
                info!(engine = self.kind.as_str(), tables, "connected");
                Ok(())
            }
            Err(err) => {
                if !self.advance(ConnectionState::Failed) {
                    return Err(HandlerError::ConnectionClosed);
                }
                warn!(engine = self.kind.as_str(), error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Leaves `connecting` for `next`; false once `close` got there first.
    fn advance(&self, next: ConnectionState) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    async fn establish(&self) -> HandlerResult<Session> {
        let config = ConnectionConfig::from_params(self.kind, &self.params)?;
        let calendar_token = match &config {
            ConnectionConfig::Calendar(calendar) => Some(resolve_token(&calendar.token).await?),
            _ => None,
        };
        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(endpoint(&config))?),
        };
        let exchange = Exchange::new(
            transport,
            self.settings.call_timeout,
            Arc::clone(&self.metrics),
        );
        let mut adapter = NativeAdapter::new(config, calendar_token)?;
        adapter.authenticate(&exchange).await?;

        let mut registry = SchemaRegistry::for_kind(self.kind);
        for table in adapter.discover_tables(&exchange).await? {
            registry.register(table)?;
        }
        Ok(Session {
            kind: self.kind,
            adapter: Mutex::new(adapter),
            exchange,
            registry,
            settings: self.settings.clone(),
            metrics: Arc::clone(&self.metrics),
            closed: AtomicBool::new(false),
        })
    }

    /// Connects, reports the outcome and closes the session the check opened.
    pub async fn check(kind: EngineKind, params: ParameterMap) -> CheckStatus {
        Self::new(kind, params).run_check().await
    }

    pub async fn check_with_transport(
        kind: EngineKind,
        params: ParameterMap,
        transport: Arc<dyn Transport>,
    ) -> CheckStatus {
        Self::new(kind, params)
            .with_transport(transport)
            .run_check()
            .await
    }

    async fn run_check(self) -> CheckStatus {
        let status = match self.open().await {
            Ok(()) => match self.close().await {
                Ok(()) => CheckStatus {
                    success: true,
                    error_message: None,
                },
                Err(err) => CheckStatus {
                    success: false,
                    error_message: Some(err.to_string()),
                },
            },
            Err(err) => CheckStatus {
                success: false,
                error_message: Some(err.to_string()),
            },
        };
        info!(engine = self.kind.as_str(), success = status.success, "connection check");
        status
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn metrics(&self) -> Arc<HandlerMetrics> {
        Arc::clone(&self.metrics)
    }

    fn session(&self) -> HandlerResult<Arc<Session>> {
        match self.state() {
            ConnectionState::Connected => self
                .session
                .get()
                .cloned()
                .ok_or_else(|| HandlerError::connection("connected without a session")),
            ConnectionState::Closed => Err(HandlerError::ConnectionClosed),
            ConnectionState::Failed => Err(HandlerError::connection(
                "connection failed while connecting",
            )),
            ConnectionState::Unconnected | ConnectionState::Connecting => {
                Err(HandlerError::connection("connection is not open"))
            }
        }
    }

    /// Every table of the connection, built-in and discovered.
    pub fn list_tables(&self) -> HandlerResult<Vec<Arc<TableDescriptor>>> {
        Ok(self.session()?.registry.tables().cloned().collect())
    }

    /// One `(column_name, data_type)` row per column of `table`.
    pub fn describe_table(&self, table: &str) -> HandlerResult<Vec<Row>> {
        let table = self.session()?.registry.get(table)?;
        let columns: Arc<[String]> = vec!["column_name".to_string(), "data_type".to_string()].into();
        Ok(table
            .columns
            .iter()
            .map(|column| {
                Row::new(
                    Arc::clone(&columns),
                    vec![
                        Value::Text(column.name.clone()),
                        Value::Text(column.column_type.as_str().to_string()),
                    ],
                )
            })
            .collect())
    }

    /// Plans `query` and returns its lazy row stream. No call is made until the first pull.
    pub fn query(&self, query: &QueryDescriptor) -> HandlerResult<RowStream> {
        let session = self.session()?;
        let table = session.registry.get(&query.table)?;
        let span = info_span!("conduit.query", engine = self.kind.as_str(), table = %table.name);
        let _entered = span.enter();
        let plan = match translate(&table, query, &session.settings) {
            Ok(plan) => plan,
            Err(err) => {
                if matches!(err, HandlerError::MissingRequiredFilter { .. }) {
                    self.metrics.record_required_filter_reject();
                }
                return Err(err);
            }
        };
        self.metrics.record_pushdown(&plan.pushdown);
        Ok(RowStream::for_plan(session, plan))
    }

    pub async fn mutate(&self, mutation: &MutationDescriptor) -> HandlerResult<MutationOutcome> {
        self.run_mutation(mutation, None).await
    }

    /// Like [`Connection::mutate`], stopping between native calls once `token` fires.
    pub async fn mutate_cancellable(
        &self,
        mutation: &MutationDescriptor,
        token: CancellationToken,
    ) -> HandlerResult<MutationOutcome> {
        self.run_mutation(mutation, Some(&token)).await
    }

    async fn run_mutation(
        &self,
        mutation: &MutationDescriptor,
        token: Option<&CancellationToken>,
    ) -> HandlerResult<MutationOutcome> {
        let session = self.session()?;
        let span = info_span!(
            "conduit.mutation",
            engine = self.kind.as_str(),
            table = %mutation.table,
            kind = mutation.kind.as_str()
        );
        mutation::execute(&session, mutation, token)
            .instrument(span)
            .await
    }

    /// Validates `call` and returns a stream that issues it on the first pull.
    pub fn native_query(&self, call: NativeCallDescriptor) -> HandlerResult<RowStream> {
        let session = self.session()?;
        validate_native_call(self.kind, &call)?;
        self.metrics.record_passthrough();
        Ok(RowStream::for_native_call(session, call))
    }

    /// Tears the session down. Later operations, including pulls on open
    /// streams, fail with `ConnectionClosed`. Closing twice is a no-op.
    pub async fn close(&self) -> HandlerResult<()> {
        let previous = ConnectionState::from_u8(
            self.state
                .swap(ConnectionState::Closed as u8, Ordering::SeqCst),
        );
        if previous != ConnectionState::Connected {
            return Ok(());
        }
        let Some(session) = self.session.get() else {
            return Ok(());
        };
        let mut adapter = session.adapter.lock().await;
        session.closed.store(true, Ordering::SeqCst);
        let result = adapter.close(&session.exchange).await;
        info!(engine = self.kind.as_str(), clean = result.is_ok(), "closed");
        result
    }
}

/// Adapter session shared by a connection and the streams it hands out.
pub(crate) struct Session {
    kind: EngineKind,
    adapter: Mutex<NativeAdapter>,
    exchange: Exchange,
    registry: SchemaRegistry,
    settings: EngineSettings,
    metrics: Arc<HandlerMetrics>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn kind(&self) -> EngineKind {
        self.kind
    }

    pub(crate) fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub(crate) fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn metrics(&self) -> &HandlerMetrics {
        &self.metrics
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Holds the adapter for exactly one native call.
    async fn lock_adapter(&self) -> HandlerResult<MutexGuard<'_, NativeAdapter>> {
        let adapter = self.adapter.lock().await;
        if self.is_closed() {
            return Err(HandlerError::ConnectionClosed);
        }
        Ok(adapter)
    }

    pub(crate) async fn fetch_page(
        &self,
        request: &NativeRequest,
        cursor: &PageCursor,
        page_size: usize,
    ) -> HandlerResult<NativePage> {
        self.lock_adapter()
            .await?
            .fetch_page(&self.exchange, request, cursor, page_size)
            .await
    }

    pub(crate) async fn release_cursor(&self, cursor: &PageCursor) {
        if let Ok(mut adapter) = self.lock_adapter().await {
            adapter.release_cursor(&self.exchange, cursor).await;
        }
    }

    pub(crate) async fn native_call(&self, call: &NativeCallDescriptor) -> HandlerResult<Vec<Json>> {
        self.lock_adapter()
            .await?
            .native_call(&self.exchange, call)
            .await
    }

    pub(crate) async fn create(
        &self,
        table: &TableDescriptor,
        record: &NativeRecord,
    ) -> HandlerResult<Option<String>> {
        self.lock_adapter()
            .await?
            .create(&self.exchange, table, record)
            .await
    }

    pub(crate) async fn update(
        &self,
        table: &TableDescriptor,
        id: &Value,
        record: &NativeRecord,
    ) -> HandlerResult<WriteOutcome> {
        self.lock_adapter()
            .await?
            .update(&self.exchange, table, id, record)
            .await
    }

    pub(crate) async fn delete(
        &self,
        table: &TableDescriptor,
        id: &Value,
    ) -> HandlerResult<WriteOutcome> {
        self.lock_adapter()
            .await?
            .delete(&self.exchange, table, id)
            .await
    }

    pub(crate) async fn bulk_update(
        &self,
        table: &TableDescriptor,
        assignments: &[(String, Value)],
        predicates: &[Predicate],
    ) -> HandlerResult<u64> {
        self.lock_adapter()
            .await?
            .bulk_update(&self.exchange, table, assignments, predicates)
            .await
    }

    pub(crate) async fn bulk_delete(
        &self,
        table: &TableDescriptor,
        predicates: &[Predicate],
    ) -> HandlerResult<u64> {
        self.lock_adapter()
            .await?
            .bulk_delete(&self.exchange, table, predicates)
            .await
    }
}

fn endpoint(config: &ConnectionConfig) -> &str {
    match config {
        ConnectionConfig::Financial(financial) => &financial.base_url,
        ConnectionConfig::Calendar(calendar) => &calendar.base_url,
        ConnectionConfig::NewSql(newsql) => &newsql.url,
    }
}

/// Reads the bearer token, once, from wherever the parameters point.
async fn resolve_token(token: &CalendarToken) -> HandlerResult<String> {
    match token {
        CalendarToken::Inline(token) => Ok(token.clone()),
        CalendarToken::File(path) => read_token_file(path).await,
    }
}

async fn read_token_file(path: &Path) -> HandlerResult<String> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
        HandlerError::configuration(format!(
            "cannot read credentials file {}: {err}",
            path.display()
        ))
    })?;
    let credentials: Json = serde_json::from_str(&raw).map_err(|err| {
        HandlerError::configuration(format!(
            "credentials file {} is not JSON: {err}",
            path.display()
        ))
    })?;
    credentials
        .get("access_token")
        .and_then(Json::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            HandlerError::configuration(format!(
                "credentials file {} has no access_token",
                path.display()
            ))
        })
}
