//! Native client adapters: one variant per supported external system.
//!
//! Every variant offers the same capability set (authenticate, fetch a page,
//! create/update/delete one resource, run a named native operation). The set
//! of systems is closed, so dispatch is a `match` rather than a trait object.

mod calendar;
mod financial;
mod newsql;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as Json;
use tracing::debug;

use crate::config::{ConnectionConfig, EngineKind};
use crate::descriptor::{NativeCallDescriptor, OrderBy, Predicate};
use crate::error::{HandlerError, HandlerResult};
use crate::metrics::HandlerMetrics;
use crate::passthrough::NativeOperation;
use crate::predicates::NativeParams;
use crate::schema::TableDescriptor;
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::value::Value;

pub use calendar::CalendarAdapter;
pub use financial::FinancialAdapter;
pub use newsql::{render_select, NewSqlAdapter};

/// One native fetch derived from a query plan.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRequest {
    pub table: String,
    pub resource: String,
    /// Native parameters from pushed-down predicates.
    pub params: NativeParams,
    /// Predicates rendered natively (query-language backends only).
    pub filters: Vec<Predicate>,
    /// Columns to fetch; empty fetches the adapter's default field set.
    pub columns: Vec<String>,
    pub order: Option<OrderBy>,
    /// Total row limit sent natively.
    pub limit: Option<usize>,
}

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Start,
    Offset(usize),
    Token(String),
    Frame { statement_id: i64, offset: u64 },
}

/// One page of native records plus the cursor of the following page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NativePage {
    pub records: Vec<Json>,
    /// `None` signals end-of-data.
    pub next: Option<PageCursor>,
}

/// Result of a per-resource write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    NotFound,
}

/// Native body of a create/update plus the coerced column values it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRecord {
    pub body: Json,
    pub values: Vec<(String, Value)>,
}

/// Timed, metered access to the transport shared by every adapter call.
#[derive(Clone)]
pub struct Exchange {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    metrics: Arc<HandlerMetrics>,
}

impl Exchange {
    pub fn new(
        transport: Arc<dyn Transport>,
        timeout: Duration,
        metrics: Arc<HandlerMetrics>,
    ) -> Self {
        Self {
            transport,
            timeout,
            metrics,
        }
    }

    /// Sends one request under `label`; an elapsed deadline is a connection error.
    pub async fn call(
        &self,
        label: &str,
        request: TransportRequest,
    ) -> HandlerResult<TransportResponse> {
        let started = Instant::now();
        let method = request.method;
        let outcome = match tokio::time::timeout(self.timeout, self.transport.send(request)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(HandlerError::connection(format!(
                "{label} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };
        let failed = match &outcome {
            Ok(response) => !response.is_success() && response.status != 404,
            Err(_) => true,
        };
        let elapsed = started.elapsed();
        self.metrics.record_native_call(label, elapsed, failed);
        debug!(
            label,
            method = method.as_str(),
            elapsed_us = elapsed.as_micros() as u64,
            failed,
            "native call"
        );
        outcome
    }

    /// Sends one request and returns the body of a successful response.
    pub async fn call_json(&self, label: &str, request: TransportRequest) -> HandlerResult<Json> {
        self.call(label, request).await?.into_success()
    }
}

/// Closed set of adapters.
#[derive(Debug)]
pub enum NativeAdapter {
    Financial(FinancialAdapter),
    Calendar(CalendarAdapter),
    NewSql(NewSqlAdapter),
}

impl NativeAdapter {
    /// Builds an adapter from a validated config. Calendar tokens must already be resolved.
    pub fn new(config: ConnectionConfig, calendar_token: Option<String>) -> HandlerResult<Self> {
        Ok(match config {
            ConnectionConfig::Financial(config) => Self::Financial(FinancialAdapter::new(config)),
            ConnectionConfig::Calendar(config) => {
                let token = calendar_token.ok_or_else(|| {
                    HandlerError::configuration("calendar access token was not resolved")
                })?;
                Self::Calendar(CalendarAdapter::new(config, token))
            }
            ConnectionConfig::NewSql(config) => Self::NewSql(NewSqlAdapter::new(config)),
        })
    }

    /// Proves the credentials work with one cheap call.
    pub async fn authenticate(&mut self, exchange: &Exchange) -> HandlerResult<()> {
        match self {
            Self::Financial(adapter) => adapter.authenticate(exchange).await,
            Self::Calendar(adapter) => adapter.authenticate(exchange).await,
            Self::NewSql(adapter) => adapter.authenticate(exchange).await,
        }
    }

    /// Tables found on the remote side during connect.
    pub async fn discover_tables(
        &mut self,
        exchange: &Exchange,
    ) -> HandlerResult<Vec<TableDescriptor>> {
        match self {
            Self::NewSql(adapter) => adapter.discover_tables(exchange).await,
            Self::Financial(_) | Self::Calendar(_) => Ok(Vec::new()),
        }
    }

    pub async fn fetch_page(
        &mut self,
        exchange: &Exchange,
        request: &NativeRequest,
        cursor: &PageCursor,
        page_size: usize,
    ) -> HandlerResult<NativePage> {
        match self {
            Self::Financial(adapter) => adapter.fetch_page(exchange, request, cursor, page_size).await,
            Self::Calendar(adapter) => adapter.fetch_page(exchange, request, cursor, page_size).await,
            Self::NewSql(adapter) => adapter.fetch_page(exchange, request, cursor, page_size).await,
        }
    }

    /// Releases server-side state of an abandoned paged read.
    pub async fn release_cursor(&mut self, exchange: &Exchange, cursor: &PageCursor) {
        if let (Self::NewSql(adapter), PageCursor::Frame { statement_id, .. }) = (self, cursor) {
            adapter.close_statement(exchange, *statement_id).await;
        }
    }

    /// Creates one resource and returns its identifier when the service reports one.
    pub async fn create(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        record: &NativeRecord,
    ) -> HandlerResult<Option<String>> {
        match self {
            Self::Calendar(adapter) => adapter.create(exchange, table, record).await,
            Self::NewSql(adapter) => adapter.create(exchange, table, record).await,
            Self::Financial(_) => Err(read_only(table)),
        }
    }

    pub async fn update(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        id: &Value,
        record: &NativeRecord,
    ) -> HandlerResult<WriteOutcome> {
        match self {
            Self::Calendar(adapter) => adapter.update(exchange, table, id, record).await,
            Self::NewSql(_) | Self::Financial(_) => Err(HandlerError::Unsupported(format!(
                "per-resource update of '{}'",
                table.name
            ))),
        }
    }

    pub async fn delete(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        id: &Value,
    ) -> HandlerResult<WriteOutcome> {
        match self {
            Self::Calendar(adapter) => adapter.delete(exchange, table, id).await,
            Self::NewSql(_) | Self::Financial(_) => Err(HandlerError::Unsupported(format!(
                "per-resource delete of '{}'",
                table.name
            ))),
        }
    }

    /// One native statement updating every row matching `predicates`.
    pub async fn bulk_update(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        assignments: &[(String, Value)],
        predicates: &[Predicate],
    ) -> HandlerResult<u64> {
        match self {
            Self::NewSql(adapter) => {
                adapter
                    .bulk_update(exchange, table, assignments, predicates)
                    .await
            }
            Self::Financial(_) | Self::Calendar(_) => Err(HandlerError::Unsupported(format!(
                "bulk update of '{}'",
                table.name
            ))),
        }
    }

    /// One native statement deleting every row matching `predicates`.
    pub async fn bulk_delete(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        predicates: &[Predicate],
    ) -> HandlerResult<u64> {
        match self {
            Self::NewSql(adapter) => adapter.bulk_delete(exchange, table, predicates).await,
            Self::Financial(_) | Self::Calendar(_) => Err(HandlerError::Unsupported(format!(
                "bulk delete of '{}'",
                table.name
            ))),
        }
    }

    /// Runs a validated passthrough operation and returns response records.
    pub async fn native_call(
        &mut self,
        exchange: &Exchange,
        call: &NativeCallDescriptor,
    ) -> HandlerResult<Vec<Json>> {
        match self {
            Self::Financial(adapter) => adapter.native_call(exchange, call).await,
            Self::Calendar(adapter) => adapter.native_call(exchange, call).await,
            Self::NewSql(adapter) => adapter.native_call(exchange, call).await,
        }
    }

    /// Tears down remote session state. Best effort for stateless services.
    pub async fn close(&mut self, exchange: &Exchange) -> HandlerResult<()> {
        match self {
            Self::NewSql(adapter) => adapter.close(exchange).await,
            Self::Financial(_) | Self::Calendar(_) => Ok(()),
        }
    }
}

fn read_only(table: &TableDescriptor) -> HandlerError {
    HandlerError::validation(format!("table '{}' is read-only", table.name))
}

/// Passthrough operations declared by `kind`.
pub fn operations_for(kind: EngineKind) -> &'static [NativeOperation] {
    match kind {
        EngineKind::FinancialAggregator => financial::OPERATIONS,
        EngineKind::CalendarService => calendar::OPERATIONS,
        EngineKind::NewSqlDatabase => newsql::OPERATIONS,
    }
}

/// Reads a required string argument of an already-validated native call.
fn text_arg(call: &NativeCallDescriptor, name: &str) -> HandlerResult<String> {
    match call.args.get(name) {
        Some(Value::Null) | None => Err(HandlerError::MissingArgument {
            operation: call.operation.clone(),
            argument: name.to_string(),
        }),
        Some(value) => Ok(value.to_string()),
    }
}

/// Splits a comma-separated or single-valued argument into a JSON string list.
fn list_arg(value: &Value) -> Json {
    Json::Array(
        value
            .to_string()
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Json::String(item.to_string()))
            .collect(),
    )
}
