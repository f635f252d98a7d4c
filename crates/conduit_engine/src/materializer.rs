//! Result materializer: lazy, finite, non-restartable row streams.
//!
//! Pages are fetched only when every buffered row has been pulled and the
//! limit is not yet reached. Each page request asks for at most the rows
//! still needed, so a limited query never fetches past the page that
//! satisfied it. Cancellation and connection closure are checked before
//! every fetch.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{NativeRequest, PageCursor};
use crate::connection::Session;
use crate::descriptor::{NativeCallDescriptor, OrderBy, Predicate, SortDirection};
use crate::error::{HandlerError, HandlerResult};
use crate::predicates::row_matches;
use crate::row::Row;
use crate::schema::{FieldResolver, TableDescriptor};
use crate::translator::QueryPlan;
use crate::value::Value;

/// Why a stream stopped producing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The service signalled end-of-data.
    Exhausted,
    /// The requested limit was emitted.
    LimitReached,
    /// The caller's cancellation token fired.
    Cancelled,
}

/// Per-stream fetch accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub pages: u64,
    pub rows_scanned: u64,
    pub rows_returned: u64,
}

enum Source {
    Paged {
        pending: VecDeque<NativeRequest>,
        current: Option<(NativeRequest, PageCursor)>,
    },
    Native(Option<NativeCallDescriptor>),
    Empty,
}

enum Shape {
    /// Rows follow a table contract through the field dictionary.
    Mapped {
        table: Arc<TableDescriptor>,
        resolver: FieldResolver,
        columns: Arc<[String]>,
        projected: Arc<[String]>,
        indexes: Vec<usize>,
    },
    /// Columns come from the first response, in order of first appearance.
    Inferred { columns: Option<Arc<[String]>> },
}

/// Lazy sequence of rows for one query or native call.
pub struct RowStream {
    session: Arc<Session>,
    source: Source,
    shape: Shape,
    residual: Vec<Predicate>,
    limit: Option<usize>,
    client_order: Option<OrderBy>,
    page_size: usize,
    buffer: VecDeque<Row>,
    emitted: usize,
    completion: Option<Completion>,
    failed: bool,
    cancel: Option<CancellationToken>,
    stats: StreamStats,
}

impl RowStream {
    pub(crate) fn for_plan(session: Arc<Session>, plan: QueryPlan) -> Self {
        let table = plan.table;
        let columns: Arc<[String]> = table
            .visible_columns()
            .map(|column| column.name.clone())
            .collect::<Vec<_>>()
            .into();
        let indexes = plan
            .projection
            .iter()
            .filter_map(|name| columns.iter().position(|column| column == name))
            .collect();
        let resolver = FieldResolver::new(session.kind(), &table.name);
        Self::new(
            session,
            Source::Paged {
                pending: plan.requests.into(),
                current: None,
            },
            Shape::Mapped {
                table,
                resolver,
                columns,
                projected: plan.projection.into(),
                indexes,
            },
            plan.residual,
            plan.limit,
            plan.client_order,
            plan.page_size,
        )
    }

    pub(crate) fn for_native_call(session: Arc<Session>, call: NativeCallDescriptor) -> Self {
        Self::new(
            session,
            Source::Native(Some(call)),
            Shape::Inferred { columns: None },
            Vec::new(),
            None,
            None,
            1,
        )
    }

    fn new(
        session: Arc<Session>,
        source: Source,
        shape: Shape,
        residual: Vec<Predicate>,
        limit: Option<usize>,
        client_order: Option<OrderBy>,
        page_size: usize,
    ) -> Self {
        Self {
            session,
            source,
            shape,
            residual,
            limit,
            client_order,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            emitted: 0,
            completion: None,
            failed: false,
            cancel: None,
            stats: StreamStats::default(),
        }
    }

    /// Stops fetching once `token` is cancelled; rows already pulled stay valid.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Output column names; `None` for a passthrough stream before its first pull.
    pub fn columns(&self) -> Option<Arc<[String]>> {
        match &self.shape {
            Shape::Mapped { projected, .. } => Some(Arc::clone(projected)),
            Shape::Inferred { columns } => columns.clone(),
        }
    }

    /// Set once the stream has ended without error.
    pub fn completion(&self) -> Option<Completion> {
        self.completion
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Pulls the next row. `Ok(None)` marks the end; the stream is terminal after an error.
    pub async fn next_row(&mut self) -> HandlerResult<Option<Row>> {
        if self.session.is_closed() {
            self.failed = true;
            return Err(HandlerError::ConnectionClosed);
        }
        if self.failed {
            return Ok(None);
        }
        match self.pull().await {
            Ok(row) => Ok(row),
            Err(err) => {
                self.failed = true;
                self.release_cursor().await;
                Err(err)
            }
        }
    }

    /// Drains the stream into memory.
    pub async fn collect_rows(mut self) -> HandlerResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Adapts the stream to `futures` consumers; it ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = HandlerResult<Row>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut rows = state?;
            match rows.next_row().await {
                Ok(Some(row)) => Some((Ok(row), Some(rows))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    async fn pull(&mut self) -> HandlerResult<Option<Row>> {
        loop {
            if self.limit.is_some_and(|limit| self.emitted >= limit) {
                self.finish(Completion::LimitReached).await;
                return Ok(None);
            }
            if let Some(row) = self.buffer.pop_front() {
                self.emitted += 1;
                self.stats.rows_returned += 1;
                self.session.metrics().record_row_returned();
                return Ok(Some(self.project(row)));
            }
            if self.completion.is_some() {
                return Ok(None);
            }
            if self.is_cancelled() {
                self.finish(Completion::Cancelled).await;
                return Ok(None);
            }
            if let Some(order) = self.client_order.take() {
                self.fill_sorted(&order).await?;
                continue;
            }
            if !self.fetch_next(true).await? {
                self.finish(Completion::Exhausted).await;
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Buffers the whole eligible result, then sorts it.
    async fn fill_sorted(&mut self, order: &OrderBy) -> HandlerResult<()> {
        let cap = self.session.settings().max_buffered_rows;
        loop {
            if self.is_cancelled() {
                self.buffer.clear();
                self.finish(Completion::Cancelled).await;
                return Ok(());
            }
            if !self.fetch_next(false).await? {
                break;
            }
            if self.buffer.len() > cap {
                return Err(HandlerError::Unsupported(format!(
                    "sorting by {} would buffer more than {cap} rows",
                    order.column
                )));
            }
        }
        let mut rows: Vec<Row> = self.buffer.drain(..).collect();
        rows.sort_by(|left, right| compare_rows(left, right, order));
        self.buffer = rows.into();
        Ok(())
    }

    /// Fetches one more page or native response into the buffer.
    ///
    /// Returns `false` when the source has nothing left.
    async fn fetch_next(&mut self, bounded: bool) -> HandlerResult<bool> {
        let remaining = self
            .limit
            .filter(|_| bounded)
            .map(|limit| limit.saturating_sub(self.emitted));
        let page_limit = remaining
            .map(|remaining| remaining.min(self.page_size).max(1))
            .unwrap_or(self.page_size);

        let records = match &mut self.source {
            Source::Empty => return Ok(false),
            Source::Native(call) => {
                let Some(call) = call.take() else {
                    return Ok(false);
                };
                self.source = Source::Empty;
                self.session.native_call(&call).await?
            }
            Source::Paged { pending, current } => {
                if current.is_none() {
                    match pending.pop_front() {
                        Some(request) => *current = Some((request, PageCursor::Start)),
                        None => return Ok(false),
                    }
                }
                let Some((request, cursor)) = current.clone() else {
                    return Ok(false);
                };
                let page = self
                    .session
                    .fetch_page(&request, &cursor, page_limit)
                    .await?;
                if let Source::Paged { current, .. } = &mut self.source {
                    *current = page.next.map(|next| (request, next));
                }
                page.records
            }
        };

        self.stats.pages += 1;
        self.stats.rows_scanned += records.len() as u64;
        self.session.metrics().record_page(records.len() as u64);
        self.absorb(records)?;
        Ok(true)
    }

    fn absorb(&mut self, records: Vec<Json>) -> HandlerResult<()> {
        match &mut self.shape {
            Shape::Mapped {
                table,
                resolver,
                columns,
                ..
            } => {
                for record in &records {
                    let row = map_record(table, resolver, columns, record)?;
                    if row_matches(&row, &self.residual) {
                        self.buffer.push_back(row);
                    }
                }
            }
            Shape::Inferred { columns } => {
                let names = Arc::clone(columns.get_or_insert_with(|| infer_columns(&records)));
                for record in &records {
                    let values = names
                        .iter()
                        .map(|name| match record {
                            Json::Object(fields) => {
                                fields.get(name).map(Value::from_json).unwrap_or(Value::Null)
                            }
                            scalar if name.as_str() == "value" => Value::from_json(scalar),
                            _ => Value::Null,
                        })
                        .collect();
                    self.buffer.push_back(Row::new(Arc::clone(&names), values));
                }
            }
        }
        Ok(())
    }

    fn project(&self, row: Row) -> Row {
        match &self.shape {
            Shape::Mapped {
                projected, indexes, ..
            } => row.project(projected, indexes),
            Shape::Inferred { .. } => row,
        }
    }

    async fn finish(&mut self, completion: Completion) {
        if self.completion.is_some() {
            return;
        }
        self.completion = Some(completion);
        match completion {
            Completion::LimitReached => self.session.metrics().record_limit_stop(),
            Completion::Cancelled => self.session.metrics().record_scan_cancelled(),
            Completion::Exhausted => {}
        }
        self.release_cursor().await;
        debug!(
            ?completion,
            pages = self.stats.pages,
            rows_scanned = self.stats.rows_scanned,
            rows_returned = self.stats.rows_returned,
            "row stream finished"
        );
    }

    /// Frees server-side state held by an unfinished paged read.
    async fn release_cursor(&mut self) {
        if let Source::Paged { current, .. } = &mut self.source {
            if let Some((_, cursor)) = current.take() {
                self.session.release_cursor(&cursor).await;
            }
        }
    }
}

/// Maps one native record onto the visible columns of `table`.
fn map_record(
    table: &TableDescriptor,
    resolver: &FieldResolver,
    columns: &Arc<[String]>,
    record: &Json,
) -> HandlerResult<Row> {
    let mut values = Vec::with_capacity(columns.len());
    for column in table.visible_columns() {
        let value = match resolver.read(record, &column.name) {
            None if !column.nullable => {
                return Err(HandlerError::malformed(format!(
                    "'{}' record has no value for required column '{}'",
                    table.name, column.name
                )))
            }
            None => Value::Null,
            Some(raw) => Value::coerce_json(raw, column.column_type).map_err(|detail| {
                HandlerError::malformed(format!(
                    "'{}' column '{}': {detail}",
                    table.name, column.name
                ))
            })?,
        };
        values.push(value);
    }
    Ok(Row::new(Arc::clone(columns), values))
}

fn infer_columns(records: &[Json]) -> Arc<[String]> {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        match record {
            Json::Object(fields) => {
                for name in fields.keys() {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
            _ => {
                if !names.iter().any(|name| name == "value") {
                    names.push("value".to_string());
                }
            }
        }
    }
    names.into()
}

/// Nulls sort after every value ascending and before every value descending.
fn compare_rows(left: &Row, right: &Row, order: &OrderBy) -> Ordering {
    let null = Value::Null;
    let left = left.get(&order.column).unwrap_or(&null);
    let right = right.get(&order.column).unwrap_or(&null);
    let ordering = match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
    };
    match order.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inferred_columns_follow_first_appearance() {
        let columns = infer_columns(&[
            json!({"id": 1, "name": "a"}),
            json!({"name": "b", "extra": {"nested": true}}),
        ]);
        assert_eq!(&*columns, &["id", "name", "extra"]);
    }

    #[test]
    fn nulls_sort_last_ascending() {
        let columns: Arc<[String]> = vec!["n".to_string()].into();
        let row = |value: Value| Row::new(Arc::clone(&columns), vec![value]);
        let mut rows = vec![row(Value::Int(2)), row(Value::Null), row(Value::Int(1))];
        rows.sort_by(|l, r| compare_rows(l, r, &OrderBy::asc("n")));
        let values: Vec<_> = rows.iter().map(|row| row.values()[0].clone()).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Null]);
        rows.sort_by(|l, r| compare_rows(l, r, &OrderBy::desc("n")));
        assert_eq!(rows[0].values()[0], Value::Null);
    }
}
