//! NewSQL database adapter speaking the Avatica JSON protocol of a Phoenix
//! query server.
//!
//! One remote connection is opened during authenticate and reused until
//! close. Paged reads keep their statement open between frames; the column
//! labels of each open statement are remembered so later frames can be
//! turned into records.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{text_arg, Exchange, NativePage, NativeRecord, NativeRequest, PageCursor};
use crate::config::{NewSqlAuth, NewSqlConfig};
use crate::descriptor::{Comparison, NativeCallDescriptor, Predicate, SortDirection};
use crate::error::{HandlerError, HandlerResult};
use crate::passthrough::NativeOperation;
use crate::schema::{discovered_table, ColumnType, TableDescriptor};
use crate::transport::TransportRequest;
use crate::value::Value;

pub(super) static OPERATIONS: &[NativeOperation] = &[
    NativeOperation {
        name: "execute",
        required: &["sql"],
        optional: &[],
        description: "Runs one raw SQL statement; statements without results report affected_rows.",
    },
    NativeOperation {
        name: "get_tables",
        required: &[],
        optional: &[],
        description: "User tables listed in SYSTEM.CATALOG.",
    },
    NativeOperation {
        name: "get_columns",
        required: &["table_name"],
        optional: &[],
        description: "Column names and types of one table.",
    },
];

const CATALOG_QUERY: &str = "SELECT TABLE_SCHEM, TABLE_NAME, COLUMN_NAME, DATA_TYPE, NULLABLE, KEY_SEQ \
     FROM SYSTEM.CATALOG WHERE COLUMN_NAME IS NOT NULL \
     ORDER BY TABLE_SCHEM, TABLE_NAME, ORDINAL_POSITION";

const TABLES_QUERY: &str = "SELECT DISTINCT TABLE_NAME, TABLE_SCHEM FROM SYSTEM.CATALOG";

const SYSTEM_SCHEMA: &str = "SYSTEM";

const ONE_SHOT_FRAME: usize = 500;

#[derive(Debug)]
pub struct NewSqlAdapter {
    config: NewSqlConfig,
    connection_id: Option<String>,
    /// Column labels of statements with frames still to fetch.
    statements: HashMap<i64, Vec<String>>,
}

#[derive(Debug)]
struct Frame {
    offset: u64,
    done: bool,
    rows: Vec<Json>,
}

#[derive(Debug)]
struct Executed {
    statement_id: i64,
    columns: Vec<(String, String)>,
    frame: Option<Frame>,
    update_count: i64,
}

impl Executed {
    fn labels(&self) -> Vec<String> {
        self.columns.iter().map(|(label, _)| label.clone()).collect()
    }
}

impl NewSqlAdapter {
    pub fn new(config: NewSqlConfig) -> Self {
        Self {
            config,
            connection_id: None,
            statements: HashMap::new(),
        }
    }

    fn request(&self, body: Json) -> TransportRequest {
        let request = TransportRequest::post("", body);
        match &self.config.auth {
            NewSqlAuth::Basic { user, password } => request.with_header(
                "Authorization",
                format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))),
            ),
            NewSqlAuth::None { do_as: Some(user) } => request.with_query("doAs", user.clone()),
            NewSqlAuth::None { do_as: None } => request,
        }
    }

    fn connection_id(&self) -> HandlerResult<String> {
        self.connection_id
            .clone()
            .ok_or(HandlerError::ConnectionClosed)
    }

    /// One protocol round trip. Server-side SQL errors are non-retryable rejections.
    async fn rpc(&self, exchange: &Exchange, label: &str, body: Json) -> HandlerResult<Json> {
        let response = exchange.call(label, self.request(body)).await?;
        if response.body.get("response").and_then(Json::as_str) == Some("error") {
            let detail = response
                .body
                .get("errorMessage")
                .and_then(Json::as_str)
                .unwrap_or("unknown server error")
                .to_string();
            return Err(HandlerError::RemoteRejected {
                status: response.status,
                detail,
            });
        }
        response.into_success()
    }

    pub(super) async fn authenticate(&mut self, exchange: &Exchange) -> HandlerResult<()> {
        let connection_id = format!("conduit-{}", Uuid::new_v4());
        let open = json!({
            "request": "openConnection",
            "connectionId": connection_id,
            "info": {},
        });
        let mut attempt = 0u32;
        loop {
            match self.rpc(exchange, "open_connection", open.clone()).await {
                Ok(_) => break,
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "query server handshake failed; retrying");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err),
            }
        }
        self.rpc(
            exchange,
            "connection_sync",
            json!({
                "request": "connectionSync",
                "connectionId": connection_id,
                "connProps": {
                    "connProps": "connPropsImpl",
                    "autoCommit": self.config.autocommit,
                    "dirty": true,
                },
            }),
        )
        .await?;
        debug!(connection_id = %connection_id, "query server connection opened");
        self.connection_id = Some(connection_id);
        Ok(())
    }

    async fn execute(
        &mut self,
        exchange: &Exchange,
        sql: &str,
        first_frame: usize,
    ) -> HandlerResult<Executed> {
        let connection_id = self.connection_id()?;
        let created = self
            .rpc(
                exchange,
                "create_statement",
                json!({"request": "createStatement", "connectionId": connection_id}),
            )
            .await?;
        let statement_id = created
            .get("statementId")
            .and_then(Json::as_i64)
            .ok_or_else(|| HandlerError::malformed("createStatement returned no statementId"))?;
        debug!(statement_id, sql, "executing statement");
        let executed = self
            .rpc(
                exchange,
                "prepare_and_execute",
                json!({
                    "request": "prepareAndExecute",
                    "connectionId": connection_id,
                    "statementId": statement_id,
                    "sql": sql,
                    "maxRowsTotal": -1,
                    "maxRowsInFirstFrame": first_frame,
                }),
            )
            .await
            .and_then(|response| parse_executed(statement_id, &response));
        match executed {
            Ok(executed) => Ok(executed),
            Err(err) => {
                self.close_statement(exchange, statement_id).await;
                Err(err)
            }
        }
    }

    async fn fetch_frame(
        &self,
        exchange: &Exchange,
        statement_id: i64,
        offset: u64,
        frame_size: usize,
    ) -> HandlerResult<Frame> {
        let response = self
            .rpc(
                exchange,
                "fetch",
                json!({
                    "request": "fetch",
                    "connectionId": self.connection_id()?,
                    "statementId": statement_id,
                    "offset": offset,
                    "frameMaxSize": frame_size,
                }),
            )
            .await?;
        parse_frame(response.get("frame"))?
            .ok_or_else(|| HandlerError::malformed("fetch response has no frame"))
    }

    /// Closes a statement, best effort; a failure only leaks server-side state.
    pub(super) async fn close_statement(&mut self, exchange: &Exchange, statement_id: i64) {
        self.statements.remove(&statement_id);
        let Some(connection_id) = self.connection_id.clone() else {
            return;
        };
        let result = self
            .rpc(
                exchange,
                "close_statement",
                json!({
                    "request": "closeStatement",
                    "connectionId": connection_id,
                    "statementId": statement_id,
                }),
            )
            .await;
        if let Err(err) = result {
            warn!(statement_id, error = %err, "failed to close statement");
        }
    }

    /// Runs a query to completion and returns its column labels and records.
    async fn query_all(
        &mut self,
        exchange: &Exchange,
        sql: &str,
    ) -> HandlerResult<(Vec<(String, String)>, Vec<Json>)> {
        let executed = self.execute(exchange, sql, ONE_SHOT_FRAME).await?;
        let statement_id = executed.statement_id;
        let result = self.drain(exchange, executed).await;
        self.close_statement(exchange, statement_id).await;
        result
    }

    async fn drain(
        &self,
        exchange: &Exchange,
        executed: Executed,
    ) -> HandlerResult<(Vec<(String, String)>, Vec<Json>)> {
        let labels = executed.labels();
        let Some(mut frame) = executed.frame else {
            return Ok((executed.columns, Vec::new()));
        };
        let mut records = Vec::new();
        loop {
            let fetched = frame.rows.len() as u64;
            let next_offset = frame.offset + fetched;
            records.extend(rows_to_records(&labels, frame.rows)?);
            if frame.done {
                break;
            }
            frame = self
                .fetch_frame(exchange, executed.statement_id, next_offset, ONE_SHOT_FRAME)
                .await?;
            if frame.rows.is_empty() && !frame.done {
                return Err(HandlerError::malformed("fetch returned an empty unfinished frame"));
            }
        }
        Ok((executed.columns, records))
    }

    /// Runs one DML statement and commits it unless the connection autocommits.
    async fn execute_dml(&mut self, exchange: &Exchange, sql: &str) -> HandlerResult<u64> {
        let executed = self.execute(exchange, sql, 0).await?;
        self.close_statement(exchange, executed.statement_id).await;
        self.commit_if_needed(exchange).await?;
        Ok(executed.update_count.max(0) as u64)
    }

    async fn commit_if_needed(&mut self, exchange: &Exchange) -> HandlerResult<()> {
        if self.config.autocommit {
            return Ok(());
        }
        self.rpc(
            exchange,
            "commit",
            json!({"request": "commit", "connectionId": self.connection_id()?}),
        )
        .await
        .map(|_| ())
    }

    pub(super) async fn discover_tables(
        &mut self,
        exchange: &Exchange,
    ) -> HandlerResult<Vec<TableDescriptor>> {
        let (_, records) = self.query_all(exchange, CATALOG_QUERY).await?;
        let mut tables: Vec<(String, Vec<(String, ColumnType, bool)>, Vec<(i64, String)>)> =
            Vec::new();
        for record in records {
            let schema = record.get("TABLE_SCHEM").and_then(Json::as_str);
            if schema == Some(SYSTEM_SCHEMA) {
                continue;
            }
            let (Some(table), Some(column)) = (
                record.get("TABLE_NAME").and_then(Json::as_str),
                record.get("COLUMN_NAME").and_then(Json::as_str),
            ) else {
                return Err(HandlerError::malformed("catalog row without table or column name"));
            };
            let name = qualified_name(schema, table);
            let data_type = record.get("DATA_TYPE").and_then(Json::as_i64).unwrap_or(12);
            let nullable = record.get("NULLABLE").and_then(Json::as_i64) != Some(0);
            let index = match tables.iter().position(|(existing, _, _)| *existing == name) {
                Some(index) => index,
                None => {
                    tables.push((name, Vec::new(), Vec::new()));
                    tables.len() - 1
                }
            };
            let (_, columns, key) = &mut tables[index];
            columns.push((column.to_string(), column_type_for(data_type), nullable));
            if let Some(seq) = record.get("KEY_SEQ").and_then(Json::as_i64) {
                key.push((seq, column.to_string()));
            }
        }
        Ok(tables
            .into_iter()
            .map(|(name, columns, mut key)| {
                key.sort();
                let primary_key = key.into_iter().map(|(_, column)| column).collect();
                discovered_table(&name, columns, primary_key)
            })
            .collect())
    }

    pub(super) async fn fetch_page(
        &mut self,
        exchange: &Exchange,
        request: &NativeRequest,
        cursor: &PageCursor,
        page_size: usize,
    ) -> HandlerResult<NativePage> {
        let (statement_id, labels, frame) = match cursor {
            PageCursor::Start => {
                let sql = render_select(request)?;
                let executed = self.execute(exchange, &sql, page_size).await?;
                let labels = executed.labels();
                let Some(frame) = executed.frame else {
                    self.close_statement(exchange, executed.statement_id).await;
                    return Err(HandlerError::malformed("query returned no result set"));
                };
                (executed.statement_id, labels, frame)
            }
            PageCursor::Frame {
                statement_id,
                offset,
            } => {
                let labels = self.statements.get(statement_id).cloned().ok_or_else(|| {
                    HandlerError::validation(format!("statement {statement_id} is not open"))
                })?;
                let frame = self
                    .fetch_frame(exchange, *statement_id, *offset, page_size)
                    .await?;
                (*statement_id, labels, frame)
            }
            other => {
                return Err(HandlerError::validation(format!(
                    "query server cannot resume from {other:?}"
                )))
            }
        };
        let next_offset = frame.offset + frame.rows.len() as u64;
        let exhausted = frame.done || frame.rows.is_empty();
        let records = rows_to_records(&labels, frame.rows)?;
        let next = if exhausted {
            self.close_statement(exchange, statement_id).await;
            None
        } else {
            self.statements.insert(statement_id, labels);
            Some(PageCursor::Frame {
                statement_id,
                offset: next_offset,
            })
        };
        Ok(NativePage { records, next })
    }

    pub(super) async fn create(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        record: &NativeRecord,
    ) -> HandlerResult<Option<String>> {
        let sql = render_upsert(table, &record.values)?;
        self.execute_dml(exchange, &sql).await?;
        let created = match table.primary_key.as_slice() {
            [single] => record
                .values
                .iter()
                .find(|(column, _)| column == single)
                .map(|(_, value)| value.to_string()),
            _ => None,
        };
        Ok(created)
    }

    pub(super) async fn bulk_update(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        assignments: &[(String, Value)],
        predicates: &[Predicate],
    ) -> HandlerResult<u64> {
        let sql = render_bulk_update(table, assignments, predicates)?;
        self.execute_dml(exchange, &sql).await
    }

    pub(super) async fn bulk_delete(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        predicates: &[Predicate],
    ) -> HandlerResult<u64> {
        let sql = format!(
            "DELETE FROM {}{}",
            quote_table(&table.resource),
            where_clause(predicates)?
        );
        self.execute_dml(exchange, &sql).await
    }

    pub(super) async fn native_call(
        &mut self,
        exchange: &Exchange,
        call: &NativeCallDescriptor,
    ) -> HandlerResult<Vec<Json>> {
        match call.operation.as_str() {
            "execute" => {
                let sql = text_arg(call, "sql")?;
                let executed = self.execute(exchange, &sql, ONE_SHOT_FRAME).await?;
                let statement_id = executed.statement_id;
                if executed.frame.is_none() {
                    let affected = executed.update_count.max(0);
                    self.close_statement(exchange, statement_id).await;
                    self.commit_if_needed(exchange).await?;
                    return Ok(vec![json!({ "affected_rows": affected })]);
                }
                let result = self.drain(exchange, executed).await;
                self.close_statement(exchange, statement_id).await;
                result.map(|(_, records)| records)
            }
            "get_tables" => {
                let (_, records) = self.query_all(exchange, TABLES_QUERY).await?;
                Ok(records
                    .iter()
                    .filter_map(|record| {
                        let schema = record.get("TABLE_SCHEM").and_then(Json::as_str);
                        let table = record.get("TABLE_NAME").and_then(Json::as_str)?;
                        (schema != Some(SYSTEM_SCHEMA))
                            .then(|| json!({ "table_name": qualified_name(schema, table) }))
                    })
                    .collect())
            }
            "get_columns" => {
                let table = text_arg(call, "table_name")?;
                let sql = format!("SELECT * FROM {} LIMIT 5", quote_table(&table));
                let (columns, _) = self.query_all(exchange, &sql).await?;
                Ok(columns
                    .into_iter()
                    .map(|(column, data_type)| {
                        json!({ "column_name": column, "data_type": data_type })
                    })
                    .collect())
            }
            other => Err(HandlerError::UnknownOperation {
                engine: "newsql-database".to_string(),
                operation: other.to_string(),
            }),
        }
    }

    pub(super) async fn close(&mut self, exchange: &Exchange) -> HandlerResult<()> {
        let open: Vec<i64> = self.statements.keys().copied().collect();
        for statement_id in open {
            self.close_statement(exchange, statement_id).await;
        }
        let Some(connection_id) = self.connection_id.take() else {
            return Ok(());
        };
        self.rpc(
            exchange,
            "close_connection",
            json!({"request": "closeConnection", "connectionId": connection_id}),
        )
        .await
        .map(|_| ())
    }
}

fn parse_executed(statement_id: i64, response: &Json) -> HandlerResult<Executed> {
    let result = response
        .get("results")
        .and_then(Json::as_array)
        .and_then(|results| results.first())
        .ok_or_else(|| HandlerError::malformed("executeResults has no results"))?;
    let columns = result
        .pointer("/signature/columns")
        .and_then(Json::as_array)
        .map(|columns| {
            columns
                .iter()
                .map(|column| {
                    let label = column
                        .get("label")
                        .or_else(|| column.get("columnName"))
                        .and_then(Json::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let type_name = column
                        .pointer("/type/name")
                        .or_else(|| column.get("columnClassName"))
                        .and_then(Json::as_str)
                        .unwrap_or("UNKNOWN")
                        .to_string();
                    (label, type_name)
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(Executed {
        statement_id,
        columns,
        frame: parse_frame(result.get("firstFrame"))?,
        update_count: result
            .get("updateCount")
            .and_then(Json::as_i64)
            .unwrap_or(-1),
    })
}

fn parse_frame(frame: Option<&Json>) -> HandlerResult<Option<Frame>> {
    let Some(frame) = frame.filter(|frame| !frame.is_null()) else {
        return Ok(None);
    };
    let rows = match frame.get("rows") {
        Some(Json::Array(rows)) => rows.clone(),
        None | Some(Json::Null) => Vec::new(),
        Some(_) => return Err(HandlerError::malformed("frame rows is not an array")),
    };
    Ok(Some(Frame {
        offset: frame.get("offset").and_then(Json::as_u64).unwrap_or(0),
        done: frame.get("done").and_then(Json::as_bool).unwrap_or(true),
        rows,
    }))
}

fn rows_to_records(labels: &[String], rows: Vec<Json>) -> HandlerResult<Vec<Json>> {
    rows.into_iter()
        .map(|row| match row {
            Json::Array(values) if values.len() == labels.len() => Ok(Json::Object(
                labels.iter().cloned().zip(values).collect::<Map<_, _>>(),
            )),
            other => Err(HandlerError::malformed(format!(
                "frame row does not match {} columns: {other}",
                labels.len()
            ))),
        })
        .collect()
}

fn qualified_name(schema: Option<&str>, table: &str) -> String {
    match schema.filter(|schema| !schema.is_empty()) {
        Some(schema) => format!("{schema}.{table}"),
        None => table.to_string(),
    }
}

/// `java.sql.Types` code to column type.
fn column_type_for(data_type: i64) -> ColumnType {
    match data_type {
        -7 | 16 => ColumnType::Bool,
        -6 | 5 | 4 | -5 => ColumnType::Int,
        6 | 7 | 8 | 2 | 3 => ColumnType::Float,
        91 => ColumnType::Date,
        92 | 93 => ColumnType::Timestamp,
        _ => ColumnType::Text,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes `schema.table` as two identifiers.
fn quote_table(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(name),
    }
}

fn render_literal(value: &Value) -> HandlerResult<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(int) => int.to_string(),
        Value::Float(float) if float.is_finite() => format!("{float:?}"),
        Value::Float(float) => {
            return Err(HandlerError::validation(format!(
                "cannot render non-finite number {float}"
            )))
        }
        Value::Text(text) => format!("'{}'", text.replace('\'', "''")),
        Value::Date(date) => format!("TO_DATE('{}', 'yyyy-MM-dd')", date.format("%Y-%m-%d")),
        Value::Timestamp(ts) => format!(
            "TO_TIMESTAMP('{}')",
            ts.format("%Y-%m-%d %H:%M:%S%.3f")
        ),
    })
}

fn render_predicate(predicate: &Predicate) -> HandlerResult<String> {
    let column = quote_ident(&predicate.column);
    Ok(match &predicate.comparison {
        Comparison::Range { low, high } => format!(
            "{column} BETWEEN {} AND {}",
            render_literal(low)?,
            render_literal(high)?
        ),
        Comparison::NotEq(value) => format!("{column} <> {}", render_literal(value)?),
        Comparison::Eq(value)
        | Comparison::Lt(value)
        | Comparison::LtEq(value)
        | Comparison::Gt(value)
        | Comparison::GtEq(value) => format!(
            "{column} {} {}",
            predicate.comparison.operator(),
            render_literal(value)?
        ),
    })
}

fn where_clause(predicates: &[Predicate]) -> HandlerResult<String> {
    if predicates.is_empty() {
        return Ok(String::new());
    }
    let rendered = predicates
        .iter()
        .map(render_predicate)
        .collect::<HandlerResult<Vec<_>>>()?;
    Ok(format!(" WHERE {}", rendered.join(" AND ")))
}

/// Renders the SELECT for one paged native request.
pub fn render_select(request: &NativeRequest) -> HandlerResult<String> {
    let columns = if request.columns.is_empty() {
        "*".to_string()
    } else {
        request
            .columns
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut sql = format!(
        "SELECT {columns} FROM {}{}",
        quote_table(&request.resource),
        where_clause(&request.filters)?
    );
    if let Some(order) = &request.order {
        let direction = match order.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {} {direction}", quote_ident(&order.column)));
    }
    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(sql)
}

fn render_upsert(table: &TableDescriptor, values: &[(String, Value)]) -> HandlerResult<String> {
    let columns = values
        .iter()
        .map(|(column, _)| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let literals = values
        .iter()
        .map(|(_, value)| render_literal(value))
        .collect::<HandlerResult<Vec<_>>>()?
        .join(", ");
    Ok(format!(
        "UPSERT INTO {} ({columns}) VALUES ({literals})",
        quote_table(&table.resource)
    ))
}

/// Phoenix has no UPDATE; matching rows are re-upserted by primary key.
fn render_bulk_update(
    table: &TableDescriptor,
    assignments: &[(String, Value)],
    predicates: &[Predicate],
) -> HandlerResult<String> {
    if table.primary_key.is_empty() {
        return Err(HandlerError::Unsupported(format!(
            "update of '{}' without a primary key",
            table.name
        )));
    }
    if let Some((column, _)) = assignments
        .iter()
        .find(|(column, _)| table.primary_key.contains(column))
    {
        return Err(HandlerError::validation(format!(
            "cannot update primary key column '{column}' of '{}'",
            table.name
        )));
    }
    let key_columns: Vec<String> = table.primary_key.iter().map(|key| quote_ident(key)).collect();
    let mut target = key_columns.clone();
    target.extend(assignments.iter().map(|(column, _)| quote_ident(column)));
    let mut projected = key_columns;
    for (_, value) in assignments {
        projected.push(render_literal(value)?);
    }
    let table_name = quote_table(&table.resource);
    Ok(format!(
        "UPSERT INTO {table_name} ({}) SELECT {} FROM {table_name}{}",
        target.join(", "),
        projected.join(", "),
        where_clause(predicates)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::OrderBy;
    use crate::predicates::NativeParams;
    use chrono::NaiveDate;

    fn orders() -> TableDescriptor {
        discovered_table(
            "SALES.ORDERS",
            vec![
                ("ID".to_string(), ColumnType::Int, false),
                ("STATUS".to_string(), ColumnType::Text, true),
                ("PLACED".to_string(), ColumnType::Date, true),
            ],
            vec!["ID".to_string()],
        )
    }

    #[test]
    fn select_renders_filters_order_and_limit() {
        let request = NativeRequest {
            table: "SALES.ORDERS".to_string(),
            resource: "SALES.ORDERS".to_string(),
            params: NativeParams::default(),
            filters: vec![
                Predicate::eq("STATUS", "it's open"),
                Predicate::range(
                    "PLACED",
                    NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
                    NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"),
                ),
            ],
            columns: vec!["ID".to_string(), "STATUS".to_string()],
            order: Some(OrderBy::desc("ID")),
            limit: Some(10),
        };
        assert_eq!(
            render_select(&request).expect("sql"),
            "SELECT \"ID\", \"STATUS\" FROM \"SALES\".\"ORDERS\" \
             WHERE \"STATUS\" = 'it''s open' AND \"PLACED\" BETWEEN \
             TO_DATE('2024-01-01', 'yyyy-MM-dd') AND TO_DATE('2024-01-31', 'yyyy-MM-dd') \
             ORDER BY \"ID\" DESC LIMIT 10"
        );
    }

    #[test]
    fn bulk_update_upserts_by_primary_key() {
        let sql = render_bulk_update(
            &orders(),
            &[("STATUS".to_string(), Value::from("shipped"))],
            &[Predicate::lt("ID", 100)],
        )
        .expect("sql");
        assert_eq!(
            sql,
            "UPSERT INTO \"SALES\".\"ORDERS\" (\"ID\", \"STATUS\") SELECT \"ID\", 'shipped' \
             FROM \"SALES\".\"ORDERS\" WHERE \"ID\" < 100"
        );
        assert!(render_bulk_update(&orders(), &[("ID".to_string(), Value::Int(1))], &[]).is_err());
    }

    #[test]
    fn frame_rows_become_records() {
        let labels = vec!["ID".to_string(), "STATUS".to_string()];
        let records =
            rows_to_records(&labels, vec![json!([1, "open"]), json!([2, null])]).expect("rows");
        assert_eq!(records[1], json!({"ID": 2, "STATUS": null}));
        assert!(rows_to_records(&labels, vec![json!([1])]).is_err());
    }

    #[test]
    fn sql_types_map_to_column_types() {
        assert_eq!(column_type_for(-5), ColumnType::Int);
        assert_eq!(column_type_for(3), ColumnType::Float);
        assert_eq!(column_type_for(93), ColumnType::Timestamp);
        assert_eq!(column_type_for(12), ColumnType::Text);
    }
}
