//! Shared helpers for integration tests: a recording in-memory transport and
//! fake versions of the three supported services.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use conduit_engine::config::ParameterMap;
use conduit_engine::{HandlerResult, HttpMethod, Transport, TransportRequest, TransportResponse};
use serde_json::{json, Value as Json};

/// In-memory service behind a [`ScriptedTransport`].
pub trait FakeService: Send + 'static {
    fn handle(&mut self, request: &TransportRequest) -> TransportResponse;
}

/// Transport that records every request and answers from a fake service.
pub struct ScriptedTransport<S> {
    service: Mutex<S>,
    log: Mutex<Vec<TransportRequest>>,
}

impl<S: FakeService> ScriptedTransport<S> {
    pub fn new(service: S) -> Arc<Self> {
        Arc::new(Self {
            service: Mutex::new(service),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        lock(&self.log).clone()
    }

    /// Requests whose path equals `path`.
    pub fn calls_to(&self, path: &str) -> Vec<TransportRequest> {
        lock(&self.log)
            .iter()
            .filter(|request| request.path == path)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.log).len()
    }

    pub fn service(&self) -> MutexGuard<'_, S> {
        lock(&self.service)
    }
}

#[async_trait]
impl<S: FakeService> Transport for ScriptedTransport<S> {
    async fn send(&self, request: TransportRequest) -> HandlerResult<TransportResponse> {
        lock(&self.log).push(request.clone());
        Ok(lock(&self.service).handle(&request))
    }
}

/// Delays requests before handing them to `inner`; `only` narrows the delay to one path.
pub struct SlowTransport {
    inner: Arc<dyn Transport>,
    delay: Duration,
    only: Option<String>,
}

impl SlowTransport {
    pub fn new(inner: Arc<dyn Transport>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            only: None,
        }
    }

    pub fn only(mut self, path: impl Into<String>) -> Self {
        self.only = Some(path.into());
        self
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, request: TransportRequest) -> HandlerResult<TransportResponse> {
        if self.only.as_deref().map_or(true, |path| path == request.path) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.send(request).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn params(value: Json) -> ParameterMap {
    match value {
        Json::Object(map) => map.into_iter().collect(),
        other => panic!("params must be an object, got {other}"),
    }
}

fn body_str<'a>(request: &'a TransportRequest, field: &str) -> Option<&'a str> {
    request.body.as_ref()?.get(field)?.as_str()
}

// ---------------------------------------------------------------------------
// Financial aggregator
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFinancial {
    pub transactions: Vec<Json>,
    pub accounts: Vec<Json>,
    pub reject_credentials: bool,
}

pub fn financial_params() -> ParameterMap {
    params(json!({
        "client_id": "client-1",
        "secret": "secret-1",
        "access_token": "access-sandbox-1",
    }))
}

pub fn transaction(id: &str, account: &str, date: &str, amount: f64) -> Json {
    json!({
        "transaction_id": id,
        "account_id": account,
        "amount": amount,
        "iso_currency_code": "USD",
        "date": date,
        "authorized_date": null,
        "name": format!("purchase {id}"),
        "merchant_name": "Corner Shop",
        "payment_channel": "in store",
        "pending": false,
        "personal_finance_category": {"primary": "FOOD_AND_DRINK", "detailed": "FOOD_AND_DRINK_GROCERIES"},
    })
}

/// `count` transactions on consecutive days from 2022-01-01, newest first.
pub fn transactions_from_2022(count: usize) -> Vec<Json> {
    let start = chrono::NaiveDate::from_ymd_opt(2022, 1, 1).expect("valid date");
    let mut rows: Vec<Json> = (0..count)
        .map(|index| {
            let date = start + chrono::Duration::days(index as i64 * 10);
            let account = if index % 2 == 0 { "acc-checking" } else { "acc-savings" };
            transaction(
                &format!("txn-{index:03}"),
                account,
                &date.format("%Y-%m-%d").to_string(),
                10.0 + (index as f64 * 7.0) % 50.0,
            )
        })
        .collect();
    rows.reverse();
    rows
}

pub fn account(id: &str, name: &str, current: f64) -> Json {
    json!({
        "account_id": id,
        "name": name,
        "official_name": null,
        "type": "depository",
        "subtype": "checking",
        "mask": "0000",
        "balances": {"current": current, "available": current, "limit": null, "iso_currency_code": "USD"},
    })
}

impl FakeService for FakeFinancial {
    fn handle(&mut self, request: &TransportRequest) -> TransportResponse {
        if self.reject_credentials {
            return TransportResponse::new(
                400,
                json!({"error_type": "INVALID_INPUT", "error_message": "invalid access_token"}),
            );
        }
        match request.path.as_str() {
            "/item/get" => TransportResponse::ok(json!({
                "item": {"item_id": "item-1", "institution_id": "ins_1"},
                "request_id": "req-1",
            })),
            "/transactions/get" => {
                let (Some(start), Some(end)) =
                    (body_str(request, "start_date"), body_str(request, "end_date"))
                else {
                    return TransportResponse::new(
                        400,
                        json!({"error_message": "start_date and end_date are required"}),
                    );
                };
                let options = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("options"))
                    .cloned()
                    .unwrap_or(Json::Null);
                let count = options.get("count").and_then(Json::as_u64).unwrap_or(100) as usize;
                let offset = options.get("offset").and_then(Json::as_u64).unwrap_or(0) as usize;
                let accounts: Option<Vec<String>> = options
                    .get("account_ids")
                    .and_then(Json::as_array)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Json::as_str)
                            .map(str::to_string)
                            .collect()
                    });
                let matching: Vec<&Json> = self
                    .transactions
                    .iter()
                    .filter(|txn| {
                        let date = txn["date"].as_str().unwrap_or_default();
                        date >= start && date <= end
                    })
                    .filter(|txn| match &accounts {
                        Some(ids) => ids
                            .iter()
                            .any(|id| Some(id.as_str()) == txn["account_id"].as_str()),
                        None => true,
                    })
                    .collect();
                let page: Vec<Json> = matching
                    .iter()
                    .skip(offset)
                    .take(count)
                    .map(|txn| (*txn).clone())
                    .collect();
                TransportResponse::ok(json!({
                    "accounts": [],
                    "transactions": page,
                    "total_transactions": matching.len(),
                }))
            }
            "/accounts/balance/get" => TransportResponse::ok(json!({"accounts": self.accounts})),
            "/institutions/get_by_id" => TransportResponse::ok(json!({
                "institution": {
                    "institution_id": body_str(request, "institution_id"),
                    "name": "First Test Bank",
                    "products": ["transactions", "balance"],
                }
            })),
            _ => TransportResponse::new(404, json!({"error_message": "unknown endpoint"})),
        }
    }
}

// ---------------------------------------------------------------------------
// Calendar service
// ---------------------------------------------------------------------------

const EVENTS_PATH: &str = "/calendars/primary/events";

#[derive(Default)]
pub struct FakeCalendar {
    pub events: Vec<Json>,
    /// 1-based index of the PATCH call that fails with a server error.
    pub fail_patch_on: Option<usize>,
    patches: usize,
    created: usize,
}

pub fn calendar_params() -> ParameterMap {
    params(json!({"access_token": "ya29.test-token"}))
}

pub fn event(id: &str, summary: &str, start: &str, end: &str) -> Json {
    json!({
        "kind": "calendar#event",
        "id": id,
        "status": "confirmed",
        "htmlLink": format!("https://calendar.example.com/event?eid={id}"),
        "created": "2024-01-01T08:00:00Z",
        "updated": "2024-01-02T08:00:00Z",
        "summary": summary,
        "start": {"dateTime": start, "timeZone": "UTC"},
        "end": {"dateTime": end, "timeZone": "UTC"},
        "organizer": {"email": "owner@example.com", "self": true},
    })
}

impl FakeCalendar {
    pub fn with_events(events: Vec<Json>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn event(&self, id: &str) -> Option<&Json> {
        self.events.iter().find(|event| event["id"] == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.events.iter().position(|event| event["id"] == id)
    }
}

fn not_found() -> TransportResponse {
    TransportResponse::new(404, json!({"error": {"code": 404, "message": "Not Found"}}))
}

fn merge(target: &mut Json, patch: &Json) {
    if let (Json::Object(target), Json::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl FakeService for FakeCalendar {
    fn handle(&mut self, request: &TransportRequest) -> TransportResponse {
        let path = request.path.as_str();
        let event_id = path
            .strip_prefix(EVENTS_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| *rest != "quickAdd")
            .map(str::to_string);
        match (request.method, path, event_id) {
            (HttpMethod::Get, "/calendars/primary", _) => {
                TransportResponse::ok(json!({"id": "primary", "summary": "Team", "timeZone": "UTC"}))
            }
            (HttpMethod::Get, "/users/me/calendarList", _) => TransportResponse::ok(json!({
                "items": [{
                    "id": "primary",
                    "summary": "Team",
                    "timeZone": "UTC",
                    "accessRole": "owner",
                    "primary": true,
                }]
            })),
            (HttpMethod::Get, EVENTS_PATH, _) => {
                let query = request.query_value("q").map(str::to_ascii_lowercase);
                let matching: Vec<&Json> = self
                    .events
                    .iter()
                    .filter(|event| match &query {
                        Some(q) => event["summary"]
                            .as_str()
                            .is_some_and(|summary| summary.to_ascii_lowercase().contains(q)),
                        None => true,
                    })
                    .collect();
                let offset: usize = request
                    .query_value("pageToken")
                    .and_then(|token| token.parse().ok())
                    .unwrap_or(0);
                let max: usize = request
                    .query_value("maxResults")
                    .and_then(|max| max.parse().ok())
                    .unwrap_or(250);
                let items: Vec<Json> = matching
                    .iter()
                    .skip(offset)
                    .take(max)
                    .map(|event| (*event).clone())
                    .collect();
                let mut body = json!({"kind": "calendar#events", "items": items});
                if offset + max < matching.len() {
                    body["nextPageToken"] = json!((offset + max).to_string());
                }
                TransportResponse::ok(body)
            }
            (HttpMethod::Get, _, Some(id)) => match self.event(&id) {
                Some(event) => TransportResponse::ok(event.clone()),
                None => not_found(),
            },
            (HttpMethod::Post, EVENTS_PATH, _) => {
                self.created += 1;
                let mut created = request.body.clone().unwrap_or_else(|| json!({}));
                created["id"] = json!(format!("created-{}", self.created));
                created["status"] = json!("confirmed");
                self.events.push(created.clone());
                TransportResponse::ok(created)
            }
            (HttpMethod::Post, "/calendars/primary/events/quickAdd", _) => {
                self.created += 1;
                let created = json!({
                    "id": format!("quick-{}", self.created),
                    "summary": request.query_value("text"),
                    "start": {"dateTime": "2024-05-01T09:00:00Z"},
                    "end": {"dateTime": "2024-05-01T10:00:00Z"},
                });
                self.events.push(created.clone());
                TransportResponse::ok(created)
            }
            (HttpMethod::Patch, _, Some(id)) => {
                self.patches += 1;
                if self.fail_patch_on == Some(self.patches) {
                    return TransportResponse::new(
                        503,
                        json!({"error": {"code": 503, "message": "Backend Error"}}),
                    );
                }
                let Some(index) = self.position(&id) else {
                    return not_found();
                };
                if let Some(patch) = &request.body {
                    merge(&mut self.events[index], patch);
                }
                TransportResponse::ok(self.events[index].clone())
            }
            (HttpMethod::Delete, _, Some(id)) => match self.position(&id) {
                Some(index) => {
                    self.events.remove(index);
                    TransportResponse::new(204, Json::Null)
                }
                None => TransportResponse::new(410, json!({"error": {"code": 410, "message": "Gone"}})),
            },
            _ => not_found(),
        }
    }
}

// ---------------------------------------------------------------------------
// NewSQL query server (Avatica JSON protocol)
// ---------------------------------------------------------------------------

pub struct FakePhoenix {
    /// Rows of SALES.ORDERS as (ID, STATUS, AMOUNT).
    pub orders: Vec<(i64, String, f64)>,
    /// Every SQL statement received by prepareAndExecute.
    pub statements: Vec<String>,
    pub commits: usize,
    pub open_connections: usize,
    pub closed_statements: Vec<i64>,
    /// Number of openConnection calls answered with 503 before succeeding.
    pub unavailable_opens: usize,
    next_statement: i64,
}

impl FakePhoenix {
    pub fn with_orders(count: i64) -> Self {
        Self {
            orders: (1..=count)
                .map(|id| {
                    let status = if id % 2 == 0 { "shipped" } else { "open" };
                    (id, status.to_string(), id as f64 * 2.5)
                })
                .collect(),
            statements: Vec::new(),
            commits: 0,
            open_connections: 0,
            closed_statements: Vec::new(),
            unavailable_opens: 0,
            next_statement: 0,
        }
    }

    fn order_rows(&self) -> Vec<Json> {
        self.orders
            .iter()
            .map(|(id, status, amount)| json!([id, status, amount]))
            .collect()
    }

    fn catalog_rows() -> Vec<Json> {
        vec![
            json!(["SYSTEM", "CATALOG", "TABLE_NAME", 12, 0, 1]),
            json!(["SALES", "ORDERS", "ID", -5, 0, 1]),
            json!(["SALES", "ORDERS", "STATUS", 12, 1, null]),
            json!(["SALES", "ORDERS", "AMOUNT", 3, 1, null]),
        ]
    }

    fn frame(rows: &[Json], offset: usize, size: usize) -> Json {
        let page: Vec<Json> = rows.iter().skip(offset).take(size).cloned().collect();
        json!({
            "offset": offset,
            "done": offset + page.len() >= rows.len(),
            "rows": page,
        })
    }

    fn columns(labels: &[(&str, &str)]) -> Json {
        Json::Array(
            labels
                .iter()
                .map(|(label, type_name)| json!({"label": label, "type": {"name": type_name}}))
                .collect(),
        )
    }

    fn result_set(&self, sql: &str) -> Option<(Json, Vec<Json>)> {
        if sql.contains("FROM SYSTEM.CATALOG WHERE COLUMN_NAME IS NOT NULL") {
            return Some((
                Self::columns(&[
                    ("TABLE_SCHEM", "VARCHAR"),
                    ("TABLE_NAME", "VARCHAR"),
                    ("COLUMN_NAME", "VARCHAR"),
                    ("DATA_TYPE", "INTEGER"),
                    ("NULLABLE", "INTEGER"),
                    ("KEY_SEQ", "SMALLINT"),
                ]),
                Self::catalog_rows(),
            ));
        }
        if sql.starts_with("SELECT DISTINCT TABLE_NAME, TABLE_SCHEM") {
            return Some((
                Self::columns(&[("TABLE_NAME", "VARCHAR"), ("TABLE_SCHEM", "VARCHAR")]),
                vec![json!(["CATALOG", "SYSTEM"]), json!(["ORDERS", "SALES"])],
            ));
        }
        if sql.starts_with("SELECT") && sql.contains("\"ORDERS\"") {
            return Some((
                Self::columns(&[("ID", "BIGINT"), ("STATUS", "VARCHAR"), ("AMOUNT", "DECIMAL")]),
                self.order_rows(),
            ));
        }
        None
    }
}

impl FakeService for FakePhoenix {
    fn handle(&mut self, request: &TransportRequest) -> TransportResponse {
        let body = request.body.clone().unwrap_or(Json::Null);
        match body["request"].as_str().unwrap_or_default() {
            "openConnection" => {
                if self.unavailable_opens > 0 {
                    self.unavailable_opens -= 1;
                    return TransportResponse::new(503, Json::String("starting".to_string()));
                }
                self.open_connections += 1;
                TransportResponse::ok(json!({"response": "openConnection"}))
            }
            "connectionSync" => TransportResponse::ok(json!({
                "response": "connectionSync",
                "connProps": body["connProps"],
            })),
            "createStatement" => {
                self.next_statement += 1;
                TransportResponse::ok(json!({
                    "response": "createStatement",
                    "statementId": self.next_statement,
                }))
            }
            "prepareAndExecute" => {
                let sql = body["sql"].as_str().unwrap_or_default().to_string();
                let statement_id = body["statementId"].as_i64().unwrap_or_default();
                let first = body["maxRowsInFirstFrame"].as_u64().unwrap_or(100) as usize;
                self.statements.push(sql.clone());
                let result = match self.result_set(&sql) {
                    Some((columns, rows)) => json!({
                        "statementId": statement_id,
                        "signature": {"columns": columns},
                        "firstFrame": Self::frame(&rows, 0, first),
                        "updateCount": -1,
                    }),
                    None if sql.starts_with("SELECT") => {
                        return TransportResponse::new(
                            500,
                            json!({
                                "response": "error",
                                "errorMessage": format!("ERROR 1012 (42M03): Table undefined. {sql}"),
                            }),
                        )
                    }
                    None => json!({
                        "statementId": statement_id,
                        "firstFrame": null,
                        "updateCount": 1,
                    }),
                };
                TransportResponse::ok(json!({
                    "response": "executeResults",
                    "results": [result],
                }))
            }
            "fetch" => {
                // Every paged statement in these tests reads SALES.ORDERS.
                let offset = body["offset"].as_u64().unwrap_or(0) as usize;
                let size = body["frameMaxSize"].as_u64().unwrap_or(100) as usize;
                let rows = self.order_rows();
                TransportResponse::ok(json!({
                    "response": "fetch",
                    "frame": Self::frame(&rows, offset, size),
                }))
            }
            "closeStatement" => {
                self.closed_statements
                    .push(body["statementId"].as_i64().unwrap_or_default());
                TransportResponse::ok(json!({"response": "closeStatement"}))
            }
            "commit" => {
                self.commits += 1;
                TransportResponse::ok(json!({"response": "commit"}))
            }
            "closeConnection" => TransportResponse::ok(json!({"response": "closeConnection"})),
            other => TransportResponse::new(
                500,
                json!({"response": "error", "errorMessage": format!("unknown request {other}")}),
            ),
        }
    }
}

pub fn phoenix_params() -> ParameterMap {
    params(json!({"url": "http://127.0.0.1:8765", "autocommit": false}))
}
