//! Calendar service adapter (Google Calendar v3 style REST API).

use serde_json::Value as Json;

use super::{text_arg, Exchange, NativePage, NativeRecord, NativeRequest, PageCursor, WriteOutcome};
use crate::config::CalendarConfig;
use crate::descriptor::{NativeCallDescriptor, SortDirection};
use crate::error::{HandlerError, HandlerResult};
use crate::passthrough::NativeOperation;
use crate::schema::TableDescriptor;
use crate::transport::{HttpMethod, TransportRequest};
use crate::value::Value;

pub(super) static OPERATIONS: &[NativeOperation] = &[
    NativeOperation {
        name: "list_events",
        required: &[],
        optional: &["time_min", "time_max", "q", "max_results"],
        description: "One page of events, recurring events expanded.",
    },
    NativeOperation {
        name: "get_event",
        required: &["event_id"],
        optional: &[],
        description: "A single event by identifier.",
    },
    NativeOperation {
        name: "list_calendars",
        required: &[],
        optional: &[],
        description: "Calendars visible to the authenticated user.",
    },
    NativeOperation {
        name: "quick_add",
        required: &["text"],
        optional: &[],
        description: "Creates an event from a free-text description.",
    },
];

#[derive(Debug)]
pub struct CalendarAdapter {
    config: CalendarConfig,
    token: String,
}

impl CalendarAdapter {
    pub fn new(config: CalendarConfig, token: String) -> Self {
        Self { config, token }
    }

    fn request(&self, method: HttpMethod, path: String) -> TransportRequest {
        TransportRequest::new(method, path)
            .with_header("Authorization", format!("Bearer {}", self.token))
    }

    fn events_path(&self) -> String {
        format!("/calendars/{}/events", encode_segment(&self.config.calendar_id))
    }

    fn event_path(&self, id: &Value) -> String {
        format!("{}/{}", self.events_path(), encode_segment(&id.to_string()))
    }

    pub(super) async fn authenticate(&mut self, exchange: &Exchange) -> HandlerResult<()> {
        let path = format!("/calendars/{}", encode_segment(&self.config.calendar_id));
        exchange
            .call_json("calendars_get", self.request(HttpMethod::Get, path))
            .await
            .map(|_| ())
    }

    pub(super) async fn fetch_page(
        &mut self,
        exchange: &Exchange,
        request: &NativeRequest,
        cursor: &PageCursor,
        page_size: usize,
    ) -> HandlerResult<NativePage> {
        let (label, mut transport_request) = match request.resource.as_str() {
            "events" => {
                let mut events = self
                    .request(HttpMethod::Get, self.events_path())
                    .with_query("singleEvents", "true");
                // timeMin/timeMax are exclusive on end/start; widen by one second.
                if let Some(lower) = request.params.get("timeMin") {
                    events = events.with_query("timeMin", shifted_rfc3339(lower, -1));
                }
                if let Some(upper) = request.params.get("timeMax") {
                    events = events.with_query("timeMax", shifted_rfc3339(upper, 1));
                }
                if let Some(updated) = request.params.get("updatedMin") {
                    events = events.with_query("updatedMin", shifted_rfc3339(updated, 0));
                }
                if let Some(text) = request.params.get("q") {
                    events = events.with_query("q", text.to_string());
                }
                if matches!(&request.order, Some(order)
                    if order.column == "start_time" && order.direction == SortDirection::Asc)
                {
                    events = events.with_query("orderBy", "startTime");
                }
                ("events_list", events)
            }
            "calendarList" => (
                "calendar_list",
                self.request(HttpMethod::Get, "/users/me/calendarList".to_string()),
            ),
            other => {
                return Err(HandlerError::validation(format!(
                    "calendar service has no resource '{other}'"
                )))
            }
        };
        transport_request = transport_request.with_query("maxResults", page_size.to_string());
        match cursor {
            PageCursor::Start => {}
            PageCursor::Token(token) => {
                transport_request = transport_request.with_query("pageToken", token.clone());
            }
            other => {
                return Err(HandlerError::validation(format!(
                    "{} cannot resume from {other:?}",
                    request.resource
                )))
            }
        }
        let response = exchange.call_json(label, transport_request).await?;
        page_from(response)
    }

    pub(super) async fn create(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        record: &NativeRecord,
    ) -> HandlerResult<Option<String>> {
        ensure_events(table)?;
        let request = self
            .request(HttpMethod::Post, self.events_path())
            .with_body(record.body.clone());
        let created = exchange.call_json("events_insert", request).await?;
        Ok(created.get("id").and_then(Json::as_str).map(str::to_string))
    }

    pub(super) async fn update(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        id: &Value,
        record: &NativeRecord,
    ) -> HandlerResult<WriteOutcome> {
        ensure_events(table)?;
        let request = self
            .request(HttpMethod::Patch, self.event_path(id))
            .with_body(record.body.clone());
        let response = exchange.call("events_patch", request).await?;
        if matches!(response.status, 404 | 410) {
            return Ok(WriteOutcome::NotFound);
        }
        response.into_success().map(|_| WriteOutcome::Applied)
    }

    pub(super) async fn delete(
        &mut self,
        exchange: &Exchange,
        table: &TableDescriptor,
        id: &Value,
    ) -> HandlerResult<WriteOutcome> {
        ensure_events(table)?;
        let request = self.request(HttpMethod::Delete, self.event_path(id));
        let response = exchange.call("events_delete", request).await?;
        if matches!(response.status, 404 | 410) {
            return Ok(WriteOutcome::NotFound);
        }
        response.into_success().map(|_| WriteOutcome::Applied)
    }

    pub(super) async fn native_call(
        &mut self,
        exchange: &Exchange,
        call: &NativeCallDescriptor,
    ) -> HandlerResult<Vec<Json>> {
        match call.operation.as_str() {
            "list_events" => {
                let mut request = self
                    .request(HttpMethod::Get, self.events_path())
                    .with_query("singleEvents", "true");
                for (arg, param) in [
                    ("time_min", "timeMin"),
                    ("time_max", "timeMax"),
                    ("q", "q"),
                    ("max_results", "maxResults"),
                ] {
                    if let Some(value) = call.args.get(arg).filter(|value| !value.is_null()) {
                        request = request.with_query(param, value.to_string());
                    }
                }
                Ok(page_from(exchange.call_json("events_list", request).await?)?.records)
            }
            "get_event" => {
                let id = Value::Text(text_arg(call, "event_id")?);
                let request = self.request(HttpMethod::Get, self.event_path(&id));
                Ok(vec![exchange.call_json("events_get", request).await?])
            }
            "list_calendars" => {
                let request =
                    self.request(HttpMethod::Get, "/users/me/calendarList".to_string());
                Ok(page_from(exchange.call_json("calendar_list", request).await?)?.records)
            }
            "quick_add" => {
                let request = self
                    .request(HttpMethod::Post, format!("{}/quickAdd", self.events_path()))
                    .with_query("text", text_arg(call, "text")?);
                Ok(vec![exchange.call_json("events_quick_add", request).await?])
            }
            other => Err(HandlerError::UnknownOperation {
                engine: "calendar-service".to_string(),
                operation: other.to_string(),
            }),
        }
    }
}

fn ensure_events(table: &TableDescriptor) -> HandlerResult<()> {
    if table.resource == "events" {
        Ok(())
    } else {
        Err(HandlerError::validation(format!(
            "table '{}' is read-only",
            table.name
        )))
    }
}

fn page_from(response: Json) -> HandlerResult<NativePage> {
    let records = match response.get("items") {
        Some(Json::Array(items)) => items.clone(),
        // An empty result omits `items` entirely.
        None | Some(Json::Null) => Vec::new(),
        Some(_) => return Err(HandlerError::malformed("'items' is not an array")),
    };
    let next = response
        .get("nextPageToken")
        .and_then(Json::as_str)
        .filter(|token| !token.is_empty())
        .map(|token| PageCursor::Token(token.to_string()));
    Ok(NativePage { records, next })
}

/// RFC 3339 rendering of a temporal bound shifted by `seconds`.
fn shifted_rfc3339(value: &Value, seconds: i64) -> String {
    match value.clone().cast(crate::schema::ColumnType::Timestamp, true) {
        Ok(Value::Timestamp(ts)) => {
            Value::Timestamp(ts + chrono::Duration::seconds(seconds)).to_string()
        }
        _ => value.to_string(),
    }
}

/// Percent-encodes one URL path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(encode_segment("team@group.calendar"), "team%40group.calendar");
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn bounds_widen_by_one_second() {
        let bound = Value::from("2024-01-02T10:00:00Z");
        assert_eq!(shifted_rfc3339(&bound, -1), "2024-01-02T09:59:59Z");
        assert_eq!(shifted_rfc3339(&bound, 1), "2024-01-02T10:00:01Z");
    }

    #[test]
    fn missing_items_is_an_empty_last_page() {
        let page = page_from(serde_json::json!({"kind": "calendar#events"})).expect("page");
        assert!(page.records.is_empty());
        assert_eq!(page.next, None);
    }
}
