//! Static field-mapping dictionary between native JSON fields and columns.
//!
//! Each entry lists native paths in priority order: the first path that is
//! present wins when reading, and only the first path is written when
//! encoding. Columns with no entry map to a top-level field of the same name.

use serde_json::{Map, Value as Json};

use crate::config::EngineKind;
use crate::config::EngineKind::{CalendarService as Cal, FinancialAggregator as Fin};
use crate::row::Row;
use crate::schema::TableDescriptor;
use crate::value::Value;

/// One dictionary entry keyed by (engine kind, table, column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub engine: EngineKind,
    pub table: &'static str,
    pub column: &'static str,
    /// Dotted native paths, primary first.
    pub paths: &'static [&'static str],
}

const fn map(
    engine: EngineKind,
    table: &'static str,
    column: &'static str,
    paths: &'static [&'static str],
) -> FieldMapping {
    FieldMapping {
        engine,
        table,
        column,
        paths,
    }
}

pub static FIELD_MAP: &[FieldMapping] = &[
    map(Fin, "transactions", "id", &["transaction_id"]),
    map(Fin, "transactions", "category", &["personal_finance_category.primary", "category"]),
    map(Fin, "accounts", "current_balance", &["balances.current"]),
    map(Fin, "accounts", "available_balance", &["balances.available"]),
    map(Fin, "accounts", "credit_limit", &["balances.limit"]),
    map(Fin, "accounts", "iso_currency_code", &["balances.iso_currency_code"]),
    map(Cal, "events", "event_id", &["id"]),
    map(Cal, "events", "html_link", &["htmlLink"]),
    map(Cal, "events", "created_at", &["created"]),
    map(Cal, "events", "updated_at", &["updated"]),
    map(Cal, "events", "start_time", &["start.dateTime", "start.date"]),
    map(Cal, "events", "end_time", &["end.dateTime", "end.date"]),
    map(Cal, "events", "timezone", &["start.timeZone"]),
    map(Cal, "events", "organizer", &["organizer.email"]),
    map(Cal, "calendars", "calendar_id", &["id"]),
    map(Cal, "calendars", "time_zone", &["timeZone"]),
    map(Cal, "calendars", "access_role", &["accessRole"]),
];

/// Resolves native paths for the columns of one table.
#[derive(Debug, Clone)]
pub struct FieldResolver {
    engine: EngineKind,
    table: String,
}

impl FieldResolver {
    pub fn new(engine: EngineKind, table: &str) -> Self {
        Self {
            engine,
            table: table.to_string(),
        }
    }

    /// Native paths for `column`, primary first.
    pub fn paths<'a>(&self, column: &'a str) -> Vec<&'a str> {
        FIELD_MAP
            .iter()
            .find(|entry| {
                entry.engine == self.engine && entry.table == self.table && entry.column == column
            })
            .map(|entry| entry.paths.to_vec())
            .unwrap_or_else(|| vec![column])
    }

    /// Reads the first non-null native value for `column`.
    pub fn read<'r>(&self, record: &'r Json, column: &str) -> Option<&'r Json> {
        self.paths(column)
            .into_iter()
            .filter_map(|path| lookup_path(record, path))
            .find(|value| !value.is_null())
    }

    /// Builds a native JSON body from column assignments using primary paths.
    pub fn encode(&self, assignments: &[(String, Value)]) -> Json {
        let mut body = Map::new();
        for (column, value) in assignments {
            let paths = self.paths(column.as_str());
            if let Some(primary) = paths.first() {
                insert_path(&mut body, primary, value.to_json());
            }
        }
        Json::Object(body)
    }

    /// Native field name used when a column is sent as a query parameter.
    pub fn primary_path(&self, column: &str) -> String {
        self.paths(column)
            .first()
            .map(|path| path.to_string())
            .unwrap_or_else(|| column.to_string())
    }
}

/// Follows a dotted path through nested JSON objects.
pub fn lookup_path<'a>(record: &'a Json, path: &str) -> Option<&'a Json> {
    path.split('.')
        .try_fold(record, |current, segment| current.as_object()?.get(segment))
}

fn insert_path(body: &mut Map<String, Json>, path: &str, value: Json) {
    match path.split_once('.') {
        None => {
            body.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = body
                .entry(head.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
            if !child.is_object() {
                *child = Json::Object(Map::new());
            }
            if let Json::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Encodes the writable columns of a materialized row back into native form.
pub fn encode_row(
    resolver: &FieldResolver,
    table: &TableDescriptor,
    row: &Row,
) -> Json {
    let assignments: Vec<(String, Value)> = table
        .columns
        .iter()
        .filter(|column| column.writable)
        .filter_map(|column| {
            row.get(&column.name)
                .map(|value| (column.name.clone(), value.clone()))
        })
        .collect();
    resolver.encode(&assignments)
}
