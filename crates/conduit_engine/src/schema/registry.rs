use std::sync::Arc;

use crate::config::EngineKind;
use crate::descriptor::OrderBy;
use crate::error::{HandlerError, HandlerResult};
use crate::schema::{
    ColumnDescriptor, ColumnType, NativeOrdering, PushdownRule, TableCapabilities,
    TableDescriptor,
};

/// Per-connection set of virtual tables.
///
/// Tables are registered once (builtins at construction, discovered tables
/// during connect) and handed out as shared immutable descriptors.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: Vec<Arc<TableDescriptor>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the static tables of `kind`.
    pub fn for_kind(kind: EngineKind) -> Self {
        Self {
            tables: builtin_tables(kind).into_iter().map(Arc::new).collect(),
        }
    }

    pub fn register(&mut self, table: TableDescriptor) -> HandlerResult<()> {
        if self.tables.iter().any(|existing| existing.name == table.name) {
            return Err(HandlerError::configuration(format!(
                "table '{}' is already registered",
                table.name
            )));
        }
        self.tables.push(Arc::new(table));
        Ok(())
    }

    /// Looks a table up by exact name, then case-insensitively.
    pub fn get(&self, name: &str) -> HandlerResult<Arc<TableDescriptor>> {
        self.tables
            .iter()
            .find(|table| table.name == name)
            .or_else(|| {
                self.tables
                    .iter()
                    .find(|table| table.name.eq_ignore_ascii_case(name))
            })
            .cloned()
            .ok_or_else(|| HandlerError::validation(format!("unknown table '{name}'")))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableDescriptor>> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Static tables shipped for each engine kind. NewSQL tables are discovered.
pub fn builtin_tables(kind: EngineKind) -> Vec<TableDescriptor> {
    match kind {
        EngineKind::FinancialAggregator => vec![transactions_table(), accounts_table()],
        EngineKind::CalendarService => vec![events_table(), calendars_table()],
        EngineKind::NewSqlDatabase => Vec::new(),
    }
}

fn col(name: &str, column_type: ColumnType) -> ColumnDescriptor {
    ColumnDescriptor::new(name, column_type).filterable()
}

fn transactions_table() -> TableDescriptor {
    use ColumnType::*;
    TableDescriptor::new(
        "transactions",
        "transactions",
        vec![
            col("id", Text).not_null(),
            col("account_id", Text).not_null(),
            col("amount", Float).not_null(),
            col("iso_currency_code", Text),
            col("date", Date).not_null(),
            col("authorized_date", Date),
            col("name", Text),
            col("merchant_name", Text),
            col("payment_channel", Text),
            col("pending", Bool),
            col("category", Text),
            ColumnDescriptor::new("start_date", Date).parameter(),
            ColumnDescriptor::new("end_date", Date).parameter(),
        ],
    )
    .with_description("Posted and pending transactions of the linked item.")
    .with_primary_key(&["id"])
    .with_pushdown(PushdownRule::equals("account_id", "account_ids", true))
    .with_pushdown(PushdownRule::bounds(
        "date",
        Some("start_date"),
        Some("end_date"),
        true,
    ))
    .with_pushdown(PushdownRule::bounds("start_date", Some("start_date"), None, true))
    .with_pushdown(PushdownRule::bounds("end_date", None, Some("end_date"), true))
    .with_required_params(&["start_date", "end_date"])
    .with_capabilities(TableCapabilities {
        native_ordering: NativeOrdering::Only(vec![OrderBy::desc("date")]),
        ..TableCapabilities::default()
    })
    .with_page_size(100, 500)
}

fn accounts_table() -> TableDescriptor {
    use ColumnType::*;
    TableDescriptor::new(
        "accounts",
        "accounts",
        vec![
            col("account_id", Text).not_null(),
            col("name", Text),
            col("official_name", Text),
            col("type", Text),
            col("subtype", Text),
            col("mask", Text),
            col("current_balance", Float),
            col("available_balance", Float),
            col("credit_limit", Float),
            col("iso_currency_code", Text),
        ],
    )
    .with_description("Accounts of the linked item with real-time balances.")
    .with_primary_key(&["account_id"])
    .with_pushdown(PushdownRule::equals("account_id", "account_ids", true))
    .with_page_size(500, 500)
}

fn events_table() -> TableDescriptor {
    use ColumnType::*;
    TableDescriptor::new(
        "events",
        "events",
        vec![
            col("event_id", Text).not_null(),
            col("summary", Text).writable(),
            col("description", Text).writable(),
            col("location", Text).writable(),
            col("status", Text),
            col("html_link", Text),
            col("created_at", Timestamp),
            col("updated_at", Timestamp),
            col("start_time", Timestamp).required_on_insert().not_null(),
            col("end_time", Timestamp).required_on_insert().not_null(),
            col("timezone", Text),
            col("organizer", Text),
        ],
    )
    .with_description("Events of the configured calendar, recurring events expanded.")
    .with_primary_key(&["event_id"])
    .with_pushdown(PushdownRule::equals("summary", "q", false))
    .with_pushdown(PushdownRule::bounds("updated_at", Some("updatedMin"), None, true))
    .with_pushdown(PushdownRule::bounds(
        "start_time",
        Some("timeMin"),
        Some("timeMax"),
        false,
    ))
    .with_pushdown(PushdownRule::bounds(
        "end_time",
        Some("timeMin"),
        Some("timeMax"),
        false,
    ))
    .with_capabilities(TableCapabilities {
        native_ordering: NativeOrdering::Only(vec![OrderBy::asc("start_time")]),
        insertable: true,
        updatable: true,
        deletable: true,
        ..TableCapabilities::default()
    })
    .with_page_size(250, 2500)
}

fn calendars_table() -> TableDescriptor {
    use ColumnType::*;
    TableDescriptor::new(
        "calendars",
        "calendarList",
        vec![
            col("calendar_id", Text).not_null(),
            col("summary", Text),
            col("description", Text),
            col("time_zone", Text),
            col("access_role", Text),
            col("primary", Bool),
        ],
    )
    .with_description("Calendars visible to the authenticated user.")
    .with_primary_key(&["calendar_id"])
    .with_page_size(250, 250)
}

/// Builds the descriptor of a table discovered in a NewSQL catalog.
///
/// Every column is filterable and writable; predicates, ordering, limits and
/// bulk mutations are all rendered into SQL. Primary key columns must be
/// supplied on INSERT.
pub(crate) fn discovered_table(
    name: &str,
    columns: Vec<(String, ColumnType, bool)>,
    primary_key: Vec<String>,
) -> TableDescriptor {
    let columns = columns
        .into_iter()
        .map(|(column, column_type, nullable)| {
            let mut descriptor = ColumnDescriptor::new(column, column_type)
                .filterable()
                .writable();
            if primary_key.contains(&descriptor.name) {
                descriptor = descriptor.required_on_insert();
            }
            if nullable {
                descriptor
            } else {
                descriptor.not_null()
            }
        })
        .collect();
    let mut table = TableDescriptor::new(name, name, columns)
        .with_capabilities(TableCapabilities {
            native_limit: true,
            native_predicates: true,
            native_ordering: NativeOrdering::Any,
            native_bulk_mutation: true,
            unguarded_mutation: true,
            insertable: true,
            updatable: true,
            deletable: true,
        })
        .with_page_size(1000, 10_000);
    table.primary_key = primary_key;
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParamBinding;

    #[test]
    fn transactions_require_date_bounds() {
        let registry = SchemaRegistry::for_kind(EngineKind::FinancialAggregator);
        let table = registry.get("transactions").expect("builtin");
        assert_eq!(table.required_params, vec!["start_date", "end_date"]);
        assert!(!table.column("start_date").expect("column").visible);
        assert!(matches!(
            table.pushdown_rule("date").map(|rule| &rule.binding),
            Some(ParamBinding::Bounds { exact: true, .. })
        ));
    }

    #[test]
    fn events_insert_contract() {
        let table = SchemaRegistry::for_kind(EngineKind::CalendarService)
            .get("EVENTS")
            .expect("case-insensitive lookup");
        let required: Vec<_> = table
            .columns
            .iter()
            .filter(|column| column.required_on_insert)
            .map(|column| column.name.as_str())
            .collect();
        assert_eq!(required, vec!["start_time", "end_time"]);
        assert_eq!(table.identifier(), Some("event_id"));
    }

    #[test]
    fn registering_twice_fails() {
        let mut registry = SchemaRegistry::new();
        let table = discovered_table(
            "ORDERS",
            vec![("ID".to_string(), ColumnType::Int, false)],
            vec!["ID".to_string()],
        );
        registry.register(table.clone()).expect("first registration");
        assert!(registry.register(table).is_err());
        assert!(registry.get("missing").is_err());
    }
}
