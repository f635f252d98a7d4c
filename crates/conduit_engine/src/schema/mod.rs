//! Table Schema Registry: static virtual-table contracts per handler.
//!
//! A [`TableDescriptor`] is immutable once registered and shared read-only by
//! every query against its handler. Pushdown behaviour is declared as data
//! ([`PushdownRule`]) so the translator stays generic across handlers.

mod fields;
mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::OrderBy;

pub use fields::{encode_row, lookup_path, FieldMapping, FieldResolver, FIELD_MAP};
pub(crate) use registry::discovered_table;
pub use registry::{builtin_tables, SchemaRegistry};

/// Semantic type of a virtual column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Int,
    Float,
    Bool,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a virtual table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    /// Column may appear in a predicate.
    pub filterable: bool,
    /// Column may appear in INSERT/UPDATE assignments.
    pub writable: bool,
    /// INSERT must assign a non-null value.
    pub required_on_insert: bool,
    /// Materialization fails when a non-nullable column's source is absent.
    pub nullable: bool,
    /// Parameter columns carry a native parameter and never appear in rows.
    pub visible: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            filterable: false,
            writable: false,
            required_on_insert: false,
            nullable: true,
            visible: true,
        }
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn required_on_insert(mut self) -> Self {
        self.writable = true;
        self.required_on_insert = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks a filter-only column that maps straight onto a native parameter.
    pub fn parameter(mut self) -> Self {
        self.filterable = true;
        self.visible = false;
        self
    }
}

/// How predicates on one column become native request parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamBinding {
    /// `column = value` sets `param`.
    Equals { param: String, exact: bool },
    /// Comparisons set inclusive lower/upper bound parameters.
    Bounds {
        lower: Option<String>,
        upper: Option<String>,
        exact: bool,
    },
}

/// Declares that predicates on `column` can be pushed into native parameters.
///
/// `exact == false` means the native parameter selects a superset; the
/// predicate is then kept as a residual filter as well.
#[derive(Debug, Clone, PartialEq)]
pub struct PushdownRule {
    pub column: String,
    pub binding: ParamBinding,
}

impl PushdownRule {
    pub fn equals(column: impl Into<String>, param: impl Into<String>, exact: bool) -> Self {
        Self {
            column: column.into(),
            binding: ParamBinding::Equals {
                param: param.into(),
                exact,
            },
        }
    }

    pub fn bounds(
        column: impl Into<String>,
        lower: Option<&str>,
        upper: Option<&str>,
        exact: bool,
    ) -> Self {
        Self {
            column: column.into(),
            binding: ParamBinding::Bounds {
                lower: lower.map(str::to_string),
                upper: upper.map(str::to_string),
                exact,
            },
        }
    }
}

/// Server-side ordering support of a table.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeOrdering {
    #[default]
    Unsupported,
    /// Any column in either direction (query-language backends).
    Any,
    /// Only the listed column/direction pairs.
    Only(Vec<OrderBy>),
}

impl NativeOrdering {
    pub fn supports(&self, order: &OrderBy) -> bool {
        match self {
            Self::Unsupported => false,
            Self::Any => true,
            Self::Only(allowed) => allowed.iter().any(|candidate| candidate == order),
        }
    }
}

/// What the backing service can do natively for one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableCapabilities {
    /// A total row limit can be sent with the request.
    pub native_limit: bool,
    /// Every predicate is rendered natively (query-language backends).
    pub native_predicates: bool,
    pub native_ordering: NativeOrdering,
    /// UPDATE/DELETE by predicate is one native statement.
    pub native_bulk_mutation: bool,
    /// UPDATE/DELETE without predicates is allowed.
    pub unguarded_mutation: bool,
    pub insertable: bool,
    pub updatable: bool,
    pub deletable: bool,
}

/// Immutable contract of one virtual table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub name: String,
    /// Native resource the adapter fetches and mutates.
    pub resource: String,
    pub description: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Columns identifying one native resource; the first is used for per-resource calls.
    pub primary_key: Vec<String>,
    pub pushdown: Vec<PushdownRule>,
    /// Native parameters every query must set.
    pub required_params: Vec<String>,
    pub capabilities: TableCapabilities,
    /// Page size requested from the service when the engine default is unset.
    pub page_size: usize,
    /// Largest page the service accepts.
    pub max_page_size: usize,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        resource: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            description: String::new(),
            columns,
            primary_key: Vec::new(),
            pushdown: Vec::new(),
            required_params: Vec::new(),
            capabilities: TableCapabilities::default(),
            page_size: 100,
            max_page_size: 100,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|column| column.to_string()).collect();
        self
    }

    pub fn with_pushdown(mut self, rule: PushdownRule) -> Self {
        self.pushdown.push(rule);
        self
    }

    pub fn with_required_params(mut self, params: &[&str]) -> Self {
        self.required_params = params.iter().map(|param| param.to_string()).collect();
        self
    }

    pub fn with_capabilities(mut self, capabilities: TableCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_page_size(mut self, page_size: usize, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self.page_size = page_size.clamp(1, self.max_page_size);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Columns materialized into rows, in declaration order.
    pub fn visible_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|column| column.visible)
    }

    pub fn pushdown_rule(&self, column: &str) -> Option<&PushdownRule> {
        self.pushdown.iter().find(|rule| rule.column == column)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.primary_key.first().map(String::as_str)
    }

    pub fn is_writable(&self) -> bool {
        let caps = &self.capabilities;
        caps.insertable || caps.updatable || caps.deletable
    }
}
