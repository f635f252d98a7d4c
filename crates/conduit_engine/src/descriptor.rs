//! Already-parsed statements handed to a connection by the SQL engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison of one predicate. `Range` is inclusive on both ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(Value),
    NotEq(Value),
    Lt(Value),
    LtEq(Value),
    Gt(Value),
    GtEq(Value),
    Range { low: Value, high: Value },
}

impl Comparison {
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Eq(_) => "=",
            Self::NotEq(_) => "!=",
            Self::Lt(_) => "<",
            Self::LtEq(_) => "<=",
            Self::Gt(_) => ">",
            Self::GtEq(_) => ">=",
            Self::Range { .. } => "range",
        }
    }
}

/// `column <op> literal`; a query's predicates are conjunctive.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub comparison: Comparison,
}

impl Predicate {
    pub fn new(column: impl Into<String>, comparison: Comparison) -> Self {
        Self {
            column: column.into(),
            comparison,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Comparison::Eq(value.into()))
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Comparison::NotEq(value.into()))
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Comparison::Lt(value.into()))
    }

    pub fn lt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Comparison::LtEq(value.into()))
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Comparison::Gt(value.into()))
    }

    pub fn gt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Comparison::GtEq(value.into()))
    }

    pub fn range(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::new(
            column,
            Comparison::Range {
                low: low.into(),
                high: high.into(),
            },
        )
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comparison {
            Comparison::Range { low, high } => {
                write!(f, "{} BETWEEN {low} AND {high}", self.column)
            }
            Comparison::Eq(value)
            | Comparison::NotEq(value)
            | Comparison::Lt(value)
            | Comparison::LtEq(value)
            | Comparison::Gt(value)
            | Comparison::GtEq(value) => {
                write!(f, "{} {} {value}", self.column, self.comparison.operator())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A SELECT against one virtual table.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub table: String,
    /// Requested columns; empty selects every visible column.
    pub columns: Vec<String>,
    pub predicates: Vec<Predicate>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl QueryDescriptor {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            predicates: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// An INSERT, UPDATE, or DELETE against one virtual table.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationDescriptor {
    pub kind: MutationKind,
    pub table: String,
    /// Column assignments; INSERT values or UPDATE SET list.
    pub assignments: Vec<(String, Value)>,
    pub predicates: Vec<Predicate>,
}

impl MutationDescriptor {
    fn new(kind: MutationKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            assignments: Vec::new(),
            predicates: Vec::new(),
        }
    }

    pub fn insert(table: impl Into<String>) -> Self {
        Self::new(MutationKind::Insert, table)
    }

    pub fn update(table: impl Into<String>) -> Self {
        Self::new(MutationKind::Update, table)
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(MutationKind::Delete, table)
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }
}

/// A named native operation with keyword arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCallDescriptor {
    pub operation: String,
    pub args: BTreeMap<String, Value>,
}

impl NativeCallDescriptor {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}
