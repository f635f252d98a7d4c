//! Predicate evaluation and native parameter accumulation.
//!
//! Pushed-down predicates fold into [`NativeParams`]: equalities must agree,
//! lower bounds keep the greatest value and upper bounds the smallest. A
//! contradiction marks the whole plan unsatisfiable so no request is issued.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::descriptor::{Comparison, Predicate};
use crate::row::Row;
use crate::value::Value;

/// Native request parameters derived from pushed-down predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeParams {
    values: BTreeMap<String, Value>,
    unsatisfiable: bool,
}

impl NativeParams {
    pub fn get(&self, param: &str) -> Option<&Value> {
        self.values.get(param)
    }

    pub fn contains(&self, param: &str) -> bool {
        self.values.contains_key(param)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.unsatisfiable
    }

    pub fn set_equals(&mut self, param: &str, value: Value) {
        match self.values.get(param) {
            Some(existing) if existing.compare(&value) != Some(Ordering::Equal) => {
                self.unsatisfiable = true;
            }
            Some(_) => {}
            None => {
                self.values.insert(param.to_string(), value);
            }
        }
    }

    pub fn tighten_lower(&mut self, param: &str, value: Value) {
        self.tighten(param, value, Ordering::Greater);
    }

    pub fn tighten_upper(&mut self, param: &str, value: Value) {
        self.tighten(param, value, Ordering::Less);
    }

    /// Marks the plan empty when a paired lower bound exceeds its upper bound.
    pub fn check_interval(&mut self, lower: &str, upper: &str) {
        if let (Some(low), Some(high)) = (self.values.get(lower), self.values.get(upper)) {
            if low.compare(high) == Some(Ordering::Greater) {
                self.unsatisfiable = true;
            }
        }
    }

    fn tighten(&mut self, param: &str, value: Value, keep_when: Ordering) {
        match self.values.get_mut(param) {
            Some(existing) => {
                if value.compare(existing) == Some(keep_when) {
                    *existing = value;
                }
            }
            None => {
                self.values.insert(param.to_string(), value);
            }
        }
    }
}

/// Counts of pushdown decisions for one translated query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushdownSummary {
    pub exact: usize,
    pub inexact: usize,
    pub unsupported: usize,
}

impl Predicate {
    /// Evaluates this predicate against one value. Comparisons with null are false.
    pub fn matches(&self, value: &Value) -> bool {
        let ordering = |literal: &Value| value.compare(literal);
        match &self.comparison {
            Comparison::Eq(literal) => ordering(literal) == Some(Ordering::Equal),
            Comparison::NotEq(literal) => {
                matches!(ordering(literal), Some(Ordering::Less | Ordering::Greater))
            }
            Comparison::Lt(literal) => ordering(literal) == Some(Ordering::Less),
            Comparison::LtEq(literal) => {
                matches!(ordering(literal), Some(Ordering::Less | Ordering::Equal))
            }
            Comparison::Gt(literal) => ordering(literal) == Some(Ordering::Greater),
            Comparison::GtEq(literal) => {
                matches!(ordering(literal), Some(Ordering::Greater | Ordering::Equal))
            }
            Comparison::Range { low, high } => {
                matches!(ordering(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(ordering(high), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

/// Returns `true` when `row` satisfies every residual predicate.
pub fn row_matches(row: &Row, residual: &[Predicate]) -> bool {
    residual.iter().all(|predicate| {
        row.get(&predicate.column)
            .map(|value| predicate.matches(value))
            .unwrap_or(false)
    })
}
