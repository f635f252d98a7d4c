//! Query translator: relational descriptors to native request plans.
//!
//! Each predicate is classified against the table's pushdown rules:
//! - exact: native parameters express it completely;
//! - inexact: a native superset is requested and the predicate stays residual;
//! - unsupported: evaluated client-side only.
//!
//! Required native parameters are checked after pushdown, before any call.

use std::sync::Arc;

use tracing::debug;

use crate::adapter::NativeRequest;
use crate::descriptor::{Comparison, OrderBy, Predicate, QueryDescriptor};
use crate::error::{HandlerError, HandlerResult};
use crate::predicates::{NativeParams, PushdownSummary};
use crate::schema::{ColumnDescriptor, ParamBinding, TableDescriptor};
use crate::settings::EngineSettings;
use crate::value::Value;

/// Executable plan for one query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub table: Arc<TableDescriptor>,
    /// Native fetch sequence; empty when no row can match.
    pub requests: Vec<NativeRequest>,
    /// Predicates re-checked on every materialized row.
    pub residual: Vec<Predicate>,
    /// Output columns in order.
    pub projection: Vec<String>,
    pub limit: Option<usize>,
    /// Ordering emulated by buffering, when the service cannot sort.
    pub client_order: Option<OrderBy>,
    pub page_size: usize,
    pub pushdown: PushdownSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pushdown {
    Exact,
    Inexact,
    Unsupported,
}

impl Pushdown {
    fn from_exact(exact: bool) -> Self {
        if exact {
            Self::Exact
        } else {
            Self::Inexact
        }
    }
}

/// Translates `query` against `table`.
pub fn translate(
    table: &Arc<TableDescriptor>,
    query: &QueryDescriptor,
    settings: &EngineSettings,
) -> HandlerResult<QueryPlan> {
    let projection = resolve_projection(table, &query.columns)?;
    let native_predicates = table.capabilities.native_predicates;

    let mut params = NativeParams::default();
    let mut filters = Vec::new();
    let mut residual = Vec::new();
    let mut summary = PushdownSummary::default();
    let mut contradiction = false;

    for predicate in &query.predicates {
        let column = filterable_column(table, &predicate.column)?;
        let predicate = cast_predicate(predicate, column, native_predicates)?;
        if comparison_literals(&predicate.comparison)
            .iter()
            .any(|literal| literal.is_null())
        {
            // Comparisons with null select nothing.
            contradiction = true;
        }

        let decision = if native_predicates {
            filters.push(predicate.clone());
            Pushdown::Exact
        } else if !column.visible {
            push_parameter(table, &predicate, &mut params)?;
            Pushdown::Exact
        } else {
            push_visible(table, &predicate, &mut params)
        };
        match decision {
            Pushdown::Exact => summary.exact += 1,
            Pushdown::Inexact => {
                summary.inexact += 1;
                residual.push(predicate);
            }
            Pushdown::Unsupported => {
                summary.unsupported += 1;
                residual.push(predicate);
            }
        }
    }

    for rule in &table.pushdown {
        if let ParamBinding::Bounds {
            lower: Some(lower),
            upper: Some(upper),
            ..
        } = &rule.binding
        {
            params.check_interval(lower, upper);
        }
    }

    if let Some(missing) = table
        .required_params
        .iter()
        .find(|param| !params.contains(param))
    {
        return Err(HandlerError::MissingRequiredFilter {
            table: table.name.clone(),
            parameter: missing.clone(),
        });
    }

    let (native_order, client_order) = match &query.order {
        None => (None, None),
        Some(order) => {
            match table.column(&order.column) {
                Some(column) if column.visible => {}
                _ => {
                    return Err(HandlerError::validation(format!(
                        "cannot order '{}' by unknown column '{}'",
                        table.name, order.column
                    )))
                }
            }
            if table.capabilities.native_ordering.supports(order) {
                (Some(order.clone()), None)
            } else {
                match query.limit {
                    Some(limit) if limit <= settings.max_client_sort_limit => {
                        (None, Some(order.clone()))
                    }
                    _ => {
                        return Err(HandlerError::Unsupported(format!(
                            "'{}' cannot be ordered by {} natively; add a LIMIT of at most {} to sort client-side",
                            table.name, order.column, settings.max_client_sort_limit
                        )))
                    }
                }
            }
        }
    };

    let native_limit = (table.capabilities.native_limit
        && residual.is_empty()
        && client_order.is_none())
    .then_some(query.limit)
    .flatten();

    let satisfiable = !contradiction && !params.is_unsatisfiable() && query.limit != Some(0);
    let requests = if satisfiable {
        vec![NativeRequest {
            table: table.name.clone(),
            resource: table.resource.clone(),
            params,
            filters,
            columns: if native_predicates {
                table
                    .visible_columns()
                    .map(|column| column.name.clone())
                    .collect()
            } else {
                Vec::new()
            },
            order: native_order,
            limit: native_limit,
        }]
    } else {
        Vec::new()
    };

    debug!(
        table = %table.name,
        exact = summary.exact,
        inexact = summary.inexact,
        unsupported = summary.unsupported,
        requests = requests.len(),
        client_sort = client_order.is_some(),
        "translated query"
    );

    Ok(QueryPlan {
        table: Arc::clone(table),
        requests,
        residual,
        projection,
        limit: query.limit,
        client_order,
        page_size: settings.page_size_for(table.page_size, table.max_page_size),
        pushdown: summary,
    })
}

/// Checks and casts predicates rendered verbatim into a native statement.
pub(crate) fn bind_predicates(
    table: &TableDescriptor,
    predicates: &[Predicate],
) -> HandlerResult<Vec<Predicate>> {
    predicates
        .iter()
        .map(|predicate| {
            let column = filterable_column(table, &predicate.column)?;
            cast_predicate(predicate, column, true)
        })
        .collect()
}

fn resolve_projection(table: &TableDescriptor, requested: &[String]) -> HandlerResult<Vec<String>> {
    if requested.is_empty() {
        return Ok(table
            .visible_columns()
            .map(|column| column.name.clone())
            .collect());
    }
    requested
        .iter()
        .map(|name| match table.column(name) {
            Some(column) if column.visible => Ok(column.name.clone()),
            Some(_) => Err(HandlerError::validation(format!(
                "column '{name}' of '{}' is filter-only and cannot be selected",
                table.name
            ))),
            None => Err(HandlerError::validation(format!(
                "unknown column '{name}' in '{}'",
                table.name
            ))),
        })
        .collect()
}

fn filterable_column<'t>(
    table: &'t TableDescriptor,
    name: &str,
) -> HandlerResult<&'t ColumnDescriptor> {
    match table.column(name) {
        Some(column) if column.filterable => Ok(column),
        Some(_) => Err(HandlerError::validation(format!(
            "column '{name}' of '{}' cannot be filtered",
            table.name
        ))),
        None => Err(HandlerError::validation(format!(
            "unknown column '{name}' in '{}'",
            table.name
        ))),
    }
}

/// Coerces predicate literals to the column type.
///
/// Query-language backends need exact types; elsewhere numbers compared with
/// text columns stay numeric so they compare numerically.
fn cast_predicate(
    predicate: &Predicate,
    column: &ColumnDescriptor,
    strict: bool,
) -> HandlerResult<Predicate> {
    let cast = |value: &Value| {
        value.clone().cast(column.column_type, strict).map_err(|detail| {
            HandlerError::validation(format!("predicate on '{}': {detail}", column.name))
        })
    };
    let comparison = match &predicate.comparison {
        Comparison::Eq(value) => Comparison::Eq(cast(value)?),
        Comparison::NotEq(value) => Comparison::NotEq(cast(value)?),
        Comparison::Lt(value) => Comparison::Lt(cast(value)?),
        Comparison::LtEq(value) => Comparison::LtEq(cast(value)?),
        Comparison::Gt(value) => Comparison::Gt(cast(value)?),
        Comparison::GtEq(value) => Comparison::GtEq(cast(value)?),
        Comparison::Range { low, high } => Comparison::Range {
            low: cast(low)?,
            high: cast(high)?,
        },
    };
    Ok(Predicate::new(column.name.clone(), comparison))
}

fn comparison_literals(comparison: &Comparison) -> Vec<&Value> {
    match comparison {
        Comparison::Eq(value)
        | Comparison::NotEq(value)
        | Comparison::Lt(value)
        | Comparison::LtEq(value)
        | Comparison::Gt(value)
        | Comparison::GtEq(value) => vec![value],
        Comparison::Range { low, high } => vec![low, high],
    }
}

/// Parameter columns carry a native bound directly and accept only
/// `=`, `>=`, `<=` and `range` onto the bounds they declare.
fn push_parameter(
    table: &TableDescriptor,
    predicate: &Predicate,
    params: &mut NativeParams,
) -> HandlerResult<()> {
    let reject = || {
        HandlerError::validation(format!(
            "parameter column '{}' of '{}' does not accept '{}'",
            predicate.column,
            table.name,
            predicate.comparison.operator()
        ))
    };
    let (lower, upper) = match table.pushdown_rule(&predicate.column).map(|rule| &rule.binding) {
        Some(ParamBinding::Bounds { lower, upper, .. }) => (lower.as_deref(), upper.as_deref()),
        Some(ParamBinding::Equals { param, .. }) => {
            return match &predicate.comparison {
                Comparison::Eq(value) => {
                    params.set_equals(param, value.clone());
                    Ok(())
                }
                _ => Err(reject()),
            }
        }
        None => return Err(reject()),
    };
    match &predicate.comparison {
        Comparison::Eq(value) => {
            if let Some(lower) = lower {
                params.tighten_lower(lower, value.clone());
            }
            if let Some(upper) = upper {
                params.tighten_upper(upper, value.clone());
            }
        }
        Comparison::GtEq(value) => params.tighten_lower(lower.ok_or_else(reject)?, value.clone()),
        Comparison::LtEq(value) => params.tighten_upper(upper.ok_or_else(reject)?, value.clone()),
        Comparison::Range { low, high } => {
            let (Some(lower), Some(upper)) = (lower, upper) else {
                return Err(reject());
            };
            params.tighten_lower(lower, low.clone());
            params.tighten_upper(upper, high.clone());
        }
        Comparison::NotEq(_) | Comparison::Lt(_) | Comparison::Gt(_) => return Err(reject()),
    }
    Ok(())
}

fn push_visible(
    table: &TableDescriptor,
    predicate: &Predicate,
    params: &mut NativeParams,
) -> Pushdown {
    let Some(rule) = table.pushdown_rule(&predicate.column) else {
        return Pushdown::Unsupported;
    };
    match (&rule.binding, &predicate.comparison) {
        (ParamBinding::Equals { param, exact }, Comparison::Eq(value)) => {
            params.set_equals(param, value.clone());
            Pushdown::from_exact(*exact)
        }
        (ParamBinding::Equals { .. }, _) => Pushdown::Unsupported,
        (ParamBinding::Bounds { lower, upper, exact }, comparison) => {
            let lower = lower.as_deref();
            let upper = upper.as_deref();
            let (low, high, strict) = match comparison {
                Comparison::Eq(value) => (Some(value), Some(value), false),
                Comparison::GtEq(value) => (Some(value), None, false),
                Comparison::Gt(value) => (Some(value), None, true),
                Comparison::LtEq(value) => (None, Some(value), false),
                Comparison::Lt(value) => (None, Some(value), true),
                Comparison::Range { low, high } => (Some(low), Some(high), false),
                Comparison::NotEq(_) => return Pushdown::Unsupported,
            };
            let mut complete = true;
            let mut pushed = false;
            match (low, lower) {
                (Some(value), Some(param)) => {
                    params.tighten_lower(param, value.clone());
                    pushed = true;
                }
                (Some(_), None) => complete = false,
                (None, _) => {}
            }
            match (high, upper) {
                (Some(value), Some(param)) => {
                    params.tighten_upper(param, value.clone());
                    pushed = true;
                }
                (Some(_), None) => complete = false,
                (None, _) => {}
            }
            if !pushed {
                Pushdown::Unsupported
            } else {
                // Native bounds are inclusive, so strict comparisons stay residual.
                Pushdown::from_exact(*exact && complete && !strict)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;
    use crate::error::ErrorKind;
    use crate::schema::{discovered_table, ColumnType, SchemaRegistry};
    use chrono::NaiveDate;

    fn table(kind: EngineKind, name: &str) -> Arc<TableDescriptor> {
        SchemaRegistry::for_kind(kind).get(name).expect("builtin table")
    }

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).expect("valid date"))
    }

    #[test]
    fn exact_predicates_leave_no_residual() {
        let transactions = table(EngineKind::FinancialAggregator, "transactions");
        let query = QueryDescriptor::new("transactions")
            .filter(Predicate::eq("start_date", "2022-01-01"))
            .filter(Predicate::eq("end_date", "2023-04-11"))
            .filter(Predicate::eq("account_id", "acc-1"))
            .limit(20);
        let plan = translate(&transactions, &query, &EngineSettings::default()).expect("plan");
        assert_eq!(plan.requests.len(), 1);
        assert!(plan.residual.is_empty());
        assert_eq!(plan.pushdown.exact, 3);
        let params = &plan.requests[0].params;
        assert_eq!(params.get("start_date"), Some(&date(2022, 1, 1)));
        assert_eq!(params.get("end_date"), Some(&date(2023, 4, 11)));
        assert_eq!(params.get("account_ids"), Some(&Value::from("acc-1")));
    }

    #[test]
    fn missing_required_bound_is_reported() {
        let transactions = table(EngineKind::FinancialAggregator, "transactions");
        let query = QueryDescriptor::new("transactions")
            .filter(Predicate::gt_eq("date", "2022-01-01"));
        let err = translate(&transactions, &query, &EngineSettings::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredFilter);
        assert!(err.to_string().contains("end_date"), "{err}");
    }

    #[test]
    fn strict_bounds_stay_residual() {
        let transactions = table(EngineKind::FinancialAggregator, "transactions");
        let query = QueryDescriptor::new("transactions")
            .filter(Predicate::gt("date", "2022-01-01"))
            .filter(Predicate::lt_eq("date", "2022-12-31"));
        let plan = translate(&transactions, &query, &EngineSettings::default()).expect("plan");
        assert_eq!(plan.pushdown.exact, 1);
        assert_eq!(plan.pushdown.inexact, 1);
        assert_eq!(plan.residual, vec![Predicate::gt("date", date(2022, 1, 1))]);
    }

    #[test]
    fn parameter_columns_reject_other_operators() {
        let transactions = table(EngineKind::FinancialAggregator, "transactions");
        let query = QueryDescriptor::new("transactions")
            .filter(Predicate::gt("start_date", "2022-01-01"));
        let err = translate(&transactions, &query, &EngineSettings::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let select = QueryDescriptor::new("transactions").select(["start_date"]);
        assert!(translate(&transactions, &select, &EngineSettings::default()).is_err());
    }

    #[test]
    fn inverted_range_issues_no_request() {
        let transactions = table(EngineKind::FinancialAggregator, "transactions");
        let query = QueryDescriptor::new("transactions")
            .filter(Predicate::eq("start_date", "2023-05-01"))
            .filter(Predicate::eq("end_date", "2023-04-01"));
        let plan = translate(&transactions, &query, &EngineSettings::default()).expect("plan");
        assert!(plan.requests.is_empty());
    }

    #[test]
    fn unsupported_ordering_needs_a_small_limit() {
        let events = table(EngineKind::CalendarService, "events");
        let unbounded = QueryDescriptor::new("events").order_by(OrderBy::desc("updated_at"));
        let err = translate(&events, &unbounded, &EngineSettings::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let bounded = unbounded.limit(10);
        let plan = translate(&events, &bounded, &EngineSettings::default()).expect("plan");
        assert_eq!(plan.client_order, Some(OrderBy::desc("updated_at")));
        assert_eq!(plan.requests[0].order, None);

        let native = QueryDescriptor::new("events").order_by(OrderBy::asc("start_time"));
        let plan = translate(&events, &native, &EngineSettings::default()).expect("plan");
        assert_eq!(plan.requests[0].order, Some(OrderBy::asc("start_time")));
        assert_eq!(plan.client_order, None);
    }

    #[test]
    fn query_language_tables_push_everything() {
        let orders = Arc::new(discovered_table(
            "ORDERS",
            vec![
                ("ID".to_string(), ColumnType::Int, false),
                ("STATUS".to_string(), ColumnType::Text, true),
            ],
            vec!["ID".to_string()],
        ));
        let query = QueryDescriptor::new("ORDERS")
            .filter(Predicate::not_eq("STATUS", "closed"))
            .filter(Predicate::gt("ID", "10"))
            .order_by(OrderBy::desc("ID"))
            .limit(5);
        let plan = translate(&orders, &query, &EngineSettings::default()).expect("plan");
        let request = &plan.requests[0];
        assert!(plan.residual.is_empty());
        assert_eq!(request.limit, Some(5));
        assert_eq!(request.filters[1], Predicate::gt("ID", 10));

        let bad = QueryDescriptor::new("ORDERS").filter(Predicate::eq("ID", "ten"));
        assert!(translate(&orders, &bad, &EngineSettings::default()).is_err());
    }

    #[test]
    fn zero_limit_and_null_literals_skip_fetching() {
        let events = table(EngineKind::CalendarService, "events");
        let zero = QueryDescriptor::new("events").limit(0);
        assert!(translate(&events, &zero, &EngineSettings::default())
            .expect("plan")
            .requests
            .is_empty());
        let null = QueryDescriptor::new("events").filter(Predicate::eq("summary", Value::Null));
        assert!(translate(&events, &null, &EngineSettings::default())
            .expect("plan")
            .requests
            .is_empty());
    }
}
