//! Write translator: INSERT, UPDATE and DELETE against virtual tables.
//!
//! Every descriptor is validated in full before the first adapter call.
//! Services without bulk statements get predicate-driven writes resolved to a
//! bounded identifier set, then one call per identifier in order. A failure
//! after some calls succeeded surfaces as `PartialWrite`; nothing is undone.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::{NativeRecord, WriteOutcome};
use crate::connection::Session;
use crate::descriptor::{Comparison, MutationDescriptor, MutationKind, Predicate, QueryDescriptor};
use crate::error::{HandlerError, HandlerResult};
use crate::materializer::RowStream;
use crate::schema::{FieldResolver, TableDescriptor};
use crate::translator::{bind_predicates, translate};
use crate::value::Value;

/// How a mutation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationCompletion {
    Completed,
    /// Stopped between calls; `affected` counts the calls already applied.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Rows or resources changed.
    pub affected: u64,
    /// Identifier reported by the service for an INSERT.
    pub created_id: Option<String>,
    pub completion: MutationCompletion,
}

impl MutationOutcome {
    fn completed(affected: u64) -> Self {
        Self {
            affected,
            created_id: None,
            completion: MutationCompletion::Completed,
        }
    }
}

enum PerResource {
    Update(NativeRecord),
    Delete,
}

pub(crate) async fn execute(
    session: &Arc<Session>,
    mutation: &MutationDescriptor,
    cancel: Option<&CancellationToken>,
) -> HandlerResult<MutationOutcome> {
    let table = session.registry().get(&mutation.table)?;
    let result = match mutation.kind {
        MutationKind::Insert => insert(session, &table, mutation).await,
        MutationKind::Update => update(session, &table, mutation, cancel).await,
        MutationKind::Delete => delete(session, &table, mutation, cancel).await,
    };
    match &result {
        Ok(outcome) => session.metrics().record_mutation(
            outcome.affected,
            false,
            outcome.completion == MutationCompletion::Cancelled,
        ),
        Err(HandlerError::PartialWrite { applied, .. }) => {
            session.metrics().record_mutation(*applied, true, false)
        }
        Err(_) => session.metrics().record_mutation(0, true, false),
    }
    result
}

async fn insert(
    session: &Arc<Session>,
    table: &Arc<TableDescriptor>,
    mutation: &MutationDescriptor,
) -> HandlerResult<MutationOutcome> {
    if !table.capabilities.insertable {
        return Err(HandlerError::validation(format!(
            "table '{}' does not accept INSERT",
            table.name
        )));
    }
    if !mutation.predicates.is_empty() {
        return Err(HandlerError::validation("INSERT cannot carry predicates"));
    }
    if mutation.assignments.is_empty() {
        return Err(HandlerError::validation("INSERT without assignments"));
    }
    let values = bind_assignments(table, &mutation.assignments)?;
    for column in table.columns.iter().filter(|column| column.required_on_insert) {
        let present = values
            .iter()
            .any(|(name, value)| name == &column.name && !value.is_null());
        if !present {
            return Err(HandlerError::validation(format!(
                "INSERT into '{}' requires a value for '{}'",
                table.name, column.name
            )));
        }
    }
    let record = encode(session, table, values);
    let created_id = session.create(table, &record).await?;
    debug!(table = %table.name, created_id = ?created_id, "inserted");
    Ok(MutationOutcome {
        affected: 1,
        created_id,
        completion: MutationCompletion::Completed,
    })
}

async fn update(
    session: &Arc<Session>,
    table: &Arc<TableDescriptor>,
    mutation: &MutationDescriptor,
    cancel: Option<&CancellationToken>,
) -> HandlerResult<MutationOutcome> {
    if !table.capabilities.updatable {
        return Err(HandlerError::validation(format!(
            "table '{}' does not accept UPDATE",
            table.name
        )));
    }
    if mutation.assignments.is_empty() {
        return Err(HandlerError::validation("UPDATE without assignments"));
    }
    let values = bind_assignments(table, &mutation.assignments)?;
    guard_predicates(table, mutation)?;

    if table.capabilities.native_bulk_mutation {
        let predicates = bind_predicates(table, &mutation.predicates)?;
        let affected = session.bulk_update(table, &values, &predicates).await?;
        return Ok(MutationOutcome::completed(affected));
    }

    let ids = resolve_ids(session, table, &mutation.predicates).await?;
    let record = encode(session, table, values);
    apply_each(session, table, &ids, PerResource::Update(record), cancel).await
}

async fn delete(
    session: &Arc<Session>,
    table: &Arc<TableDescriptor>,
    mutation: &MutationDescriptor,
    cancel: Option<&CancellationToken>,
) -> HandlerResult<MutationOutcome> {
    if !table.capabilities.deletable {
        return Err(HandlerError::validation(format!(
            "table '{}' does not accept DELETE",
            table.name
        )));
    }
    if !mutation.assignments.is_empty() {
        return Err(HandlerError::validation("DELETE cannot carry assignments"));
    }
    guard_predicates(table, mutation)?;

    if table.capabilities.native_bulk_mutation {
        let predicates = bind_predicates(table, &mutation.predicates)?;
        let affected = session.bulk_delete(table, &predicates).await?;
        return Ok(MutationOutcome::completed(affected));
    }

    let ids = match direct_identifier(table, &mutation.predicates)? {
        Some(id) => vec![id],
        None => resolve_ids(session, table, &mutation.predicates).await?,
    };
    apply_each(session, table, &ids, PerResource::Delete, cancel).await
}

fn guard_predicates(table: &TableDescriptor, mutation: &MutationDescriptor) -> HandlerResult<()> {
    if mutation.predicates.is_empty() && !table.capabilities.unguarded_mutation {
        return Err(HandlerError::validation(format!(
            "{} on '{}' requires a predicate",
            mutation.kind.as_str(),
            table.name
        )));
    }
    Ok(())
}

/// Validates assignments against the table contract and coerces their values.
fn bind_assignments(
    table: &TableDescriptor,
    assignments: &[(String, Value)],
) -> HandlerResult<Vec<(String, Value)>> {
    let mut bound: Vec<(String, Value)> = Vec::with_capacity(assignments.len());
    for (name, value) in assignments {
        let column = table.column(name).ok_or_else(|| {
            HandlerError::validation(format!("unknown column '{name}' in '{}'", table.name))
        })?;
        if !column.writable {
            return Err(HandlerError::validation(format!(
                "column '{name}' of '{}' is not writable",
                table.name
            )));
        }
        if bound.iter().any(|(seen, _)| seen == &column.name) {
            return Err(HandlerError::validation(format!(
                "column '{name}' assigned twice"
            )));
        }
        if value.is_null() && !column.nullable {
            return Err(HandlerError::validation(format!(
                "column '{name}' of '{}' cannot be null",
                table.name
            )));
        }
        let value = value
            .clone()
            .cast(column.column_type, true)
            .map_err(|detail| HandlerError::validation(format!("column '{name}': {detail}")))?;
        bound.push((column.name.clone(), value));
    }
    Ok(bound)
}

fn encode(session: &Session, table: &TableDescriptor, values: Vec<(String, Value)>) -> NativeRecord {
    let body = FieldResolver::new(session.kind(), &table.name).encode(&values);
    NativeRecord { body, values }
}

/// The identifier of a DELETE whose only predicate is `identifier = literal`.
fn direct_identifier(
    table: &TableDescriptor,
    predicates: &[Predicate],
) -> HandlerResult<Option<Value>> {
    let (Some(identifier), [predicate]) = (table.identifier(), predicates) else {
        return Ok(None);
    };
    match &predicate.comparison {
        Comparison::Eq(value) if predicate.column == identifier && !value.is_null() => {
            let column = table.column(identifier).ok_or_else(|| {
                HandlerError::configuration(format!(
                    "identifier '{identifier}' of '{}' is not a column",
                    table.name
                ))
            })?;
            value
                .clone()
                .cast(column.column_type, true)
                .map(Some)
                .map_err(|detail| {
                    HandlerError::validation(format!("predicate on '{identifier}': {detail}"))
                })
        }
        _ => Ok(None),
    }
}

/// Reads the identifiers of every row matching `predicates`.
async fn resolve_ids(
    session: &Arc<Session>,
    table: &Arc<TableDescriptor>,
    predicates: &[Predicate],
) -> HandlerResult<Vec<Value>> {
    let identifier = table.identifier().ok_or_else(|| {
        HandlerError::Unsupported(format!("'{}' has no identifier column", table.name))
    })?;
    let cap = session.settings().max_mutation_rows;
    let mut query = QueryDescriptor::new(table.name.clone())
        .select([identifier])
        .limit(cap.saturating_add(1));
    query.predicates = predicates.to_vec();

    let plan = translate(table, &query, session.settings())?;
    session.metrics().record_pushdown(&plan.pushdown);
    let rows = RowStream::for_plan(Arc::clone(session), plan)
        .collect_rows()
        .await?;
    if rows.len() > cap {
        return Err(HandlerError::validation(format!(
            "predicate matches more than {cap} rows of '{}'",
            table.name
        )));
    }
    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_values().into_iter().next())
        .filter(|id| !id.is_null())
        .collect())
}

async fn apply_each(
    session: &Arc<Session>,
    table: &TableDescriptor,
    ids: &[Value],
    action: PerResource,
    cancel: Option<&CancellationToken>,
) -> HandlerResult<MutationOutcome> {
    let total = ids.len();
    let mut applied = 0u64;
    for (index, id) in ids.iter().enumerate() {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!(table = %table.name, applied, remaining = total - index, "mutation cancelled");
            return Ok(MutationOutcome {
                affected: applied,
                created_id: None,
                completion: MutationCompletion::Cancelled,
            });
        }
        let outcome = match &action {
            PerResource::Update(record) => session.update(table, id, record).await,
            PerResource::Delete => session.delete(table, id).await,
        };
        match outcome {
            Ok(WriteOutcome::Applied) => applied += 1,
            Ok(WriteOutcome::NotFound) => {}
            Err(source) if index == 0 => return Err(source),
            Err(source) => {
                warn!(
                    table = %table.name,
                    applied,
                    failed_index = index,
                    total,
                    error = %source,
                    "mutation stopped part way"
                );
                return Err(HandlerError::PartialWrite {
                    applied,
                    failed_index: index,
                    total,
                    source: Box::new(source),
                });
            }
        }
    }
    Ok(MutationOutcome::completed(applied))
}
