mod common;

use std::sync::Arc;

use anyhow::{Context, Result};
use conduit_engine::schema::{encode_row, lookup_path, FieldResolver};
use conduit_engine::{
    Connection, EngineKind, ErrorKind, HandlerError, MutationCompletion, MutationDescriptor,
    Predicate, QueryDescriptor,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{calendar_params, event, FakeCalendar, ScriptedTransport};

const EVENTS_PATH: &str = "/calendars/primary/events";

async fn calendar(events: FakeCalendar) -> Result<(Connection, Arc<ScriptedTransport<FakeCalendar>>)> {
    let transport = ScriptedTransport::new(events);
    let connection = Connection::connect_with_transport(
        EngineKind::CalendarService,
        calendar_params(),
        transport.clone(),
    )
    .await
    .context("connect to fake calendar")?;
    Ok((connection, transport))
}

fn numbered_events(ids: &[&str]) -> FakeCalendar {
    FakeCalendar::with_events(
        ids.iter()
            .map(|id| {
                event(
                    id,
                    &format!("meeting {id}"),
                    "2024-03-01T09:00:00Z",
                    "2024-03-01T10:00:00Z",
                )
            })
            .collect(),
    )
}

#[tokio::test]
async fn insert_without_start_time_is_rejected_before_any_call() -> Result<()> {
    let (connection, transport) = calendar(FakeCalendar::default()).await?;
    let before = transport.call_count();

    let err = connection
        .mutate(
            &MutationDescriptor::insert("events")
                .set("summary", "planning")
                .set("end_time", "2024-03-01T10:00:00Z"),
        )
        .await
        .expect_err("start_time is required on insert");

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(err.to_string().contains("start_time"), "{err}");
    assert_eq!(transport.call_count(), before);
    Ok(())
}

#[tokio::test]
async fn insert_encodes_native_fields_and_returns_the_new_id() -> Result<()> {
    let (connection, transport) = calendar(FakeCalendar::default()).await?;

    let outcome = connection
        .mutate(
            &MutationDescriptor::insert("events")
                .set("summary", "planning")
                .set("start_time", "2024-03-01T09:00:00Z")
                .set("end_time", "2024-03-01T10:00:00Z"),
        )
        .await?;

    assert_eq!(outcome.affected, 1);
    assert_eq!(outcome.created_id.as_deref(), Some("created-1"));
    let posted = transport.calls_to(EVENTS_PATH);
    let body = posted
        .last()
        .and_then(|request| request.body.clone())
        .context("insert body")?;
    assert_eq!(body["summary"], "planning");
    assert_eq!(body["start"]["dateTime"], "2024-03-01T09:00:00Z");
    assert_eq!(body["end"]["dateTime"], "2024-03-01T10:00:00Z");
    Ok(())
}

#[tokio::test]
async fn ranged_update_reports_the_applied_prefix_on_failure() -> Result<()> {
    let mut service = numbered_events(&["1", "2", "3", "4", "5", "6", "10", "11"]);
    service.fail_patch_on = Some(3);
    let (connection, transport) = calendar(service).await?;

    let err = connection
        .mutate(
            &MutationDescriptor::update("events")
                .set("summary", "moved")
                .filter(Predicate::gt("event_id", 1))
                .filter(Predicate::lt("event_id", 10)),
        )
        .await
        .expect_err("third patch fails");

    match &err {
        HandlerError::PartialWrite {
            applied,
            failed_index,
            total,
            source,
        } => {
            assert_eq!(*applied, 2);
            assert_eq!(*failed_index, 2);
            assert_eq!(*total, 5);
            assert_eq!(source.kind(), ErrorKind::ConnectionError);
        }
        other => anyhow::bail!("expected a partial write, got {other}"),
    }

    let service = transport.service();
    let summary = |id: &str| service.event(id).map(|event| event["summary"].clone());
    assert_eq!(summary("2"), Some(json!("moved")));
    assert_eq!(summary("3"), Some(json!("moved")));
    assert_eq!(summary("4"), Some(json!("meeting 4")));
    assert_eq!(summary("5"), Some(json!("meeting 5")));
    assert_eq!(summary("6"), Some(json!("meeting 6")));
    assert_eq!(summary("10"), Some(json!("meeting 10")));
    drop(service);

    let snapshot = connection.metrics().snapshot();
    assert_eq!(snapshot.mutation_failures, 1);
    assert_eq!(snapshot.mutation_rows_applied, 2);
    Ok(())
}

#[tokio::test]
async fn delete_by_identifier_twice_reports_one_then_zero() -> Result<()> {
    let (connection, transport) = calendar(numbered_events(&["evt-a", "evt-b"])).await?;
    let delete = MutationDescriptor::delete("events").filter(Predicate::eq("event_id", "evt-a"));

    let first = connection.mutate(&delete).await?;
    let second = connection.mutate(&delete).await?;

    assert_eq!(first.affected, 1);
    assert_eq!(second.affected, 0);
    // A lone identifier equality skips the resolving read.
    assert!(transport.calls_to(EVENTS_PATH).is_empty());
    assert!(transport.service().event("evt-b").is_some());
    Ok(())
}

#[tokio::test]
async fn unguarded_delete_is_rejected() -> Result<()> {
    let (connection, transport) = calendar(numbered_events(&["1"])).await?;
    let before = transport.call_count();

    let err = connection
        .mutate(&MutationDescriptor::delete("events"))
        .await
        .expect_err("delete without predicate");

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(transport.call_count(), before);
    Ok(())
}

#[tokio::test]
async fn cancelled_update_applies_nothing_further() -> Result<()> {
    let (connection, transport) = calendar(numbered_events(&["2", "3", "4"])).await?;
    let token = CancellationToken::new();
    token.cancel();

    let outcome = connection
        .mutate_cancellable(
            &MutationDescriptor::update("events")
                .set("location", "room 4")
                .filter(Predicate::gt("event_id", 1)),
            token,
        )
        .await?;

    assert_eq!(outcome.completion, MutationCompletion::Cancelled);
    assert_eq!(outcome.affected, 0);
    assert!(transport
        .requests()
        .iter()
        .all(|request| request.method != conduit_engine::HttpMethod::Patch));
    Ok(())
}

#[tokio::test]
async fn materialized_rows_re_encode_to_the_same_native_fields() -> Result<()> {
    let mut original = event(
        "evt-rt",
        "quarterly review",
        "2024-03-01T09:00:00Z",
        "2024-03-01T10:30:00Z",
    );
    original["description"] = json!("numbers and plans");
    original["location"] = json!("room 2");
    let (connection, _transport) =
        calendar(FakeCalendar::with_events(vec![original.clone()])).await?;

    let rows = connection
        .query(&QueryDescriptor::new("events"))?
        .collect_rows()
        .await?;
    let row = rows.first().context("one event")?;

    let table = connection
        .list_tables()?
        .into_iter()
        .find(|table| table.name == "events")
        .context("events table")?;
    let resolver = FieldResolver::new(EngineKind::CalendarService, "events");
    let encoded = encode_row(&resolver, &table, row);

    for column in table.columns.iter().filter(|column| column.writable) {
        let path = resolver.primary_path(&column.name);
        assert_eq!(
            lookup_path(&encoded, &path),
            lookup_path(&original, &path),
            "column {} at {path}",
            column.name
        );
    }
    Ok(())
}
