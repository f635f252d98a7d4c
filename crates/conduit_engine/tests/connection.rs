mod common;

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use conduit_engine::{
    Connection, ConnectionState, EngineKind, ErrorKind, HandlerError, NativeCallDescriptor,
    QueryDescriptor,
};
use serde_json::json;

use common::{
    calendar_params, event, financial_params, params, phoenix_params, FakeCalendar,
    FakeFinancial, FakePhoenix, ScriptedTransport, SlowTransport,
};

#[tokio::test]
async fn lifecycle_moves_from_unconnected_to_closed() -> Result<()> {
    let transport = ScriptedTransport::new(FakeCalendar::default());
    let connection =
        Connection::new(EngineKind::CalendarService, calendar_params()).with_transport(transport);
    assert_eq!(connection.state(), ConnectionState::Unconnected);

    connection.open().await?;
    assert_eq!(connection.state(), ConnectionState::Connected);
    let names: Vec<String> = connection
        .list_tables()?
        .iter()
        .map(|table| table.name.clone())
        .collect();
    assert_eq!(names, vec!["events", "calendars"]);

    let reopened = connection.open().await.expect_err("open is one-shot");
    assert_eq!(reopened.kind(), ErrorKind::ValidationError);

    connection.close().await?;
    assert_eq!(connection.state(), ConnectionState::Closed);
    connection.close().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_parameter_fails_connect_without_calls() -> Result<()> {
    let transport = ScriptedTransport::new(FakeFinancial::default());
    let mut bad = financial_params();
    bad.insert("region".to_string(), json!("eu"));
    let connection =
        Connection::new(EngineKind::FinancialAggregator, bad).with_transport(transport.clone());

    let err = connection.open().await.expect_err("unknown key");

    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert!(err.to_string().contains("region"), "{err}");
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(transport.call_count(), 0);
    assert!(connection.list_tables().is_err());
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_are_terminal() -> Result<()> {
    let transport = ScriptedTransport::new(FakeFinancial {
        reject_credentials: true,
        ..FakeFinancial::default()
    });
    let connection = Connection::new(EngineKind::FinancialAggregator, financial_params())
        .with_transport(transport.clone());

    let err = connection.open().await.expect_err("credentials rejected");

    assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    assert_eq!(connection.state(), ConnectionState::Failed);
    assert_eq!(transport.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn closed_connection_fails_new_work_and_open_streams() -> Result<()> {
    let transport = ScriptedTransport::new(FakeCalendar::with_events(vec![event(
        "evt-1",
        "standup",
        "2024-03-01T09:00:00Z",
        "2024-03-01T09:15:00Z",
    )]));
    let connection = Connection::connect_with_transport(
        EngineKind::CalendarService,
        calendar_params(),
        transport.clone(),
    )
    .await?;
    let mut open_stream = connection.query(&QueryDescriptor::new("events"))?;

    connection.close().await?;
    let calls_at_close = transport.call_count();

    assert!(matches!(
        open_stream.next_row().await,
        Err(HandlerError::ConnectionClosed)
    ));
    assert!(matches!(
        connection.query(&QueryDescriptor::new("events")),
        Err(HandlerError::ConnectionClosed)
    ));
    assert!(matches!(
        connection.native_query(NativeCallDescriptor::new("list_calendars")),
        Err(HandlerError::ConnectionClosed)
    ));
    assert_eq!(transport.call_count(), calls_at_close);
    Ok(())
}

#[tokio::test]
async fn close_while_connecting_keeps_the_connection_closed() -> Result<()> {
    let service = ScriptedTransport::new(FakePhoenix::with_orders(2));
    let slow = SlowTransport::new(service.clone(), Duration::from_millis(100));
    let connection = Connection::new(EngineKind::NewSqlDatabase, phoenix_params())
        .with_transport(std::sync::Arc::new(slow));

    let opening = tokio::spawn({
        let connection = connection.clone();
        async move { connection.open().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connection.state(), ConnectionState::Connecting);
    connection.close().await?;

    let opened = opening.await?;
    assert!(matches!(opened, Err(HandlerError::ConnectionClosed)));
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(
        connection.list_tables(),
        Err(HandlerError::ConnectionClosed)
    ));

    // The session established after close is torn down on the server too.
    let closes = service
        .requests()
        .iter()
        .filter(|request| {
            request
                .body
                .as_ref()
                .and_then(|body| body["request"].as_str())
                == Some("closeConnection")
        })
        .count();
    assert_eq!(closes, 1);
    Ok(())
}

#[tokio::test]
async fn calendar_token_is_read_from_a_credentials_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "{}", json!({"access_token": "from-file", "token_type": "Bearer"}))?;
    let transport = ScriptedTransport::new(FakeCalendar::default());

    let connection = Connection::connect_with_transport(
        EngineKind::CalendarService,
        params(json!({
            "credentials_file": file.path().to_string_lossy(),
            "calendar_id": "primary",
        })),
        transport.clone(),
    )
    .await?;

    let first = transport.requests().into_iter().next().context("auth call")?;
    assert_eq!(first.header_value("authorization"), Some("Bearer from-file"));
    connection.close().await?;
    Ok(())
}

#[tokio::test]
async fn unreadable_credentials_file_is_a_configuration_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("absent.json");
    let transport = ScriptedTransport::new(FakeCalendar::default());

    let err = Connection::connect_with_transport(
        EngineKind::CalendarService,
        params(json!({"credentials_file": missing.to_string_lossy()})),
        transport.clone(),
    )
    .await
    .err()
    .context("missing file must fail")?;

    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert_eq!(transport.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn check_reports_success_and_failure() -> Result<()> {
    let ok = Connection::check_with_transport(
        EngineKind::CalendarService,
        calendar_params(),
        ScriptedTransport::new(FakeCalendar::default()),
    )
    .await;
    assert!(ok.success);
    assert_eq!(ok.error_message, None);

    let failed = Connection::check_with_transport(
        EngineKind::CalendarService,
        params(json!({"calendar_id": "primary"})),
        ScriptedTransport::new(FakeCalendar::default()),
    )
    .await;
    assert!(!failed.success);
    let message = failed.error_message.context("failure message")?;
    assert!(message.contains("access_token"), "{message}");
    Ok(())
}

#[tokio::test]
async fn describe_table_lists_columns_and_types() -> Result<()> {
    let connection = Connection::connect_with_transport(
        EngineKind::FinancialAggregator,
        financial_params(),
        ScriptedTransport::new(FakeFinancial::default()),
    )
    .await?;

    let rows = connection.describe_table("transactions")?;
    let described: Vec<(String, String)> = rows
        .iter()
        .map(|row| (row.values()[0].to_string(), row.values()[1].to_string()))
        .collect();

    assert!(described.contains(&("amount".to_string(), "float".to_string())));
    assert!(described.contains(&("date".to_string(), "date".to_string())));
    assert!(described.contains(&("start_date".to_string(), "date".to_string())));
    assert!(connection.describe_table("ledger").is_err());
    Ok(())
}
