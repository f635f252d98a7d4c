//! Operator client for running descriptors against one external system.
//!
//! Every command opens a connection from a JSON parameter file, prints its
//! result as JSON lines on stdout, and closes the connection again.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use conduit_engine::{
    Comparison, Connection, EngineKind, EngineSettings, MutationDescriptor, NativeCallDescriptor,
    OrderBy, ParameterMap, Predicate, QueryDescriptor, RowStream, Value,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conduit-ctl")]
#[command(about = "Query and mutate external systems through virtual tables", long_about = None)]
struct Args {
    /// Engine kind: financial-aggregator, calendar-service or newsql-database.
    #[arg(long)]
    engine: EngineKind,
    /// JSON object with the connection parameters.
    #[arg(long)]
    params: Option<PathBuf>,
    /// Deadline for each native call; overrides CONDUIT_CALL_TIMEOUT_MS.
    #[arg(long)]
    timeout: Option<humantime::Duration>,
    /// Rows requested per page; overrides CONDUIT_PAGE_SIZE.
    #[arg(long)]
    page_size: Option<usize>,
    /// Print handler counters to stderr before exiting.
    #[arg(long, default_value_t = false)]
    metrics: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the connection arguments the engine accepts.
    Args,
    /// Open and close a connection, reporting whether it succeeded.
    Check,
    /// List the tables of the connection.
    Tables,
    /// Print the columns and types of one table.
    Describe { table: String },
    /// Stream rows of a table.
    Query {
        table: String,
        /// Output column; repeat to select several.
        #[arg(long = "column")]
        columns: Vec<String>,
        /// Predicate such as `amount>=10`, `status!=done` or `date~2024-01-01..2024-01-31`.
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Sort column, optionally suffixed with `:desc`.
        #[arg(long)]
        order: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Insert, update or delete rows.
    Mutate {
        #[arg(value_enum)]
        kind: MutationKind,
        table: String,
        /// Assignment such as `summary=standup`.
        #[arg(long = "set")]
        assignments: Vec<String>,
        #[arg(long = "filter")]
        filters: Vec<String>,
    },
    /// Run a named native operation.
    Native {
        operation: String,
        /// Keyword argument such as `start_date=2024-01-01`.
        #[arg(long = "arg")]
        args: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MutationKind {
    Insert,
    Update,
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("conduit_engine=info,warn")),
        )
        .init();

    let args = Args::parse();
    let params = load_params(args.params.as_ref()).await?;
    let mut settings = EngineSettings::from_env()?;
    if let Some(timeout) = args.timeout {
        settings.call_timeout = timeout.into();
    }
    if let Some(page_size) = args.page_size {
        settings.page_size = Some(page_size.max(1));
    }

    match args.command {
        Command::Args => {
            for arg in args.engine.connection_args() {
                print_json(&json!({
                    "name": arg.name,
                    "type": arg.arg_type.as_str(),
                    "required": arg.required,
                    "description": arg.description,
                }))?;
            }
            return Ok(());
        }
        Command::Check => {
            let status = Connection::check(args.engine, params).await;
            print_json(&serde_json::to_value(&status)?)?;
            if !status.success {
                std::process::exit(1);
            }
            return Ok(());
        }
        _ => {}
    }

    let connection = Connection::new(args.engine, params).with_settings(settings);
    connection
        .open()
        .await
        .with_context(|| format!("connect to {}", args.engine))?;
    let result = run(&connection, args.command).await;
    if args.metrics {
        eprint!("{}", connection.metrics().render_text());
    }
    if let Err(err) = connection.close().await {
        warn!(error = %err, "close failed");
    }
    result
}

async fn run(connection: &Connection, command: Command) -> Result<()> {
    match command {
        Command::Args | Command::Check => Ok(()),
        Command::Tables => {
            for table in connection.list_tables()? {
                print_json(&json!({
                    "table_name": table.name,
                    "description": table.description,
                    "primary_key": table.primary_key,
                    "writable": table.is_writable(),
                }))?;
            }
            Ok(())
        }
        Command::Describe { table } => {
            for row in connection.describe_table(&table)? {
                print_json(&serde_json::to_value(&row)?)?;
            }
            Ok(())
        }
        Command::Query {
            table,
            columns,
            filters,
            order,
            limit,
        } => {
            let mut query = QueryDescriptor::new(table).select(columns);
            for filter in &filters {
                query = query.filter(parse_filter(filter)?);
            }
            if let Some(order) = order.as_deref() {
                query = query.order_by(parse_order(order));
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            drain(connection.query(&query)?).await
        }
        Command::Mutate {
            kind,
            table,
            assignments,
            filters,
        } => {
            let mut mutation = match kind {
                MutationKind::Insert => MutationDescriptor::insert(table),
                MutationKind::Update => MutationDescriptor::update(table),
                MutationKind::Delete => MutationDescriptor::delete(table),
            };
            for assignment in &assignments {
                let (column, value) = parse_assignment(assignment)?;
                mutation = mutation.set(column, value);
            }
            for filter in &filters {
                mutation = mutation.filter(parse_filter(filter)?);
            }
            let token = interrupt_token();
            let outcome = connection.mutate_cancellable(&mutation, token).await?;
            print_json(&json!({
                "affected": outcome.affected,
                "created_id": outcome.created_id,
                "completion": format!("{:?}", outcome.completion).to_lowercase(),
            }))
        }
        Command::Native { operation, args } => {
            let mut call = NativeCallDescriptor::new(operation);
            for arg in &args {
                let (name, value) = parse_assignment(arg)?;
                call = call.arg(name, value);
            }
            drain(connection.native_query(call)?).await
        }
    }
}

/// Prints every row; Ctrl-C stops the scan before the next page.
async fn drain(stream: RowStream) -> Result<()> {
    let mut stream = stream.cancel_on(interrupt_token());
    while let Some(row) = stream.next_row().await? {
        print_json(&serde_json::to_value(&row)?)?;
    }
    let stats = stream.stats();
    info!(
        completion = ?stream.completion(),
        pages = stats.pages,
        rows = stats.rows_returned,
        "scan finished"
    );
    Ok(())
}

fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

async fn load_params(path: Option<&PathBuf>) -> Result<ParameterMap> {
    let Some(path) = path else {
        return Ok(ParameterMap::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read parameter file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse parameter file {}", path.display()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// JSON literals keep their type; anything else is text.
fn parse_literal(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(json) if !json.is_object() && !json.is_array() => Value::from_json(&json),
        _ => Value::from(raw.trim()),
    }
}

fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected name=value, got '{raw}'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("missing name in '{raw}'");
    }
    Ok((name.to_string(), parse_literal(value)))
}

fn parse_filter(raw: &str) -> Result<Predicate> {
    if let Some((column, bounds)) = raw.split_once('~') {
        let Some((low, high)) = bounds.split_once("..") else {
            bail!("range filter needs low..high, got '{raw}'");
        };
        return Ok(Predicate::new(
            column.trim(),
            Comparison::Range {
                low: parse_literal(low),
                high: parse_literal(high),
            },
        ));
    }
    // Two-character operators first so `>=` is not read as `>`.
    const OPERATORS: [&str; 6] = [">=", "<=", "!=", "=", "<", ">"];
    let Some((position, operator)) = OPERATORS
        .iter()
        .filter_map(|operator| raw.find(operator).map(|position| (position, *operator)))
        .min_by_key(|(position, operator)| (*position, std::cmp::Reverse(operator.len())))
    else {
        bail!("no comparison operator in filter '{raw}'");
    };
    let column = raw[..position].trim();
    if column.is_empty() {
        bail!("missing column in filter '{raw}'");
    }
    let value = parse_literal(&raw[position + operator.len()..]);
    Ok(match operator {
        ">=" => Predicate::gt_eq(column, value),
        "<=" => Predicate::lt_eq(column, value),
        "!=" => Predicate::not_eq(column, value),
        "<" => Predicate::lt(column, value),
        ">" => Predicate::gt(column, value),
        _ => Predicate::eq(column, value),
    })
}

fn parse_order(raw: &str) -> OrderBy {
    match raw.rsplit_once(':') {
        Some((column, direction)) if direction.eq_ignore_ascii_case("desc") => {
            OrderBy::desc(column)
        }
        Some((column, direction)) if direction.eq_ignore_ascii_case("asc") => OrderBy::asc(column),
        _ => OrderBy::asc(raw),
    }
}
