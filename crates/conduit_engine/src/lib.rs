//! Conduit exposes external services as relational virtual tables.
//!
//! A [`Connection`] binds one engine kind (financial aggregator, calendar
//! service, NewSQL query server) to an authenticated adapter session. Queries
//! are translated into native requests with as much predicate pushdown as the
//! service allows, and results come back as lazy [`RowStream`]s. Mutations and
//! native passthrough calls go through the same session.

pub mod adapter;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod materializer;
pub mod metrics;
pub mod mutation;
pub mod passthrough;
pub mod predicates;
pub mod row;
pub mod schema;
pub mod settings;
pub mod translator;
pub mod transport;
pub mod value;

pub use config::{ConnectionArg, ConnectionConfig, EngineKind, ParameterMap};
pub use connection::{CheckStatus, Connection, ConnectionState};
pub use descriptor::{
    Comparison, MutationDescriptor, MutationKind, NativeCallDescriptor, OrderBy, Predicate,
    QueryDescriptor, SortDirection,
};
pub use error::{ErrorKind, HandlerError, HandlerResult};
pub use materializer::{Completion, RowStream, StreamStats};
pub use metrics::{HandlerMetrics, HandlerMetricsSnapshot};
pub use mutation::{MutationCompletion, MutationOutcome};
pub use row::Row;
pub use schema::{ColumnDescriptor, ColumnType, TableDescriptor};
pub use settings::EngineSettings;
pub use transport::{HttpMethod, HttpTransport, Transport, TransportRequest, TransportResponse};
pub use value::Value;
