//! Error taxonomy surfaced to the calling SQL engine.
//!
//! Every failure carries a stable [`ErrorKind`] plus a human-readable detail.
//! Only [`ErrorKind::ConnectionError`] is retryable, and never internally.

use std::fmt;

/// Result alias used throughout the engine.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Stable error classification reported alongside the detail message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigurationError,
    ConnectionError,
    ValidationError,
    MissingRequiredFilter,
    MalformedResponse,
    UnknownOperation,
    MissingArgument,
    ConnectionClosed,
    Unsupported,
    RemoteRejected,
    PartialWrite,
}

impl ErrorKind {
    /// Returns the wire/log name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationError => "ConfigurationError",
            Self::ConnectionError => "ConnectionError",
            Self::ValidationError => "ValidationError",
            Self::MissingRequiredFilter => "MissingRequiredFilter",
            Self::MalformedResponse => "MalformedResponse",
            Self::UnknownOperation => "UnknownOperation",
            Self::MissingArgument => "MissingArgument",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::Unsupported => "Unsupported",
            Self::RemoteRejected => "RemoteRejected",
            Self::PartialWrite => "PartialWrite",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by handlers, translators, and adapters.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Missing or invalid connection parameters. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport-level failure. The caller may retry with backoff.
    #[error("connection error: {0}")]
    Connection(String),

    /// A descriptor violates its table contract. Raised before any native call.
    #[error("validation error: {0}")]
    Validation(String),

    /// A range query omitted a bound the native API requires.
    #[error("table '{table}' requires a filter that sets '{parameter}'")]
    MissingRequiredFilter { table: String, parameter: String },

    /// The adapter returned data that cannot be coerced into the table contract.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unknown operation '{operation}' for {engine} handler")]
    UnknownOperation { engine: String, operation: String },

    #[error("operation '{operation}' is missing required argument '{argument}'")]
    MissingArgument { operation: String, argument: String },

    #[error("connection is closed")]
    ConnectionClosed,

    /// The request needs a capability neither the service nor the engine provides.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The service refused the request for a non-transient reason.
    #[error("remote service rejected request (status {status}): {detail}")]
    RemoteRejected { status: u16, detail: String },

    /// A multi-call write stopped at `failed_index`; calls before it stay applied.
    #[error("write stopped at call index {failed_index} of {total} after {applied} applied: {source}")]
    PartialWrite {
        applied: u64,
        failed_index: usize,
        total: usize,
        source: Box<HandlerError>,
    },
}

impl HandlerError {
    /// Returns the stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::Connection(_) => ErrorKind::ConnectionError,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::MissingRequiredFilter { .. } => ErrorKind::MissingRequiredFilter,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            Self::MissingArgument { .. } => ErrorKind::MissingArgument,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            Self::PartialWrite { .. } => ErrorKind::PartialWrite,
        }
    }

    /// Returns `true` when the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub(crate) fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    pub(crate) fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }

    pub(crate) fn connection(detail: impl Into<String>) -> Self {
        Self::Connection(detail.into())
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedResponse(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_retryable() {
        assert!(HandlerError::connection("reset by peer").is_retryable());
        assert!(!HandlerError::configuration("missing url").is_retryable());
        assert!(!HandlerError::ConnectionClosed.is_retryable());
    }

    #[test]
    fn partial_write_reports_prefix_and_cause() {
        let err = HandlerError::PartialWrite {
            applied: 2,
            failed_index: 2,
            total: 5,
            source: Box::new(HandlerError::connection("socket closed")),
        };
        assert_eq!(err.kind(), ErrorKind::PartialWrite);
        let message = err.to_string();
        assert!(message.contains("after 2 applied"), "{message}");
        assert!(message.contains("socket closed"), "{message}");
    }
}
