//! Command failure classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a command failure.
///
/// Retry and circuit breaker configuration scope their behavior to sets
/// of kinds; the controller never inspects anything finer than this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Failed to reach the endpoint: refused, reset, dropped.
    Connection,
    /// The endpoint did not answer within the configured deadline.
    Timeout,
    /// The reply could not be understood.
    Protocol,
    /// The endpoint answered with an error reply.
    Server,
    /// Anything else.
    Other,
}

/// Error produced by a command execution against one endpoint.
///
/// This is the collaborator-facing error type: connector implementations
/// map their client library's errors into it, and the controller only
/// reads [`kind`](CommandError::kind) to decide whether to retry, record
/// a circuit breaker failure, or fail over.
#[derive(Debug, Error)]
#[error("{kind:?} failure: {message}")]
pub struct CommandError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CommandError {
    /// Create an error with an explicit kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying client error as the source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for a [`ErrorKind::Connection`] error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Shorthand for a [`ErrorKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Failure classification used by retry/breaker scoping.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}
