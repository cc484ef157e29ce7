//! Error classification for Redis failures.
//!
//! The failover controller scopes retry, circuit breaker and fallback
//! behavior by [`ErrorKind`]; this module maps [`RedisError`]s onto
//! those kinds.

use redis::RedisError;
use switchover_core::{CommandError, ErrorKind};

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client.
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

/// Map a Redis client error onto a failure kind.
///
/// Connection-level failures (refused, dropped, I/O) and timeouts are
/// what retry and failover react to by default; server replies such as
/// `READONLY` or `LOADING` classify as server errors and stay with the
/// caller.
pub fn classify(error: &RedisError) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else if error.is_connection_refusal() || error.is_connection_dropped() || error.is_io_error()
    {
        ErrorKind::Connection
    } else {
        match error.kind() {
            redis::ErrorKind::Server(_) => ErrorKind::Server,
            redis::ErrorKind::Parse | redis::ErrorKind::UnexpectedReturnType => {
                ErrorKind::Protocol
            }
            _ => ErrorKind::Other,
        }
    }
}

/// Convert a Redis client error into a classified [`CommandError`].
pub fn to_command_error(error: RedisError) -> CommandError {
    CommandError::with_source(classify(&error), error)
}

impl From<Error> for CommandError {
    fn from(error: Error) -> Self {
        match error {
            Error::Redis(redis_error) => to_command_error(redis_error),
        }
    }
}
