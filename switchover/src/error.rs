//! Error types for configuration and failover execution.

use switchover_core::{CommandError, Endpoint};
use thiserror::Error;

/// Configuration rejected at build time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// No endpoint was configured.
    #[error("at least one endpoint is required")]
    NoEndpoints,

    /// `max_attempts` must count the initial call.
    #[error("retry max_attempts must be at least 1")]
    ZeroRetryAttempts,

    /// Disabling both circuit breaker thresholds would make the breaker
    /// unable to ever open.
    #[error("min_failures and failure_rate_threshold must not both be zero")]
    BothThresholdsZero,

    /// The failure rate threshold is a percentage.
    #[error("failure_rate_threshold must be within 0.0..=100.0, got {0}")]
    RateOutOfRange(f32),

    /// The sliding window needs room for at least one outcome.
    #[error("sliding_window_size must be at least 1")]
    ZeroWindow,

    /// An operation referenced an endpoint the provider does not know.
    #[error("endpoint {0} is not configured on this provider")]
    UnknownEndpoint(Endpoint),

    /// An endpoint was added twice.
    #[error("endpoint {0} already exists on this provider")]
    DuplicateEndpoint(Endpoint),

    /// The provider refuses to drop its last endpoint.
    #[error("cannot remove the last remaining endpoint")]
    LastEndpoint,

    /// A manual switch targeted an endpoint that is not serviceable.
    #[error("endpoint {0} is not healthy")]
    UnhealthyEndpoint(Endpoint),
}

/// Provider construction failed.
#[derive(Debug, Error)]
pub enum InitError {
    /// Opening a pool for an endpoint failed outright.
    #[error("failed to connect endpoint {endpoint}")]
    Connect {
        /// The endpoint that could not be connected.
        endpoint: Endpoint,
        /// Underlying connector error.
        #[source]
        source: CommandError,
    },

    /// A health check produced no verdict within its bounded round.
    #[error("timed out waiting for the first health check result of {0}")]
    HealthCheckTimeout(Endpoint),

    /// The initialization policy's condition was not met by the first
    /// round of health checks.
    #[error("initialization policy requires {required} healthy endpoints, found {healthy} of {total}")]
    PolicyUnmet {
        /// Healthy endpoints observed.
        healthy: usize,
        /// Healthy endpoints the policy demands.
        required: usize,
        /// Total configured endpoints.
        total: usize,
    },

    /// Invalid configuration reached the provider.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Error surfaced by [`FailoverProvider::run`](crate::FailoverProvider::run).
#[derive(Debug, Error)]
pub enum FailoverError {
    /// The command failed and neither retry nor failover applied (or
    /// failover succeeded but retrying on the new endpoint is disabled).
    #[error(transparent)]
    Command(CommandError),

    /// The active endpoint's circuit is open and the call was rejected
    /// without being forwarded.
    #[error("circuit breaker open for endpoint {0}")]
    CircuitOpen(Endpoint),

    /// No healthy endpoint is available right now; the failover attempt
    /// budget is not yet exhausted and later calls may recover.
    #[error("no healthy endpoint available, failover attempts remain")]
    TemporarilyUnavailable,

    /// No healthy endpoint was found within the configured number of
    /// failover attempts. Further calls will keep failing until an
    /// endpoint recovers and is manually or automatically restored.
    #[error("no healthy endpoint available, failover attempts exhausted")]
    PermanentlyUnavailable,

    /// The provider was closed and no longer accepts commands.
    #[error("failover provider is closed")]
    Closed,

    /// An operation was rejected for referencing invalid state.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
