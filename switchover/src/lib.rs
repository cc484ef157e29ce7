#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Per-endpoint circuit breaker.
///
/// Provides [`CircuitBreaker`](breaker::CircuitBreaker), a count-based
/// sliding-window failure detector with forced-open and half-open
/// states for failover and failback coordination.
pub mod breaker;

/// Configuration types and builders.
///
/// Covers retry, circuit breaker, per-endpoint and top-level failover
/// settings, each with a validating builder, plus the
/// [`InitializationPolicy`](config::InitializationPolicy) readiness
/// condition.
pub mod config;

/// Error types for configuration and failover execution.
///
/// Defines:
/// - [`ValidationError`] — configuration rejected at build time
/// - [`InitError`] — provider construction failures
/// - [`FailoverError`] — command execution failures
pub mod error;

/// Health check scheduling.
///
/// Runs one probe task per monitored endpoint, aggregating probe
/// outcomes per round through the endpoint's
/// [`ProbePolicy`](switchover_core::ProbePolicy) and publishing
/// verdicts to the failover controller.
pub mod health;

/// Metrics collection for failover observability.
///
/// When the `metrics` feature is enabled, this module provides counters
/// for endpoint switches, circuit breaker rejections, health status
/// transitions and unavailability events.
pub mod metrics;

/// The failover controller.
///
/// [`FailoverProvider`] routes commands to the active endpoint with
/// retry and circuit breaker protection, switches to the best healthy
/// endpoint on failure and fails back when a higher-weight endpoint
/// recovers.
pub mod provider;

/// Exponential-backoff retry.
///
/// Provides [`Retry`](retry::Retry), re-running failed commands for the
/// failure kinds a [`RetryConfig`] includes.
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use config::{
    CircuitBreakerConfig, EndpointConfig, FailoverConfig, InitializationPolicy, RetryConfig,
};
pub use error::{FailoverError, InitError, ValidationError};
pub use provider::{FailoverProvider, SwitchCallback, SwitchEvent, SwitchReason};

pub use switchover_core::{
    ClientConfig, CommandError, Connector, Endpoint, EndpointPool, ErrorKind, HealthCheckStrategy,
    HealthStatus, HealthStatusChange, PoolConfig, ProbeDecision, ProbePolicy, StrategyFactory,
};

/// The `switchover` prelude.
///
/// Provides convenient access to the most commonly used types:
///
/// ```rust
/// use switchover::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CommandError, Endpoint, EndpointConfig, ErrorKind, FailoverConfig, FailoverError,
        FailoverProvider,
    };
}
