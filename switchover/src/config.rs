//! Failover configuration and builders.
//!
//! All configuration objects are immutable once built; builders validate
//! at `build()` time and reject combinations the runtime cannot honor.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchover_core::{ClientConfig, Endpoint, ErrorKind, PoolConfig, StrategyFactory};

use crate::error::ValidationError;

/// Default maximum number of retry attempts including the initial call.
pub const RETRY_MAX_ATTEMPTS_DEFAULT: u32 = 3;

/// Default base wait duration between retry attempts.
pub const RETRY_WAIT_DURATION_DEFAULT: Duration = Duration::from_millis(500);

/// Default exponential backoff multiplier for retry wait duration.
pub const RETRY_BACKOFF_MULTIPLIER_DEFAULT: u32 = 2;

/// Default failure rate threshold percentage for opening the circuit.
pub const BREAKER_FAILURE_RATE_THRESHOLD_DEFAULT: f32 = 10.0;

/// Default minimum number of failures before the circuit can open.
pub const BREAKER_MIN_FAILURES_DEFAULT: u32 = 1000;

/// Default sliding window size for circuit breaker failure tracking.
pub const BREAKER_SLIDING_WINDOW_SIZE_DEFAULT: u32 = 2;

/// Default interval between failback opportunity checks.
pub const FAILBACK_INTERVAL_DEFAULT: Duration = Duration::from_secs(120);

/// Default grace period an endpoint stays demoted after going unhealthy.
pub const GRACE_PERIOD_DEFAULT: Duration = Duration::from_secs(60);

/// Default maximum number of failover attempts.
pub const MAX_FAILOVER_ATTEMPTS_DEFAULT: u32 = 10;

/// Default delay between failover attempts.
pub const FAILOVER_ATTEMPT_DELAY_DEFAULT: Duration = Duration::from_secs(12);

fn default_included_kinds() -> Vec<ErrorKind> {
    vec![ErrorKind::Connection, ErrorKind::Timeout]
}

/// Retry behavior for a single logical command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the initial call. 1 means
    /// no retry.
    pub max_attempts: u32,
    /// Base delay before the first retry (e.g., "500ms").
    #[serde(with = "humantime_serde")]
    pub wait_duration: Duration,
    /// Multiplier applied to the delay for each further retry: the delay
    /// before retry *n* is `wait_duration * multiplier^(n-1)`.
    pub backoff_multiplier: u32,
    /// Failure kinds that are retried.
    pub included_kinds: Vec<ErrorKind>,
    /// Failure kinds never retried, even when included.
    pub ignored_kinds: Vec<ErrorKind>,
}

impl RetryConfig {
    /// Create a builder with default values.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Whether a failure of `kind` qualifies for a retry.
    pub fn retries(&self, kind: ErrorKind) -> bool {
        self.included_kinds.contains(&kind) && !self.ignored_kinds.contains(&kind)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS_DEFAULT,
            wait_duration: RETRY_WAIT_DURATION_DEFAULT,
            backoff_multiplier: RETRY_BACKOFF_MULTIPLIER_DEFAULT,
            included_kinds: default_included_kinds(),
            ignored_kinds: Vec::new(),
        }
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Set the maximum number of attempts including the initial call.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Set the base delay before the first retry.
    pub fn wait_duration(mut self, wait_duration: Duration) -> Self {
        self.config.wait_duration = wait_duration;
        self
    }

    /// Set the exponential backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Set the failure kinds that are retried.
    pub fn included_kinds(mut self, kinds: impl Into<Vec<ErrorKind>>) -> Self {
        self.config.included_kinds = kinds.into();
        self
    }

    /// Set the failure kinds that are never retried.
    pub fn ignored_kinds(mut self, kinds: impl Into<Vec<ErrorKind>>) -> Self {
        self.config.ignored_kinds = kinds.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RetryConfig, ValidationError> {
        if self.config.max_attempts == 0 {
            return Err(ValidationError::ZeroRetryAttempts);
        }
        Ok(self.config)
    }
}

/// Sliding-window failure detection for one endpoint.
///
/// The circuit opens only when every non-zero threshold is exceeded: a
/// zero `min_failures` disables the count check, a zero
/// `failure_rate_threshold` disables the rate check, and the builder
/// rejects disabling both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure rate (percentage of the sliding window, `0.0..=100.0`)
    /// required to open the circuit. 0 disables the rate check.
    pub failure_rate_threshold: f32,
    /// Failure count required to open the circuit. 0 disables the count
    /// check.
    pub min_failures: u32,
    /// Number of most recent call outcomes considered while the circuit
    /// is closed.
    pub sliding_window_size: u32,
    /// Failure kinds recorded by the breaker.
    pub included_kinds: Vec<ErrorKind>,
    /// Failure kinds the breaker ignores entirely (neither success nor
    /// failure).
    pub ignored_kinds: Vec<ErrorKind>,
}

impl CircuitBreakerConfig {
    /// Create a builder with default values.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Whether a failure of `kind` counts toward the window.
    pub fn records(&self, kind: ErrorKind) -> bool {
        self.included_kinds.contains(&kind) && !self.ignored_kinds.contains(&kind)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: BREAKER_FAILURE_RATE_THRESHOLD_DEFAULT,
            min_failures: BREAKER_MIN_FAILURES_DEFAULT,
            sliding_window_size: BREAKER_SLIDING_WINDOW_SIZE_DEFAULT,
            included_kinds: default_included_kinds(),
            ignored_kinds: Vec::new(),
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure rate threshold percentage (`0.0..=100.0`).
    pub fn failure_rate_threshold(mut self, threshold: f32) -> Self {
        self.config.failure_rate_threshold = threshold;
        self
    }

    /// Set the minimum number of failures before the circuit can open.
    pub fn min_failures(mut self, min_failures: u32) -> Self {
        self.config.min_failures = min_failures;
        self
    }

    /// Set the sliding window size.
    pub fn sliding_window_size(mut self, size: u32) -> Self {
        self.config.sliding_window_size = size;
        self
    }

    /// Set the failure kinds recorded by the breaker.
    pub fn included_kinds(mut self, kinds: impl Into<Vec<ErrorKind>>) -> Self {
        self.config.included_kinds = kinds.into();
        self
    }

    /// Set the failure kinds the breaker ignores.
    pub fn ignored_kinds(mut self, kinds: impl Into<Vec<ErrorKind>>) -> Self {
        self.config.ignored_kinds = kinds.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<CircuitBreakerConfig, ValidationError> {
        let config = self.config;
        if config.min_failures == 0 && config.failure_rate_threshold == 0.0 {
            return Err(ValidationError::BothThresholdsZero);
        }
        if !(0.0..=100.0).contains(&config.failure_rate_threshold) {
            return Err(ValidationError::RateOutOfRange(
                config.failure_rate_threshold,
            ));
        }
        if config.sliding_window_size == 0 {
            return Err(ValidationError::ZeroWindow);
        }
        Ok(config)
    }
}

/// One endpoint participating in the failover set.
#[derive(Clone)]
pub struct EndpointConfig {
    /// The endpoint's network address.
    pub endpoint: Endpoint,
    /// Connection settings passed through to the connector.
    pub client: ClientConfig,
    /// Pool sizing passed through to the connector.
    pub pool: PoolConfig,
    /// Relative failover priority; higher wins. Default 1.0.
    pub weight: f32,
    /// Factory for this endpoint's health check strategy. `None`
    /// disables proactive monitoring: the endpoint is assumed healthy
    /// unless its circuit opens, and failback to it is manual.
    pub health_check: Option<StrategyFactory>,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("endpoint", &self.endpoint)
            .field("client", &self.client)
            .field("pool", &self.pool)
            .field("weight", &self.weight)
            .field("health_check", &self.health_check.as_ref().map(|_| "..."))
            .finish()
    }
}

impl EndpointConfig {
    /// Create a builder for `endpoint` with default settings.
    pub fn builder(endpoint: Endpoint) -> EndpointConfigBuilder {
        EndpointConfigBuilder {
            config: EndpointConfig {
                endpoint,
                client: ClientConfig::default(),
                pool: PoolConfig::default(),
                weight: 1.0,
                health_check: None,
            },
        }
    }
}

/// Builder for [`EndpointConfig`].
#[derive(Clone)]
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    /// Set the connection settings for this endpoint.
    pub fn client(mut self, client: ClientConfig) -> Self {
        self.config.client = client;
        self
    }

    /// Set the pool sizing for this endpoint.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    /// Set the relative failover priority; higher wins.
    pub fn weight(mut self, weight: f32) -> Self {
        self.config.weight = weight;
        self
    }

    /// Enable health checks with the given strategy factory.
    pub fn health_check(mut self, factory: StrategyFactory) -> Self {
        self.config.health_check = Some(factory);
        self
    }

    /// Disable health checks: the endpoint is assumed healthy unless its
    /// circuit opens, and failback to it must be manual.
    pub fn no_health_check(mut self) -> Self {
        self.config.health_check = None;
        self
    }

    /// Build the endpoint configuration.
    pub fn build(self) -> EndpointConfig {
        self.config
    }
}

/// How many endpoints must report healthy before provider construction
/// succeeds.
///
/// Evaluated once, against the first round of health checks across all
/// endpoints. Endpoints without health checks count as healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationPolicy {
    /// At least one endpoint must be healthy.
    OneAvailable,
    /// A strict majority of endpoints must be healthy.
    #[default]
    MajorityAvailable,
    /// Every endpoint must be healthy.
    AllAvailable,
}

impl InitializationPolicy {
    /// Number of healthy endpoints required out of `total`.
    pub fn required(self, total: usize) -> usize {
        match self {
            InitializationPolicy::OneAvailable => 1,
            InitializationPolicy::MajorityAvailable => total / 2 + 1,
            InitializationPolicy::AllAvailable => total,
        }
    }
}

/// Top-level failover configuration.
///
/// Holds the endpoint set (insertion order; priority is resolved at
/// runtime from weights) plus the retry, circuit breaker, failover and
/// failback parameters shared by all endpoints.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Configured endpoints, in insertion order.
    pub endpoints: Vec<EndpointConfig>,
    /// Retry policy applied to each command.
    pub retry: RetryConfig,
    /// Failure detector configuration applied per endpoint.
    pub breaker: CircuitBreakerConfig,
    /// Failure kinds that bypass retry and trigger immediate failover.
    pub fallback_kinds: Vec<ErrorKind>,
    /// Whether a command interrupted by a failover is re-run on the new
    /// endpoint.
    pub retry_on_failover: bool,
    /// Whether recovered higher-weight endpoints are promoted back
    /// automatically.
    pub failback_supported: bool,
    /// Interval between failback opportunity checks.
    pub failback_interval: Duration,
    /// Minimum time a demoted endpoint stays ineligible.
    pub grace_period: Duration,
    /// Whether connections to a demoted endpoint are severed immediately
    /// instead of drained.
    pub fast_failover: bool,
    /// Maximum number of failover attempts before calls fail terminally.
    pub max_failover_attempts: u32,
    /// Minimum delay between two failover attempts.
    pub failover_attempt_delay: Duration,
    /// Readiness condition evaluated at construction.
    pub initialization_policy: InitializationPolicy,
}

impl FailoverConfig {
    /// Create a builder with default values and no endpoints.
    pub fn builder() -> FailoverConfigBuilder {
        FailoverConfigBuilder::default()
    }
}

/// Builder for [`FailoverConfig`].
#[derive(Clone)]
pub struct FailoverConfigBuilder {
    config: FailoverConfig,
}

impl Default for FailoverConfigBuilder {
    fn default() -> Self {
        Self {
            config: FailoverConfig {
                endpoints: Vec::new(),
                retry: RetryConfig::default(),
                breaker: CircuitBreakerConfig::default(),
                fallback_kinds: Vec::new(),
                retry_on_failover: false,
                failback_supported: true,
                failback_interval: FAILBACK_INTERVAL_DEFAULT,
                grace_period: GRACE_PERIOD_DEFAULT,
                fast_failover: false,
                max_failover_attempts: MAX_FAILOVER_ATTEMPTS_DEFAULT,
                failover_attempt_delay: FAILOVER_ATTEMPT_DELAY_DEFAULT,
                initialization_policy: InitializationPolicy::default(),
            },
        }
    }
}

impl FailoverConfigBuilder {
    /// Add an endpoint to the failover set.
    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.config.endpoints.push(endpoint);
        self
    }

    /// Set the retry policy applied to each command.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the failure detector configuration.
    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    /// Set the failure kinds that bypass retry and fail over immediately.
    pub fn fallback_kinds(mut self, kinds: impl Into<Vec<ErrorKind>>) -> Self {
        self.config.fallback_kinds = kinds.into();
        self
    }

    /// Re-run commands interrupted by a failover on the new endpoint.
    pub fn retry_on_failover(mut self, enabled: bool) -> Self {
        self.config.retry_on_failover = enabled;
        self
    }

    /// Enable or disable automatic failback.
    pub fn failback_supported(mut self, supported: bool) -> Self {
        self.config.failback_supported = supported;
        self
    }

    /// Set the interval between failback opportunity checks.
    pub fn failback_interval(mut self, interval: Duration) -> Self {
        self.config.failback_interval = interval;
        self
    }

    /// Set the minimum time a demoted endpoint stays ineligible.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    /// Sever connections to a demoted endpoint immediately.
    pub fn fast_failover(mut self, fast: bool) -> Self {
        self.config.fast_failover = fast;
        self
    }

    /// Set the failover attempt budget.
    pub fn max_failover_attempts(mut self, attempts: u32) -> Self {
        self.config.max_failover_attempts = attempts;
        self
    }

    /// Set the minimum delay between failover attempts.
    pub fn failover_attempt_delay(mut self, delay: Duration) -> Self {
        self.config.failover_attempt_delay = delay;
        self
    }

    /// Set the readiness condition evaluated at construction.
    pub fn initialization_policy(mut self, policy: InitializationPolicy) -> Self {
        self.config.initialization_policy = policy;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<FailoverConfig, ValidationError> {
        if self.config.endpoints.is_empty() {
            return Err(ValidationError::NoEndpoints);
        }
        for (idx, ec) in self.config.endpoints.iter().enumerate() {
            if self.config.endpoints[..idx]
                .iter()
                .any(|other| other.endpoint == ec.endpoint)
            {
                return Err(ValidationError::DuplicateEndpoint(ec.endpoint.clone()));
            }
        }
        Ok(self.config)
    }
}
