//! Health probing abstractions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::connector::ClientConfig;
use crate::endpoint::Endpoint;

/// Health of one endpoint as seen by its probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// No probe round has completed yet.
    #[default]
    Unknown,
    /// The last probe round passed.
    Healthy,
    /// The last probe round failed.
    Unhealthy,
}

impl HealthStatus {
    /// True only for [`HealthStatus::Healthy`].
    pub fn is_healthy(self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// True once the first probe round has completed.
    pub fn is_determined(self) -> bool {
        !matches!(self, HealthStatus::Unknown)
    }
}

/// Emitted when an endpoint's health status transitions.
#[derive(Debug, Clone)]
pub struct HealthStatusChange {
    /// The endpoint whose status changed.
    pub endpoint: Endpoint,
    /// Status before the change.
    pub old: HealthStatus,
    /// Status after the change.
    pub new: HealthStatus,
}

/// Verdict of a [`ProbePolicy`] after one probe outcome was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDecision {
    /// The round concluded: the endpoint is healthy.
    Success,
    /// The round concluded: the endpoint is unhealthy.
    Fail,
    /// More probes are needed.
    Undecided,
}

/// How individual probe outcomes within one round aggregate into a
/// health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbePolicy {
    /// Every probe of the round must succeed.
    AllSuccess,
    /// A single successful probe concludes the round as healthy.
    AnySuccess,
    /// A strict majority of the round's probes decides.
    #[default]
    Majority,
}

impl ProbePolicy {
    /// Evaluate the round after another probe outcome was recorded.
    ///
    /// Decides as early as the remaining probes can no longer change the
    /// verdict.
    pub fn evaluate(self, successes: u32, failures: u32, remaining: u32) -> ProbeDecision {
        match self {
            ProbePolicy::AllSuccess => {
                if failures > 0 {
                    ProbeDecision::Fail
                } else if remaining == 0 {
                    ProbeDecision::Success
                } else {
                    ProbeDecision::Undecided
                }
            }
            ProbePolicy::AnySuccess => {
                if successes > 0 {
                    ProbeDecision::Success
                } else if remaining == 0 {
                    ProbeDecision::Fail
                } else {
                    ProbeDecision::Undecided
                }
            }
            ProbePolicy::Majority => {
                let total = successes + failures + remaining;
                let needed = total / 2 + 1;
                if successes >= needed {
                    ProbeDecision::Success
                } else if failures >= needed || successes + remaining < needed {
                    ProbeDecision::Fail
                } else {
                    ProbeDecision::Undecided
                }
            }
        }
    }
}

/// Pluggable probe for one endpoint.
///
/// A strategy owns whatever client state it needs (its own connection,
/// an HTTP client for a REST-based check, ...) and reports a verdict per
/// probe. Scheduling parameters live on the strategy, not in the
/// controller configuration: different endpoints may probe at different
/// rhythms.
///
/// One round consists of up to [`num_probes`](Self::num_probes) probes,
/// each bounded by [`timeout`](Self::timeout), separated by
/// [`delay_between_probes`](Self::delay_between_probes) and aggregated
/// by [`policy`](Self::policy). Rounds start every
/// [`interval`](Self::interval).
#[async_trait]
pub trait HealthCheckStrategy: Send + Sync + 'static {
    /// Execute a single probe.
    async fn probe(&self) -> HealthStatus;

    /// Time between the start of two probe rounds.
    fn interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Deadline for a single probe.
    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Maximum number of probes per round. Must be at least 1.
    fn num_probes(&self) -> u32 {
        3
    }

    /// Pause between two probes of the same round.
    fn delay_between_probes(&self) -> Duration {
        Duration::from_millis(200)
    }

    /// How the round's probe outcomes aggregate into the verdict.
    fn policy(&self) -> ProbePolicy {
        ProbePolicy::default()
    }

    /// Upper bound on the duration of one full round.
    ///
    /// Used to bound waits for the first determined status.
    fn max_round_duration(&self) -> Duration {
        (self.timeout() + self.delay_between_probes()) * self.num_probes()
    }
}

/// Factory producing a [`HealthCheckStrategy`] bound to one endpoint.
///
/// Endpoints without a factory are assumed healthy unless their circuit
/// breaker opens, and never fail back automatically.
pub type StrategyFactory =
    Arc<dyn Fn(&Endpoint, &ClientConfig) -> Box<dyn HealthCheckStrategy> + Send + Sync>;
