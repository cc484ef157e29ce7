//! Health check scheduling.
//!
//! Each monitored endpoint gets one background task running probe rounds
//! against its [`HealthCheckStrategy`]. The latest verdict is published
//! through a watch channel; status transitions additionally fire a
//! callback so the failover controller can react without polling.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use switchover_core::{
    Endpoint, HealthCheckStrategy, HealthStatus, HealthStatusChange, ProbeDecision,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span};

/// Invoked from the probe task whenever an endpoint's status transitions.
pub type StatusCallback = Arc<dyn Fn(HealthStatusChange) + Send + Sync>;

/// Run one probe round and aggregate its outcomes.
async fn run_round(strategy: &dyn HealthCheckStrategy) -> HealthStatus {
    let policy = strategy.policy();
    let num_probes = strategy.num_probes().max(1);
    let mut successes = 0;
    let mut failures = 0;
    for probe in 0..num_probes {
        let healthy = match tokio::time::timeout(strategy.timeout(), strategy.probe()).await {
            Ok(status) => status.is_healthy(),
            Err(_) => false,
        };
        if healthy {
            successes += 1;
        } else {
            failures += 1;
        }
        match policy.evaluate(successes, failures, num_probes - probe - 1) {
            ProbeDecision::Success => return HealthStatus::Healthy,
            ProbeDecision::Fail => return HealthStatus::Unhealthy,
            ProbeDecision::Undecided => {}
        }
        tokio::time::sleep(strategy.delay_between_probes()).await;
    }
    HealthStatus::Unhealthy
}

/// Background health check for a single endpoint.
pub struct HealthCheck {
    status: watch::Receiver<HealthStatus>,
    max_round_duration: Duration,
    handle: JoinHandle<()>,
}

impl HealthCheck {
    /// Spawn the probe task for `endpoint`.
    pub fn start(
        endpoint: Endpoint,
        strategy: Box<dyn HealthCheckStrategy>,
        callback: StatusCallback,
    ) -> Self {
        let (tx, rx) = watch::channel(HealthStatus::Unknown);
        let max_round_duration = strategy.max_round_duration();
        let span = info_span!("health_check", endpoint = %endpoint);
        let task = async move {
            loop {
                let new = run_round(strategy.as_ref()).await;
                let old = *tx.borrow();
                if new != old {
                    debug!(?old, ?new, "health status changed");
                    let _ = tx.send(new);
                    callback(HealthStatusChange {
                        endpoint: endpoint.clone(),
                        old,
                        new,
                    });
                }
                tokio::time::sleep(strategy.interval()).await;
            }
        };
        let handle = tokio::spawn(task.instrument(span));
        Self {
            status: rx,
            max_round_duration,
            handle,
        }
    }

    /// Latest published status.
    pub fn status(&self) -> HealthStatus {
        *self.status.borrow()
    }

    /// Watch channel receiver and first-round deadline, for waiting on
    /// the initial verdict without holding the check itself.
    fn waiter(&self) -> (watch::Receiver<HealthStatus>, Duration) {
        (self.status.clone(), self.max_round_duration)
    }

    /// Abort the probe task.
    pub fn close(&self) {
        self.handle.abort();
    }
}

impl Drop for HealthCheck {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Wait on `rx` until a determined status arrives or the round deadline
/// passes, returning whatever is current at that point.
async fn await_determined(
    mut rx: watch::Receiver<HealthStatus>,
    bound: Duration,
) -> HealthStatus {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        let current = *rx.borrow_and_update();
        if current.is_determined() {
            return current;
        }
        match tokio::time::timeout_at(deadline, rx.changed()).await {
            Ok(Ok(())) => {}
            // Deadline hit or probe task gone.
            Ok(Err(_)) | Err(_) => return *rx.borrow(),
        }
    }
}

/// Registry of running health checks, keyed by endpoint.
#[derive(Default)]
pub struct HealthMonitor {
    checks: DashMap<Endpoint, HealthCheck>,
}

impl HealthMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring `endpoint`, replacing any previous check for it.
    pub fn watch(
        &self,
        endpoint: Endpoint,
        strategy: Box<dyn HealthCheckStrategy>,
        callback: StatusCallback,
    ) {
        let check = HealthCheck::start(endpoint.clone(), strategy, callback);
        self.checks.insert(endpoint, check);
    }

    /// Latest status of `endpoint`, or `None` when it is not monitored.
    pub fn status(&self, endpoint: &Endpoint) -> Option<HealthStatus> {
        self.checks.get(endpoint).map(|check| check.status())
    }

    /// Wait for the first determined status of `endpoint`, bounded by
    /// the strategy's round duration. Returns `None` when the endpoint
    /// is not monitored.
    pub async fn wait_for_determined(&self, endpoint: &Endpoint) -> Option<HealthStatus> {
        let waiter = self.checks.get(endpoint).map(|check| check.waiter());
        match waiter {
            Some((rx, bound)) => Some(await_determined(rx, bound).await),
            None => None,
        }
    }

    /// Stop monitoring `endpoint`.
    pub fn unwatch(&self, endpoint: &Endpoint) {
        if let Some((_, check)) = self.checks.remove(endpoint) {
            check.close();
        }
    }

    /// Stop all probe tasks.
    pub fn close(&self) {
        self.checks.clear();
    }
}
