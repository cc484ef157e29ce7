//! Per-endpoint circuit breaker with a count-based sliding window.

use std::sync::Mutex;

use switchover_core::ErrorKind;
use tracing::debug;

use crate::config::CircuitBreakerConfig;

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; outcomes are recorded in the sliding window.
    Closed,
    /// Calls are rejected; the breaker tripped on its thresholds.
    Open,
    /// Calls are rejected; the breaker was opened by a failover and
    /// stays open until explicitly released.
    ForcedOpen,
    /// Probation after a recovery signal: the next recorded outcome
    /// decides between [`Closed`](CircuitState::Closed) and
    /// [`Open`](CircuitState::Open).
    HalfOpen,
}

#[derive(Debug)]
struct Window {
    /// Ring of recent outcomes, `true` meaning failure.
    outcomes: Vec<bool>,
    head: usize,
    filled: usize,
    failures: u32,
}

impl Window {
    fn new(size: u32) -> Self {
        Self {
            outcomes: vec![false; size as usize],
            head: 0,
            filled: 0,
            failures: 0,
        }
    }

    fn record(&mut self, failure: bool) {
        if self.filled == self.outcomes.len() && self.outcomes[self.head] {
            self.failures -= 1;
        }
        self.outcomes[self.head] = failure;
        self.head = (self.head + 1) % self.outcomes.len();
        self.filled = (self.filled + 1).min(self.outcomes.len());
        if failure {
            self.failures += 1;
        }
    }

    fn failure_rate(&self) -> f32 {
        if self.filled == 0 {
            0.0
        } else {
            self.failures as f32 * 100.0 / self.filled as f32
        }
    }

    fn reset(&mut self) {
        self.outcomes.fill(false);
        self.head = 0;
        self.filled = 0;
        self.failures = 0;
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    window: Window,
}

/// Count-based sliding-window failure detector for one endpoint.
///
/// Trips when every enabled threshold is exceeded at once: the failure
/// count must reach `min_failures` (when non-zero) and the failure rate
/// over the window must reach `failure_rate_threshold` (when non-zero).
/// A rate-only breaker waits for a full window before evaluating.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker from a configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = Window::new(config.sliding_window_size);
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Whether calls are currently rejected.
    pub fn is_open(&self) -> bool {
        matches!(self.state(), CircuitState::Open | CircuitState::ForcedOpen)
    }

    /// Record a successful call. During probation this closes the
    /// breaker and clears the window.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => inner.window.record(false),
            CircuitState::HalfOpen => {
                inner.window.reset();
                inner.state = CircuitState::Closed;
                debug!("circuit closed after successful probe");
            }
            CircuitState::Open | CircuitState::ForcedOpen => {}
        }
    }

    /// Record a failed call of `kind`. Returns `true` when this call
    /// tripped the breaker open.
    pub fn record_failure(&self, kind: ErrorKind) -> bool {
        if !self.config.records(kind) {
            return false;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => {
                inner.window.record(true);
                if self.thresholds_exceeded(&inner.window) {
                    inner.state = CircuitState::Open;
                    debug!(
                        failures = inner.window.failures,
                        rate = inner.window.failure_rate(),
                        "circuit opened",
                    );
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                debug!("circuit reopened after failed probe");
                true
            }
            CircuitState::Open | CircuitState::ForcedOpen => false,
        }
    }

    /// Force the breaker open, clearing the window. Used when the
    /// endpoint is demoted by a failover.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.window.reset();
        inner.state = CircuitState::ForcedOpen;
    }

    /// Move an open breaker into probation. No-op while closed.
    pub fn half_open(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(inner.state, CircuitState::Open | CircuitState::ForcedOpen) {
            inner.state = CircuitState::HalfOpen;
        }
    }

    /// Close the breaker unconditionally, clearing the window.
    pub fn transition_to_closed(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.window.reset();
        inner.state = CircuitState::Closed;
    }

    fn thresholds_exceeded(&self, window: &Window) -> bool {
        if window.failures == 0 {
            return false;
        }
        let count_met =
            self.config.min_failures == 0 || window.failures >= self.config.min_failures;
        let rate_met = if self.config.failure_rate_threshold == 0.0 {
            true
        } else if self.config.min_failures == 0 && window.filled < window.outcomes.len() {
            // Rate-only breakers wait for a full window so a single
            // early failure cannot read as a 100% rate.
            false
        } else {
            window.failure_rate() >= self.config.failure_rate_threshold
        };
        count_met && rate_met
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(rate: f32, min_failures: u32, window: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_rate_threshold(rate)
                .min_failures(min_failures)
                .sliding_window_size(window)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn opens_when_both_thresholds_met() {
        let cb = breaker(50.0, 2, 4);
        cb.record_failure(ErrorKind::Connection);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.record_failure(ErrorKind::Connection));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn successes_keep_rate_below_threshold() {
        let cb = breaker(75.0, 2, 4);
        cb.record_success();
        cb.record_success();
        cb.record_failure(ErrorKind::Connection);
        cb.record_failure(ErrorKind::Connection);
        // 2 failures meet the count but the rate is 50%.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn rate_only_waits_for_full_window() {
        let cb = breaker(50.0, 0, 4);
        cb.record_failure(ErrorKind::Connection);
        cb.record_failure(ErrorKind::Connection);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_success();
        cb.record_failure(ErrorKind::Connection);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn unrecorded_kind_is_ignored() {
        let cb = breaker(50.0, 1, 2);
        assert!(!cb.record_failure(ErrorKind::Server));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_decides() {
        let cb = breaker(50.0, 1, 2);
        cb.record_failure(ErrorKind::Connection);
        assert!(cb.is_open());
        cb.half_open();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure(ErrorKind::Connection);
        cb.half_open();
        assert!(cb.record_failure(ErrorKind::Timeout));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn forced_open_rejects_until_released() {
        let cb = breaker(50.0, 1, 2);
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::ForcedOpen);
        assert!(!cb.record_failure(ErrorKind::Connection));
        cb.transition_to_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn window_evicts_oldest_outcome() {
        let cb = breaker(100.0, 3, 3);
        cb.record_failure(ErrorKind::Connection);
        cb.record_failure(ErrorKind::Connection);
        cb.record_success();
        cb.record_failure(ErrorKind::Connection);
        // Window is [failure, success, failure]: rate 66%.
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
