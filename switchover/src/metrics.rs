//! Metrics declaration and initialization.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of endpoint switches.
    pub static ref ENDPOINT_SWITCH_COUNTER: &'static str = {
        metrics::describe_counter!(
            "switchover_endpoint_switches_total",
            "Total number of active endpoint switches."
        );
        "switchover_endpoint_switches_total"
    };
    /// Track number of calls rejected by an open circuit.
    pub static ref CIRCUIT_OPEN_COUNTER: &'static str = {
        metrics::describe_counter!(
            "switchover_circuit_open_total",
            "Total number of calls rejected by an open circuit breaker."
        );
        "switchover_circuit_open_total"
    };
    /// Track number of health status transitions.
    pub static ref HEALTH_TRANSITION_COUNTER: &'static str = {
        metrics::describe_counter!(
            "switchover_health_transitions_total",
            "Total number of endpoint health status transitions."
        );
        "switchover_health_transitions_total"
    };
    /// Track number of calls that found no healthy endpoint.
    pub static ref UNAVAILABLE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "switchover_unavailable_total",
            "Total number of calls that found no healthy endpoint."
        );
        "switchover_unavailable_total"
    };
}

/// Record an active endpoint switch with its trigger as a label.
///
/// When the `metrics` feature is disabled, this function is a no-op
/// and will be eliminated by the compiler.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_switch(reason: &'static str) {
    metrics::counter!(*ENDPOINT_SWITCH_COUNTER, "reason" => reason).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_switch(_reason: &'static str) {}

/// Record a call rejected because the active circuit was open.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_circuit_open(endpoint: &str) {
    metrics::counter!(*CIRCUIT_OPEN_COUNTER, "endpoint" => endpoint.to_string()).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_circuit_open(_endpoint: &str) {}

/// Record an endpoint health status transition.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_health_transition(endpoint: &str, healthy: bool) {
    metrics::counter!(
        *HEALTH_TRANSITION_COUNTER,
        "endpoint" => endpoint.to_string(),
        "healthy" => healthy.to_string()
    )
    .increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_health_transition(_endpoint: &str, _healthy: bool) {}

/// Record a call that found no healthy endpoint to fail over to.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_unavailable() {
    metrics::counter!(*UNAVAILABLE_COUNTER).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_unavailable() {}
