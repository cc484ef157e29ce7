//! The failover controller.
//!
//! [`FailoverProvider`] owns one pool per configured endpoint and routes
//! every command to the current active endpoint, wrapping it in retry
//! and circuit breaker protection. When the active endpoint is declared
//! failed (circuit trip, health check verdict or explicit fallback
//! error) the highest-weight eligible endpoint takes over; a periodic
//! failback task later promotes recovered higher-weight endpoints.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use switchover_core::{
    CommandError, Connector, Endpoint, EndpointPool, HealthStatus, HealthStatusChange,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, info, info_span, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::{EndpointConfig, FailoverConfig};
use crate::error::{FailoverError, InitError, ValidationError};
use crate::health::HealthMonitor;
use crate::metrics;
use crate::retry::Retry;

/// What triggered an endpoint switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// The active endpoint's circuit breaker opened.
    CircuitBreaker,
    /// A health check declared the active endpoint unhealthy.
    HealthCheck,
    /// A recovered higher-weight endpoint was promoted back.
    Failback,
    /// The application switched manually.
    Forced,
}

impl SwitchReason {
    fn as_str(self) -> &'static str {
        match self {
            SwitchReason::CircuitBreaker => "circuit_breaker",
            SwitchReason::HealthCheck => "health_check",
            SwitchReason::Failback => "failback",
            SwitchReason::Forced => "forced",
        }
    }
}

/// Notification delivered to the switch listener after the active
/// endpoint changed.
#[derive(Debug, Clone)]
pub struct SwitchEvent {
    /// Endpoint that was active before, if any.
    pub from: Option<Endpoint>,
    /// Endpoint that is active now.
    pub to: Endpoint,
    /// What triggered the switch.
    pub reason: SwitchReason,
}

/// Invoked after every active endpoint switch.
pub type SwitchCallback = Arc<dyn Fn(SwitchEvent) + Send + Sync>;

/// Runtime state of one configured endpoint.
struct EndpointState<P> {
    config: EndpointConfig,
    pool: Arc<P>,
    breaker: CircuitBreaker,
    /// Demotion deadline: the endpoint is ineligible as a failover
    /// target until this instant passes.
    grace_until: Mutex<Option<Instant>>,
}

impl<P> EndpointState<P> {
    fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    fn in_grace(&self) -> bool {
        let grace = self.grace_until.lock().unwrap_or_else(|e| e.into_inner());
        grace.is_some_and(|until| Instant::now() < until)
    }

    /// Arm the grace period unless one is already running.
    fn arm_grace(&self, period: Duration) {
        let mut grace = self.grace_until.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if grace.is_some_and(|until| now < until) {
            return;
        }
        *grace = Some(now + period);
    }

    /// Restart the grace period, extending a running one if needed.
    fn restart_grace(&self, period: Duration) {
        let mut grace = self.grace_until.lock().unwrap_or_else(|e| e.into_inner());
        let until = Instant::now() + period;
        if grace.is_none_or(|current| current < until) {
            *grace = Some(until);
        }
    }

    fn clear_grace(&self) {
        let mut grace = self.grace_until.lock().unwrap_or_else(|e| e.into_inner());
        *grace = None;
    }
}

struct ProviderInner<C: Connector> {
    connector: C,
    config: FailoverConfig,
    retry: Retry,
    monitor: HealthMonitor,
    /// Configured endpoints in insertion order; order breaks weight ties.
    endpoints: RwLock<Vec<Arc<EndpointState<C::Pool>>>>,
    active: RwLock<Option<Arc<EndpointState<C::Pool>>>>,
    /// Consecutive failover attempts that found no healthy endpoint.
    failover_attempts: AtomicU32,
    /// While set and in the future, further failover attempts are
    /// rejected without consuming the attempt budget.
    freeze_until: Mutex<Option<Instant>>,
    /// Health callbacks are ignored until construction completed.
    initialized: AtomicBool,
    closed: AtomicBool,
    switch_listener: Mutex<Option<SwitchCallback>>,
    failback_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> ProviderInner<C> {
    fn ensure_open(&self) -> Result<(), FailoverError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(FailoverError::Closed)
        } else {
            Ok(())
        }
    }

    fn active_state(&self) -> Result<Arc<EndpointState<C::Pool>>, FailoverError> {
        self.ensure_open()?;
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(FailoverError::Closed)
    }

    fn state_of(&self, endpoint: &Endpoint) -> Option<Arc<EndpointState<C::Pool>>> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|state| state.endpoint() == endpoint)
            .cloned()
    }

    async fn open_endpoint(
        &self,
        config: EndpointConfig,
    ) -> Result<Arc<EndpointState<C::Pool>>, CommandError> {
        let pool = self
            .connector
            .connect(&config.endpoint, &config.client, &config.pool)
            .await?;
        Ok(Arc::new(EndpointState {
            config,
            pool: Arc::new(pool),
            breaker: CircuitBreaker::new(self.config.breaker.clone()),
            grace_until: Mutex::new(None),
        }))
    }

    /// Start the health check task for `config`, when it carries one.
    fn start_watch(self: &Arc<Self>, config: &EndpointConfig) {
        let Some(factory) = &config.health_check else {
            return;
        };
        let strategy = factory(&config.endpoint, &config.client);
        let weak = Arc::downgrade(self);
        self.monitor.watch(
            config.endpoint.clone(),
            strategy,
            Arc::new(move |change| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_health_change(change);
                }
            }),
        );
    }

    fn on_health_change(self: &Arc<Self>, change: HealthStatusChange) {
        metrics::record_health_transition(&change.endpoint.label(), change.new.is_healthy());
        if !self.initialized.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return;
        }
        if change.new != HealthStatus::Unhealthy {
            return;
        }
        let active = self
            .active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(active) = active {
            if active.endpoint() == &change.endpoint {
                if let Err(error) = self.switch_to_healthy(&active, SwitchReason::HealthCheck) {
                    warn!(endpoint = %change.endpoint, %error,
                        "active endpoint unhealthy, no failover target");
                }
                return;
            }
        }
        // A demoted endpoint that fails its probe restarts its grace
        // period, so a later recovery does not fail back immediately.
        if let Some(state) = self.state_of(&change.endpoint) {
            state.restart_grace(self.config.grace_period);
        }
    }

    /// Whether `state` currently rejects calls. A forced-open breaker
    /// moves into probation once the endpoint's grace period has passed;
    /// the next recorded outcome then closes or reopens it.
    fn rejects_calls(&self, state: &EndpointState<C::Pool>) -> bool {
        match state.breaker.state() {
            CircuitState::Open => true,
            CircuitState::ForcedOpen => {
                if state.in_grace() {
                    true
                } else {
                    state.breaker.half_open();
                    false
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => false,
        }
    }

    /// Whether `state` may be picked as a failover target.
    fn eligible(&self, state: &EndpointState<C::Pool>) -> bool {
        if state.in_grace() {
            return false;
        }
        // Unmonitored endpoints are assumed healthy.
        self.monitor
            .status(state.endpoint())
            .is_none_or(|status| status.is_healthy())
    }

    fn best_candidate(&self, exclude: Option<&Endpoint>) -> Option<Arc<EndpointState<C::Pool>>> {
        let endpoints = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        let mut best: Option<&Arc<EndpointState<C::Pool>>> = None;
        for state in endpoints.iter() {
            if exclude.is_some_and(|e| e == state.endpoint()) {
                continue;
            }
            if !self.eligible(state) {
                continue;
            }
            if best.is_none_or(|b| state.config.weight > b.config.weight) {
                best = Some(state);
            }
        }
        best.cloned()
    }

    /// Demote `from` and promote the best eligible endpoint.
    fn switch_to_healthy(
        &self,
        from: &Arc<EndpointState<C::Pool>>,
        reason: SwitchReason,
    ) -> Result<Arc<EndpointState<C::Pool>>, FailoverError> {
        // Another caller may already have switched away.
        if let Some(current) = self
            .active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            if current.endpoint() != from.endpoint() {
                return Ok(current);
            }
        }
        from.breaker.force_open();
        from.arm_grace(self.config.grace_period);
        if self.config.fast_failover {
            let pool = from.pool.clone();
            tokio::spawn(async move {
                pool.force_disconnect().await;
            });
        }
        match self.best_candidate(Some(from.endpoint())) {
            Some(next) => {
                next.breaker.transition_to_closed();
                self.set_active(next.clone(), reason);
                Ok(next)
            }
            None => Err(self.no_healthy_available()),
        }
    }

    /// Consume one unit of the failover attempt budget, or report it
    /// exhausted. While the freeze window is armed no budget is spent.
    fn no_healthy_available(&self) -> FailoverError {
        metrics::record_unavailable();
        if self.failover_attempts.load(Ordering::SeqCst) > self.config.max_failover_attempts {
            return FailoverError::PermanentlyUnavailable;
        }
        let mut freeze = self.freeze_until.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if freeze.is_some_and(|until| now < until) {
            return FailoverError::TemporarilyUnavailable;
        }
        let attempts = self.failover_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > self.config.max_failover_attempts {
            warn!(attempts, "failover attempts exhausted");
            FailoverError::PermanentlyUnavailable
        } else {
            *freeze = Some(now + self.config.failover_attempt_delay);
            warn!(attempts, "no healthy endpoint available, freezing failover");
            FailoverError::TemporarilyUnavailable
        }
    }

    fn set_active(&self, next: Arc<EndpointState<C::Pool>>, reason: SwitchReason) {
        let from = {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            let from = active.take().map(|state| state.endpoint().clone());
            *active = Some(next.clone());
            from
        };
        self.failover_attempts.store(0, Ordering::SeqCst);
        *self.freeze_until.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!(
            ?from,
            to = %next.endpoint(),
            reason = reason.as_str(),
            "active endpoint switched",
        );
        metrics::record_switch(reason.as_str());
        let listener = self
            .switch_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(SwitchEvent {
                from,
                to: next.endpoint().clone(),
                reason,
            });
        }
    }

    /// Promote a recovered endpoint whose weight beats the active one.
    fn try_failback(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let active = self
            .active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(active) = active else {
            return;
        };
        let candidates: Vec<_> = self
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut best: Option<Arc<EndpointState<C::Pool>>> = None;
        for state in candidates {
            if state.endpoint() == active.endpoint() {
                continue;
            }
            if state.config.weight <= active.config.weight {
                continue;
            }
            if state.in_grace() {
                continue;
            }
            // Failback only follows positive health verdicts; endpoints
            // without health checks are promoted back manually.
            let Some(status) = self.monitor.status(state.endpoint()) else {
                continue;
            };
            if !status.is_healthy() {
                continue;
            }
            if best
                .as_ref()
                .is_none_or(|b| state.config.weight > b.config.weight)
            {
                best = Some(state);
            }
        }
        if let Some(next) = best {
            next.breaker.transition_to_closed();
            self.set_active(next, SwitchReason::Failback);
        }
    }
}

/// Weighted multi-endpoint failover controller.
///
/// Cloning is cheap and shares all state.
pub struct FailoverProvider<C: Connector> {
    inner: Arc<ProviderInner<C>>,
}

impl<C: Connector> Clone for FailoverProvider<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> fmt::Debug for FailoverProvider<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverProvider")
            .field("active", &self.active_endpoint())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> FailoverProvider<C> {
    /// Open pools for every configured endpoint, run the first health
    /// check round and verify the initialization policy, then start the
    /// failback task.
    pub async fn new(connector: C, config: FailoverConfig) -> Result<Self, InitError> {
        if config.endpoints.is_empty() {
            return Err(ValidationError::NoEndpoints.into());
        }
        // Fallback kinds bypass retry by construction.
        let mut retry_config = config.retry.clone();
        for kind in &config.fallback_kinds {
            if !retry_config.ignored_kinds.contains(kind) {
                retry_config.ignored_kinds.push(*kind);
            }
        }
        let endpoint_configs = config.endpoints.clone();
        let inner = Arc::new(ProviderInner {
            connector,
            retry: Retry::new(retry_config),
            monitor: HealthMonitor::new(),
            endpoints: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            failover_attempts: AtomicU32::new(0),
            freeze_until: Mutex::new(None),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            switch_listener: Mutex::new(None),
            failback_task: Mutex::new(None),
            config,
        });

        for endpoint_config in endpoint_configs {
            let endpoint = endpoint_config.endpoint.clone();
            let state = inner
                .open_endpoint(endpoint_config)
                .await
                .map_err(|source| InitError::Connect { endpoint, source })?;
            inner
                .endpoints
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push(state.clone());
            inner.start_watch(&state.config);
        }

        Self::await_initial_health(&inner).await?;

        let active = inner
            .best_candidate(None)
            .ok_or_else(|| InitError::PolicyUnmet {
                healthy: 0,
                required: 1,
                total: inner
                    .endpoints
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .len(),
            })?;
        info!(endpoint = %active.endpoint(), "failover provider initialized");
        *inner.active.write().unwrap_or_else(|e| e.into_inner()) = Some(active);
        inner.initialized.store(true, Ordering::SeqCst);

        if inner.config.failback_supported {
            let weak = Arc::downgrade(&inner);
            let interval = inner.config.failback_interval;
            let handle = tokio::spawn(
                failback_loop(weak, interval).instrument(info_span!("failback")),
            );
            *inner
                .failback_task
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }

        Ok(Self { inner })
    }

    /// Collect first-round verdicts and check the initialization policy.
    async fn await_initial_health(inner: &Arc<ProviderInner<C>>) -> Result<(), InitError> {
        let endpoints: Vec<Endpoint> = inner
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|state| state.endpoint().clone())
            .collect();
        let total = endpoints.len();
        let mut healthy = 0;
        let mut undetermined: Option<Endpoint> = None;
        for endpoint in endpoints {
            match inner.monitor.wait_for_determined(&endpoint).await {
                // Endpoints without a health check count as healthy.
                None => healthy += 1,
                Some(status) => {
                    if status.is_healthy() {
                        healthy += 1;
                    } else if !status.is_determined() {
                        undetermined.get_or_insert(endpoint);
                    }
                }
            }
        }
        let required = inner.config.initialization_policy.required(total);
        if healthy < required {
            if let Some(endpoint) = undetermined {
                return Err(InitError::HealthCheckTimeout(endpoint));
            }
            return Err(InitError::PolicyUnmet {
                healthy,
                required,
                total,
            });
        }
        Ok(())
    }

    /// Execute a command against the active endpoint.
    ///
    /// The command closure receives the active endpoint's pool and may
    /// be invoked several times: by retry, and again after a failover
    /// when `retry_on_failover` is enabled.
    pub async fn run<T, F, Fut>(&self, mut command: F) -> Result<T, FailoverError>
    where
        F: FnMut(Arc<C::Pool>) -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let inner = &self.inner;
        loop {
            let state = inner.active_state()?;
            if inner.rejects_calls(&state) {
                let endpoint = state.endpoint().clone();
                metrics::record_circuit_open(&endpoint.label());
                inner.switch_to_healthy(&state, SwitchReason::CircuitBreaker)?;
                if inner.config.retry_on_failover {
                    continue;
                }
                return Err(FailoverError::CircuitOpen(endpoint));
            }
            let pool = state.pool.clone();
            match inner.retry.execute(|| command(pool.clone())).await {
                Ok(value) => {
                    state.breaker.record_success();
                    return Ok(value);
                }
                Err(error) => {
                    state.breaker.record_failure(error.kind());
                    if inner.config.fallback_kinds.contains(&error.kind()) {
                        inner.switch_to_healthy(&state, SwitchReason::CircuitBreaker)?;
                        if inner.config.retry_on_failover {
                            continue;
                        }
                    }
                    return Err(FailoverError::Command(error));
                }
            }
        }
    }

    /// The currently active endpoint.
    pub fn active_endpoint(&self) -> Option<Endpoint> {
        self.inner
            .active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|state| state.endpoint().clone())
    }

    /// All configured endpoints, in insertion order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.inner
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|state| state.endpoint().clone())
            .collect()
    }

    /// Health of one endpoint, or `None` when it is not configured.
    ///
    /// Monitored endpoints report their latest probe verdict; endpoints
    /// without a health check report their circuit breaker state.
    pub fn is_healthy(&self, endpoint: &Endpoint) -> Option<bool> {
        let state = self.inner.state_of(endpoint)?;
        match self.inner.monitor.status(endpoint) {
            Some(status) => Some(status.is_healthy()),
            None => Some(!state.breaker.is_open()),
        }
    }

    /// Switch to `endpoint`, validating that it is healthy and out of
    /// its grace period.
    pub fn set_active_endpoint(&self, endpoint: &Endpoint) -> Result<(), FailoverError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let state = inner
            .state_of(endpoint)
            .ok_or_else(|| ValidationError::UnknownEndpoint(endpoint.clone()))?;
        if self.active_endpoint().as_ref() == Some(endpoint) {
            return Ok(());
        }
        if !inner.eligible(&state) {
            return Err(ValidationError::UnhealthyEndpoint(endpoint.clone()).into());
        }
        state.breaker.transition_to_closed();
        inner.set_active(state, SwitchReason::Forced);
        Ok(())
    }

    /// Switch to `endpoint` unconditionally, clearing its grace period
    /// and circuit breaker, and pin the choice for `pin`: every other
    /// endpoint gets its grace period restarted for that duration, so
    /// neither failback nor failover moves traffic off the pinned
    /// endpoint until the window passes.
    pub fn force_active_endpoint(
        &self,
        endpoint: &Endpoint,
        pin: Duration,
    ) -> Result<(), FailoverError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let state = inner
            .state_of(endpoint)
            .ok_or_else(|| ValidationError::UnknownEndpoint(endpoint.clone()))?;
        state.clear_grace();
        state.breaker.transition_to_closed();
        let others: Vec<_> = inner
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.endpoint() != endpoint)
            .cloned()
            .collect();
        for other in others {
            other.restart_grace(pin);
        }
        if self.active_endpoint().as_ref() == Some(endpoint) {
            return Ok(());
        }
        inner.set_active(state, SwitchReason::Forced);
        Ok(())
    }

    /// Add an endpoint to the running provider.
    pub async fn add_endpoint(&self, config: EndpointConfig) -> Result<(), FailoverError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        if inner.state_of(&config.endpoint).is_some() {
            return Err(ValidationError::DuplicateEndpoint(config.endpoint).into());
        }
        let state = inner
            .open_endpoint(config)
            .await
            .map_err(FailoverError::Command)?;
        {
            let mut endpoints = inner.endpoints.write().unwrap_or_else(|e| e.into_inner());
            if endpoints
                .iter()
                .any(|existing| existing.endpoint() == state.endpoint())
            {
                return Err(ValidationError::DuplicateEndpoint(state.endpoint().clone()).into());
            }
            endpoints.push(state.clone());
        }
        inner.start_watch(&state.config);
        Ok(())
    }

    /// Remove an endpoint, failing over away from it first when it is
    /// active.
    pub async fn remove_endpoint(&self, endpoint: &Endpoint) -> Result<(), FailoverError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let state = inner
            .state_of(endpoint)
            .ok_or_else(|| ValidationError::UnknownEndpoint(endpoint.clone()))?;
        {
            let endpoints = inner.endpoints.read().unwrap_or_else(|e| e.into_inner());
            if endpoints.len() == 1 {
                return Err(ValidationError::LastEndpoint.into());
            }
        }
        if self.active_endpoint().as_ref() == Some(endpoint) {
            inner.switch_to_healthy(&state, SwitchReason::Forced)?;
        }
        inner.monitor.unwatch(endpoint);
        {
            let mut endpoints = inner.endpoints.write().unwrap_or_else(|e| e.into_inner());
            endpoints.retain(|existing| existing.endpoint() != endpoint);
        }
        state.pool.close().await;
        Ok(())
    }

    /// Install the switch listener, replacing any previous one.
    pub fn on_switch(&self, listener: SwitchCallback) {
        *self
            .inner
            .switch_listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Stop health checks and the failback task and close all pools.
    /// Further commands fail with [`FailoverError::Closed`].
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = inner
            .failback_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        inner.monitor.close();
        inner
            .active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let states: Vec<_> = inner
            .endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for state in states {
            state.pool.close().await;
        }
        info!("failover provider closed");
    }
}

async fn failback_loop<C: Connector>(inner: Weak<ProviderInner<C>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick fires immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        inner.try_failback();
    }
}
