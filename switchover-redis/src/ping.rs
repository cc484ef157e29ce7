//! `PING`-based health check strategy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use switchover_core::{
    ClientConfig, Endpoint, HealthCheckStrategy, HealthStatus, ProbePolicy, StrategyFactory,
};
use tracing::debug;

use crate::connector::connection_info;
use crate::pool::RedisPool;

/// Health check strategy probing an endpoint with `PING`.
///
/// Each strategy owns a dedicated [`RedisPool`], so probes never share a
/// connection with application traffic: a wedged data connection cannot
/// mask an unhealthy endpoint, and probes cannot be queued behind slow
/// commands.
pub struct PingStrategy {
    pool: Option<RedisPool>,
    interval: Duration,
    timeout: Duration,
    num_probes: u32,
    delay_between_probes: Duration,
    policy: ProbePolicy,
}

impl PingStrategy {
    /// Create a strategy probing `endpoint` with default scheduling.
    pub fn new(endpoint: &Endpoint, client: &ClientConfig) -> Self {
        let pool = match connection_info(endpoint, client).and_then(Client::open) {
            Ok(redis_client) => Some(RedisPool::new(
                redis_client,
                client.connect_timeout,
                client.command_timeout,
            )),
            Err(error) => {
                debug!(%endpoint, %error, "invalid connection parameters, probes will fail");
                None
            }
        };
        Self {
            pool,
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
            num_probes: 3,
            delay_between_probes: Duration::from_millis(200),
            policy: ProbePolicy::default(),
        }
    }

    /// A [`StrategyFactory`] producing a default `PingStrategy` per
    /// endpoint.
    pub fn factory() -> StrategyFactory {
        Arc::new(|endpoint, client| Box::new(PingStrategy::new(endpoint, client)))
    }

    /// A [`StrategyFactory`] with custom scheduling applied to every
    /// produced strategy.
    pub fn factory_with<F>(customize: F) -> StrategyFactory
    where
        F: Fn(PingStrategy) -> PingStrategy + Send + Sync + 'static,
    {
        Arc::new(move |endpoint, client| {
            Box::new(customize(PingStrategy::new(endpoint, client)))
        })
    }

    /// Set the time between probe rounds.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-probe deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of probes per round.
    pub fn num_probes(mut self, num_probes: u32) -> Self {
        self.num_probes = num_probes;
        self
    }

    /// Set the pause between probes of one round.
    pub fn delay_between_probes(mut self, delay: Duration) -> Self {
        self.delay_between_probes = delay;
        self
    }

    /// Set how probe outcomes aggregate into the round verdict.
    pub fn policy(mut self, policy: ProbePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl HealthCheckStrategy for PingStrategy {
    async fn probe(&self) -> HealthStatus {
        let Some(pool) = &self.pool else {
            return HealthStatus::Unhealthy;
        };
        match switchover_core::EndpointPool::ping(pool).await {
            Ok(()) => HealthStatus::Healthy,
            Err(error) => {
                debug!(%error, "ping probe failed");
                HealthStatus::Unhealthy
            }
        }
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn num_probes(&self) -> u32 {
        self.num_probes
    }

    fn delay_between_probes(&self) -> Duration {
        self.delay_between_probes
    }

    fn policy(&self) -> ProbePolicy {
        self.policy
    }
}
