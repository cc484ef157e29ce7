//! Scriptable in-memory connector and health strategy for controller
//! tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use switchover_core::{
    ClientConfig, CommandError, Connector, Endpoint, EndpointPool, ErrorKind, HealthCheckStrategy,
    HealthStatus, PoolConfig, ProbePolicy, StrategyFactory,
};

/// Per-endpoint behavior script shared between pool, strategy and test.
pub struct Script {
    probe_healthy: AtomicBool,
    fail_kind: Mutex<Option<ErrorKind>>,
    fail_next: AtomicU32,
    connect_fails: AtomicBool,
    pub commands: AtomicU32,
    pub probes: AtomicU32,
    pub disconnects: AtomicU32,
    pub closes: AtomicU32,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            probe_healthy: AtomicBool::new(true),
            fail_kind: Mutex::new(None),
            fail_next: AtomicU32::new(0),
            connect_fails: AtomicBool::new(false),
            commands: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        }
    }
}

impl Script {
    /// Every command fails with `kind` until [`succeed`](Self::succeed).
    pub fn fail_always(&self, kind: ErrorKind) {
        *self.fail_kind.lock().unwrap() = Some(kind);
    }

    /// The next `count` commands fail with `kind`, later ones succeed.
    pub fn fail_times(&self, count: u32, kind: ErrorKind) {
        *self.fail_kind.lock().unwrap() = Some(kind);
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Commands succeed again.
    pub fn succeed(&self) {
        *self.fail_kind.lock().unwrap() = None;
        self.fail_next.store(0, Ordering::SeqCst);
    }

    /// Set the verdict health probes report.
    pub fn set_probe_healthy(&self, healthy: bool) {
        self.probe_healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make `connect` fail for this endpoint.
    pub fn refuse_connect(&self) {
        self.connect_fails.store(true, Ordering::SeqCst);
    }

    fn next_command_error(&self) -> Option<CommandError> {
        let kind = (*self.fail_kind.lock().unwrap())?;
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            if self.fail_next.fetch_sub(1, Ordering::SeqCst) == 1 {
                *self.fail_kind.lock().unwrap() = None;
            }
            Some(CommandError::new(kind, "scripted failure"))
        } else {
            Some(CommandError::new(kind, "scripted failure"))
        }
    }
}

/// Pool double returning its endpoint label from successful commands.
pub struct TestPool {
    pub endpoint: Endpoint,
    pub script: Arc<Script>,
}

impl TestPool {
    /// The scripted command tests route through the provider.
    pub async fn call(&self) -> Result<String, CommandError> {
        self.script.commands.fetch_add(1, Ordering::SeqCst);
        match self.script.next_command_error() {
            Some(error) => Err(error),
            None => Ok(self.endpoint.label().to_string()),
        }
    }
}

#[async_trait]
impl EndpointPool for TestPool {
    async fn ping(&self) -> Result<(), CommandError> {
        if self.script.probe_healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CommandError::connection("scripted ping failure"))
        }
    }

    async fn force_disconnect(&self) {
        self.script.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector double handing out [`TestPool`]s over shared scripts.
#[derive(Clone, Default)]
pub struct TestConnector {
    scripts: Arc<DashMap<Endpoint, Arc<Script>>>,
}

impl TestConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The script for `endpoint`, created on first access.
    pub fn script(&self, endpoint: &Endpoint) -> Arc<Script> {
        self.scripts.entry(endpoint.clone()).or_default().clone()
    }

    /// Factory producing a [`TestStrategy`] bound to the endpoint's
    /// script. One probe per round, one round per second.
    pub fn strategy_factory(&self) -> StrategyFactory {
        let connector = self.clone();
        Arc::new(move |endpoint, _client| {
            Box::new(TestStrategy {
                script: connector.script(endpoint),
            })
        })
    }
}

#[async_trait]
impl Connector for TestConnector {
    type Pool = TestPool;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        _client: &ClientConfig,
        _pool: &PoolConfig,
    ) -> Result<Self::Pool, CommandError> {
        let script = self.script(endpoint);
        if script.connect_fails.load(Ordering::SeqCst) {
            return Err(CommandError::connection("scripted connect refusal"));
        }
        Ok(TestPool {
            endpoint: endpoint.clone(),
            script,
        })
    }
}

/// Strategy double reporting the script's probe verdict.
pub struct TestStrategy {
    script: Arc<Script>,
}

#[async_trait]
impl HealthCheckStrategy for TestStrategy {
    async fn probe(&self) -> HealthStatus {
        self.script.probes.fetch_add(1, Ordering::SeqCst);
        if self.script.probe_healthy.load(Ordering::SeqCst) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn num_probes(&self) -> u32 {
        1
    }

    fn delay_between_probes(&self) -> Duration {
        Duration::ZERO
    }

    fn policy(&self) -> ProbePolicy {
        ProbePolicy::AnySuccess
    }
}

/// Shorthand for a test endpoint on the default port.
pub fn endpoint(host: &str) -> Endpoint {
    Endpoint::new(host, 6379)
}
