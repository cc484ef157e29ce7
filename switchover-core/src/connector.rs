//! Connection collaborator traits.
//!
//! The failover controller treats connections as opaque: all it needs
//! from a binding is a way to open a per-endpoint pool, a cheap liveness
//! operation on it, and control over how the pool is torn down during a
//! switch.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::endpoint::Endpoint;
use crate::error::CommandError;

/// Connection settings for one endpoint, passed through to the binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Username for AUTH, if the server requires one.
    #[serde(default)]
    pub username: Option<SmolStr>,
    /// Password for AUTH.
    #[serde(default)]
    pub password: Option<SmolStr>,
    /// Logical database index to select after connecting.
    #[serde(default)]
    pub database: i64,
    /// Deadline for establishing a connection (e.g., "250ms", "2s").
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    /// Per-command socket deadline (e.g., "500ms", "1s").
    #[serde(default, with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
    /// Whether to wrap connections in TLS.
    #[serde(default)]
    pub tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            database: 0,
            connect_timeout: Some(Duration::from_secs(2)),
            command_timeout: None,
            tls: false,
        }
    }
}

/// Pool sizing for one endpoint, passed through to the binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live connections to the endpoint.
    pub max_size: u32,
    /// Connections kept open while idle.
    pub min_idle: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            min_idle: 0,
        }
    }
}

/// Per-endpoint connection pool.
///
/// The controller routes all traffic for an endpoint through one value
/// of this type and uses it for connection validation when switching.
#[async_trait]
pub trait EndpointPool: Send + Sync + 'static {
    /// Cheap liveness operation (PING or equivalent).
    ///
    /// Used to validate a target endpoint before routing traffic to it.
    async fn ping(&self) -> Result<(), CommandError>;

    /// Immediately sever all live connections.
    ///
    /// Called on the pool being left behind when fast failover is
    /// enabled; in-flight operations on it are expected to fail.
    async fn force_disconnect(&self);

    /// Release the pool's resources, letting in-flight operations drain.
    async fn close(&self);
}

/// Opens [`EndpointPool`]s for endpoints.
///
/// Implemented by client bindings (`switchover-redis` provides one over
/// the `redis` crate); the controller holds exactly one connector and
/// asks it for a pool per configured endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Pool type produced by this connector.
    type Pool: EndpointPool;

    /// Open a pool for `endpoint`.
    ///
    /// Bindings may connect lazily; returning `Ok` does not have to mean
    /// the endpoint was reachable.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        client: &ClientConfig,
        pool: &PoolConfig,
    ) -> Result<Self::Pool, CommandError>;
}
