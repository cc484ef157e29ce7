//! Managed Redis connection for one endpoint.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use switchover_core::{CommandError, EndpointPool};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::{Error, to_command_error};

/// Lazily-connected Redis pool backed by a [`ConnectionManager`].
///
/// The manager multiplexes all traffic for one endpoint over a single
/// reconnecting connection. It is created on first use, so constructing
/// the pool never touches the network.
pub struct RedisPool {
    client: Client,
    manager: Mutex<Option<ConnectionManager>>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
}

impl RedisPool {
    pub(crate) fn new(
        client: Client,
        connect_timeout: Option<Duration>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            manager: Mutex::new(None),
            connect_timeout,
            command_timeout,
        }
    }

    /// Get the managed connection, establishing it on first use.
    pub async fn connection(&self) -> Result<ConnectionManager, CommandError> {
        let mut guard = self.manager.lock().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }
        trace!("initializing redis connection manager");
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.command_timeout);
        let manager = self
            .client
            .get_connection_manager_with_config(config)
            .await
            .map_err(Error::from)?;
        *guard = Some(manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl EndpointPool for RedisPool {
    async fn ping(&self) -> Result<(), CommandError> {
        let mut connection = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
            .map(|_| ())
            .map_err(to_command_error)
    }

    async fn force_disconnect(&self) {
        // Dropping the manager severs the multiplexed connection;
        // in-flight commands on clones of it fail.
        let mut guard = self.manager.lock().await;
        guard.take();
    }

    async fn close(&self) {
        let mut guard = self.manager.lock().await;
        guard.take();
    }
}
