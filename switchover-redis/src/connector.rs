//! Connector opening [`RedisPool`]s for endpoints.

use async_trait::async_trait;
use redis::{
    Client, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo, RedisError,
};
use switchover_core::{ClientConfig, CommandError, Connector, Endpoint, PoolConfig};

use crate::error::Error;
use crate::pool::RedisPool;

/// Builds the redis-rs connection parameters for one endpoint.
pub(crate) fn connection_info(
    endpoint: &Endpoint,
    client: &ClientConfig,
) -> Result<ConnectionInfo, RedisError> {
    let addr = if client.tls {
        ConnectionAddr::TcpTls {
            host: endpoint.host().to_string(),
            port: endpoint.port(),
            insecure: false,
            tls_params: None,
        }
    } else {
        ConnectionAddr::Tcp(endpoint.host().to_string(), endpoint.port())
    };
    let mut redis = RedisConnectionInfo::default().set_db(client.database);
    if let Some(username) = &client.username {
        redis = redis.set_username(username);
    }
    if let Some(password) = &client.password {
        redis = redis.set_password(password);
    }
    Ok(addr.into_connection_info()?.set_redis_settings(redis))
}

/// [`Connector`] producing one [`RedisPool`] per endpoint.
///
/// Pools connect lazily, so `connect` succeeding does not mean the
/// endpoint is reachable; health checks and the first command decide
/// that.
#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

impl RedisConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Pool = RedisPool;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        client: &ClientConfig,
        _pool: &PoolConfig,
    ) -> Result<Self::Pool, CommandError> {
        let info = connection_info(endpoint, client).map_err(Error::from)?;
        let redis_client = Client::open(info).map_err(Error::from)?;
        Ok(RedisPool::new(
            redis_client,
            client.connect_timeout,
            client.command_timeout,
        ))
    }
}
