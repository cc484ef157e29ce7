#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod connector;
pub mod endpoint;
pub mod error;
pub mod health;

pub use connector::{ClientConfig, Connector, EndpointPool, PoolConfig};
pub use endpoint::Endpoint;
pub use error::{CommandError, ErrorKind};
pub use health::{
    HealthCheckStrategy, HealthStatus, HealthStatusChange, ProbeDecision, ProbePolicy,
    StrategyFactory,
};
