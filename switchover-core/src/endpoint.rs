//! Endpoint descriptor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// One network address (host:port) representing a database, cluster or
/// replica set entry point.
///
/// Endpoints are cheap to clone and are used as map keys throughout the
/// framework.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: SmolStr,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    pub fn new(host: impl Into<SmolStr>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` label used in logs and metrics.
    pub fn label(&self) -> SmolStr {
        SmolStr::new(format!("{}:{}", self.host, self.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error returned when parsing an endpoint from a `host:port` string fails.
#[derive(Debug, thiserror::Error)]
#[error("invalid endpoint '{0}', expected host:port")]
pub struct ParseEndpointError(pub String);

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseEndpointError(s.to_owned()))?;
        if host.is_empty() {
            return Err(ParseEndpointError(s.to_owned()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseEndpointError(s.to_owned()))?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let endpoint: Endpoint = "redis-1.example.com:6379".parse().unwrap();
        assert_eq!(endpoint.host(), "redis-1.example.com");
        assert_eq!(endpoint.port(), 6379);
        assert_eq!(endpoint.label(), "redis-1.example.com:6379");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("no-port".parse::<Endpoint>().is_err());
        assert!(":6379".parse::<Endpoint>().is_err());
        assert!("host:notaport".parse::<Endpoint>().is_err());
    }
}
