//! Connection and discovery abstractions for the replicated store.
//!
//! # Responsibilities
//! - Name a store node (`StoreAddr`)
//! - Define the primitive operations the guard layer needs (GET/SET/INCR/...)
//! - Define how a driver finds the current primary and its replicas

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::store::error::{StoreError, StoreResult};

/// Network address of a single store node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreAddr {
    pub host: String,
    pub port: u16,
}

impl StoreAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for StoreAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for StoreAddr {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| StoreError::Protocol(format!("address '{}' is missing a port", s)))?;
        if host.is_empty() {
            return Err(StoreError::Protocol(format!("address '{}' is missing a host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| StoreError::Protocol(format!("invalid port in '{}': {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}

/// An open connection to one store node.
///
/// Implementations must be cheap to share; the failover manager hands the
/// same connection to every concurrent caller.
#[async_trait]
pub trait StoreConnection: Send + Sync + fmt::Debug {
    /// Node this connection talks to.
    fn address(&self) -> &StoreAddr;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set `key`, replacing any previous TTL. `None` stores without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Atomically increment an integer key, creating it at 0 first.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining time to live; `None` for missing keys or keys without expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Discovery and connection factory for a replicated store.
#[async_trait]
pub trait StoreDriver: Send + Sync {
    /// Ask the discovery endpoints which node is the primary for `service`.
    async fn resolve_primary(&self, service: &str) -> StoreResult<StoreAddr>;

    /// Healthy replicas of `service`, possibly empty.
    async fn resolve_replicas(&self, service: &str) -> StoreResult<Vec<StoreAddr>>;

    /// Open a connection to a specific node.
    async fn connect(&self, addr: &StoreAddr) -> StoreResult<Arc<dyn StoreConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_parse() {
        let addr: StoreAddr = "sentinel-1:26379".parse().unwrap();
        assert_eq!(addr, StoreAddr::new("sentinel-1", 26379));
        assert_eq!(addr.to_string(), "sentinel-1:26379");
    }

    #[test]
    fn test_addr_parse_rejects_garbage() {
        assert!("no-port".parse::<StoreAddr>().is_err());
        assert!(":6379".parse::<StoreAddr>().is_err());
        assert!("host:99999".parse::<StoreAddr>().is_err());
    }
}
