//! Replicated store subsystem.
//!
//! # Data Flow
//! ```text
//! Caller (rate limiter, admin):
//!     → failover.rs (execute_with_retry)
//!         → resilience::circuit_breaker (fail fast while the store is down)
//!         → connection.rs (cached primary / replica connection)
//!     → On connection-class failure:
//!         → backoff, re-resolve primary via discovery, reconnect, retry
//!
//! Drivers (connection.rs::StoreDriver):
//!     sentinel.rs → Redis Sentinel discovery + multiplexed connections
//!     memory.rs   → in-process replicated cluster with fault injection
//! ```
//!
//! # Design Decisions
//! - Discovery failure at startup is fatal; at runtime it is retried
//! - Only the failover path writes the cached primary (single writer)
//! - Every store call carries a socket timeout

pub mod connection;
pub mod error;
pub mod failover;
pub mod memory;
pub mod sentinel;

pub use connection::{StoreAddr, StoreConnection, StoreDriver};
pub use error::{StoreError, StoreResult};
pub use failover::{FailoverHealth, FailoverManager, FailoverStats};
pub use memory::MemoryCluster;
pub use sentinel::SentinelDriver;
