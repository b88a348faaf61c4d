//! Resilience and admission control for services backed by a replicated
//! key-value store: failover-aware store access, circuit breaking,
//! distributed rate limiting, bounded background tasks and request deadlines.

pub mod admin;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod security;
pub mod store;
pub mod tasks;

pub use config::GuardConfig;
pub use lifecycle::{GuardServices, Shutdown};
pub use pipeline::{GuardOutcome, InboundRequest, RequestGuard};
pub use store::{FailoverManager, MemoryCluster};
