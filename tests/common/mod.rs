//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::sync::Arc;

use sentinel_guard::config::{
    CircuitBreakerConfig, GuardConfig, RateLimitConfig, RetryConfig, StoreConfig,
};
use sentinel_guard::store::{MemoryCluster, StoreAddr};
use sentinel_guard::GuardServices;

pub const ADMIN_KEY: &str = "test-admin-key";

/// Config tuned for tests: short timeouts, fast retries, quick breaker recovery.
pub fn test_config() -> GuardConfig {
    GuardConfig {
        store: StoreConfig {
            connect_timeout_ms: 500,
            socket_timeout_ms: 200,
            ..StoreConfig::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 200,
            success_threshold: 1,
        },
        retries: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
        },
        rate_limit: RateLimitConfig {
            max_tokens: 5.0,
            refill_rate: 1.0,
            ..RateLimitConfig::default()
        },
        ..GuardConfig::default()
    }
}

/// Start services against a fresh in-process cluster.
pub async fn start_services(config: &GuardConfig) -> (GuardServices, MemoryCluster) {
    let cluster = MemoryCluster::local();
    let services = GuardServices::start(config, Arc::new(cluster.clone()))
        .await
        .expect("services start against a healthy cluster");
    (services, cluster)
}

/// Kill the current primary and promote the first replica.
pub fn fail_over(cluster: &MemoryCluster) -> StoreAddr {
    let old = cluster.primary();
    let new: StoreAddr = "127.0.0.1:6380".parse().unwrap();
    cluster.kill_node(&old);
    cluster.promote(&new);
    new
}
