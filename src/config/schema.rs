//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the guard daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Replicated store discovery and connection settings.
    pub store: StoreConfig,

    /// Circuit breaker guarding store calls.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy for store operations.
    pub retries: RetryConfig,

    /// Per-caller rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Background task admission and cleanup.
    pub tasks: TaskConfig,

    /// Request time budget.
    pub deadline: DeadlineConfig,

    /// Periodic store health probe.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Store discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Discovery endpoints (e.g., "sentinel-1:26379").
    pub sentinels: Vec<String>,

    /// Logical name of the primary the sentinels monitor.
    pub service_name: String,

    /// Database index selected on data connections.
    pub db: i64,

    /// Optional password for data connections.
    pub password: Option<String>,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds.
    pub socket_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sentinels: vec!["127.0.0.1:26379".to_string()],
            service_name: "mymaster".to_string(),
            db: 0,
            password: None,
            connect_timeout_ms: 5000,
            socket_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before probing, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Successes required in Half-Open before closing.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting. Disabled limiters allow everything.
    pub enabled: bool,

    /// Bucket capacity.
    pub max_tokens: f64,

    /// Tokens added per second.
    pub refill_rate: f64,

    /// Consecutive denials before a caller is blocked.
    pub violation_threshold: u32,

    /// Block length in seconds.
    pub block_duration_secs: u64,

    /// Idle time before bucket and violation records expire, in seconds.
    pub record_ttl_secs: u64,

    /// Key prefix for records in the shared store.
    pub key_prefix: String,

    /// Callers that are never limited.
    pub allowlist: Vec<String>,

    /// Callers that are always rejected.
    pub denylist: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: 5.0,
            refill_rate: 0.5,
            violation_threshold: 3,
            block_duration_secs: 60,
            record_ttl_secs: 300,
            key_prefix: "throttle".to_string(),
            allowlist: Vec::new(),
            denylist: Vec::new(),
        }
    }
}

/// Background task configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Maximum tracked tasks at once.
    pub max_concurrent_tasks: usize,

    /// Interval of the periodic cleanup pass in seconds.
    pub cleanup_interval_secs: u64,

    /// Default per-task timeout in seconds; `None` disables it.
    pub default_timeout_secs: Option<u64>,

    /// Graceful window on shutdown before tasks are aborted, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 1000,
            cleanup_interval_secs: 60,
            default_timeout_secs: Some(300),
            shutdown_timeout_secs: 30,
        }
    }
}

/// Request deadline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Budget per request in milliseconds.
    pub budget_ms: u64,

    /// Fraction of the budget after which a handler is logged as slow.
    pub slow_threshold: f64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            budget_ms: 30_000,
            slow_threshold: 0.5,
        }
    }
}

impl DeadlineConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

/// Store health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable the periodic probe.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [store]
            sentinels = ["10.0.0.1:26379", "10.0.0.2:26379"]
            "#,
        )
        .unwrap();

        assert_eq!(config.store.sentinels.len(), 2);
        assert_eq!(config.store.service_name, "mymaster");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.rate_limit.key_prefix, "throttle");
        assert_eq!(config.tasks.default_timeout_secs, Some(300));
        assert_eq!(config.deadline.budget(), Duration::from_secs(30));
    }

    #[test]
    fn test_section_overrides() {
        let config: GuardConfig = toml::from_str(
            r#"
            [rate_limit]
            max_tokens = 10.0
            refill_rate = 2.0
            allowlist = ["ops"]

            [deadline]
            slow_threshold = 0.8
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.max_tokens, 10.0);
        assert_eq!(config.rate_limit.violation_threshold, 3);
        assert_eq!(config.rate_limit.allowlist, vec!["ops".to_string()]);
        assert_eq!(config.deadline.slow_threshold, 0.8);
        assert_eq!(config.deadline.budget_ms, 30_000);
    }
}
