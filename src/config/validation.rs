//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, thresholds within bounds)
//! - Reject endpoints that cannot be parsed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GuardConfig, PLACEHOLDER_API_KEY};
use crate::store::StoreAddr;

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let store = &config.store;
    if store.sentinels.is_empty() {
        errors.push(ValidationError::new("store.sentinels", "at least one discovery endpoint is required"));
    }
    for endpoint in &store.sentinels {
        if endpoint.parse::<StoreAddr>().is_err() {
            errors.push(ValidationError::new(
                "store.sentinels",
                format!("'{}' is not a host:port address", endpoint),
            ));
        }
    }
    if store.service_name.trim().is_empty() {
        errors.push(ValidationError::new("store.service_name", "must not be empty"));
    }
    if store.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("store.connect_timeout_ms", "must be greater than 0"));
    }
    if store.socket_timeout_ms == 0 {
        errors.push(ValidationError::new("store.socket_timeout_ms", "must be greater than 0"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be greater than 0"));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be greater than 0"));
    }
    if breaker.recovery_timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.recovery_timeout_ms", "must be greater than 0"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new("retries.base_delay_ms", "must not exceed retries.max_delay_ms"));
    }

    let limit = &config.rate_limit;
    if limit.max_tokens < 1.0 {
        errors.push(ValidationError::new("rate_limit.max_tokens", "must be at least 1"));
    }
    if !(limit.refill_rate > 0.0) {
        errors.push(ValidationError::new("rate_limit.refill_rate", "must be positive"));
    }
    if limit.violation_threshold == 0 {
        errors.push(ValidationError::new("rate_limit.violation_threshold", "must be greater than 0"));
    }
    if limit.block_duration_secs == 0 {
        errors.push(ValidationError::new("rate_limit.block_duration_secs", "must be greater than 0"));
    }
    if limit.record_ttl_secs == 0 {
        errors.push(ValidationError::new("rate_limit.record_ttl_secs", "must be greater than 0"));
    }
    if limit.key_prefix.is_empty() {
        errors.push(ValidationError::new("rate_limit.key_prefix", "must not be empty"));
    }

    let tasks = &config.tasks;
    if tasks.max_concurrent_tasks == 0 {
        errors.push(ValidationError::new("tasks.max_concurrent_tasks", "must be greater than 0"));
    }
    if tasks.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new("tasks.cleanup_interval_secs", "must be greater than 0"));
    }
    if tasks.default_timeout_secs == Some(0) {
        errors.push(ValidationError::new("tasks.default_timeout_secs", "must be greater than 0 when set"));
    }

    let deadline = &config.deadline;
    if deadline.budget_ms == 0 {
        errors.push(ValidationError::new("deadline.budget_ms", "must be greater than 0"));
    }
    if !(0.0..=1.0).contains(&deadline.slow_threshold) {
        errors.push(ValidationError::new("deadline.slow_threshold", "must be within [0, 1]"));
    }

    if config.health.enabled && config.health.interval_secs == 0 {
        errors.push(ValidationError::new("health.interval_secs", "must be greater than 0"));
    }

    let obs = &config.observability;
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new("observability.log_format", "must be 'pretty' or 'json'"));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("observability.metrics_address", "must be a socket address"));
    }

    let admin = &config.admin;
    if admin.enabled {
        if admin.api_key.is_empty() || admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "must be set when the admin API is enabled"));
        }
        if admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "must be a socket address"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = GuardConfig::default();
        config.store.sentinels.clear();
        config.rate_limit.refill_rate = 0.0;
        config.deadline.slow_threshold = 1.5;
        config.tasks.max_concurrent_tasks = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "store.sentinels",
                "rate_limit.refill_rate",
                "tasks.max_concurrent_tasks",
                "deadline.slow_threshold",
            ]
        );
    }

    #[test]
    fn test_admin_requires_real_key() {
        let mut config = GuardConfig::default();
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");

        config.admin.api_key = "s3cret".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_sentinel_endpoint() {
        let mut config = GuardConfig::default();
        config.store.sentinels = vec!["sentinel-without-port".to_string()];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("sentinel-without-port"));
    }

    #[test]
    fn test_nan_refill_rate_rejected() {
        let mut config = GuardConfig::default();
        config.rate_limit.refill_rate = f64::NAN;
        assert!(validate_config(&config).is_err());
    }
}
