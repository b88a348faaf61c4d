//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Pick pretty or JSON output from config
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` wins over the configured level

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("sentinel_guard={},tower_http=info", config.log_level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized");
    }
}
