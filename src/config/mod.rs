//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated)
//!     → sections handed to each service at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rate limit settings swapped into the limiter
//!     → slow-handler threshold applied to the deadline enforcer
//! ```
//!
//! # Design Decisions
//! - Only settings that are safe to change live are reloaded; the rest need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, DeadlineConfig, GuardConfig, HealthConfig,
    ObservabilityConfig, RateLimitConfig, RetryConfig, StoreConfig, TaskConfig,
};
pub use validation::ValidationError;
