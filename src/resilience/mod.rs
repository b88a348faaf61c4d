//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Store call (via FailoverManager):
//!     → circuit_breaker.rs (fail fast while the store is known bad)
//!     → On connection failure: backoff.rs (exponential delay, then re-resolve primary)
//!
//! Inbound request:
//!     → deadline.rs (hard budget, cancellation on expiry)
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Only connection-class failures are retried
//! - Expected negative outcomes (open circuit, timeout) are values or typed errors

pub mod backoff;
pub mod circuit_breaker;
pub mod deadline;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, CircuitState};
pub use deadline::{
    DeadlineContext, DeadlineEnforcer, DeadlineError, DeadlineHealth, DeadlineOutcome, DeadlineStats,
    TimedOut,
};
