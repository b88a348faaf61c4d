//! Security subsystem: per-caller admission.
//!
//! # Data Flow
//! ```text
//! Inbound request (caller id):
//!     → access_control.rs (allowlist → bypass, denylist → deny)
//!     → rate_limit.rs (token bucket in the shared store)
//!         → clock.rs (unix time for refill and block expiry)
//!     → Decision handed back to the pipeline
//! ```
//!
//! # Design Decisions
//! - Limits hold across instances because state is in the shared store
//! - Fail open: store outages never turn into rejected traffic
//! - Settings are swapped atomically on config reload

pub mod access_control;
pub mod clock;
pub mod rate_limit;

pub use access_control::{Access, CallerAccessList};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limit::{Decision, RateLimitRecord, RateLimiter};
