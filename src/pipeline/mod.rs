//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! InboundRequest (request.rs)
//!     → guard.rs
//!         → DeadlineEnforcer (budget for everything below)
//!         → RateLimiter::try_consume(caller_id)
//!         → handler (may spawn TaskManager work)
//!     → GuardOutcome
//! ```

pub mod guard;
pub mod request;

pub use guard::{GuardOutcome, RequestGuard};
pub use request::InboundRequest;
