//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     config → logging → metrics → FailoverManager::init → RateLimiter
//!     → TaskManager → DeadlineEnforcer → background loops → admin listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → loops exit → drain tasks → close store
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup, reverse-ordered shutdown
//! - Shutdown has a timeout: outstanding tasks are aborted after the deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{GuardServices, StartupError};
