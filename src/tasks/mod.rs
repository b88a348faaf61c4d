//! Background task management.
//!
//! # Data Flow
//! ```text
//! Handler wants fire-and-forget work:
//!     → manager.rs spawn (capacity check, inline sweep when full)
//!     → wrapped future (timeout + panic capture)
//!     → completion guard removes the task and records the outcome in stats.rs
//! ```
//!
//! # Design Decisions
//! - Finished tasks drop out of tracking as they complete
//! - Capacity is enforced under the same lock that registers the task
//! - Shutdown is two-phase: wait up to a deadline, then abort

pub mod manager;
pub mod stats;

pub use manager::{TaskError, TaskHandle, TaskId, TaskManager};
pub use stats::{ShutdownReport, TaskHealth, TaskOutcome, TaskStats};
