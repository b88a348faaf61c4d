//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic probe (monitor.rs):
//!     Interval timer
//!     → FailoverManager::health_check (ping primary)
//!     → log on change, export gauge, re-resolve primary when unhealthy
//!
//! On demand (report.rs):
//!     store + tasks + deadlines → worst status wins
//! ```
//!
//! # Design Decisions
//! - One status scale (status.rs) for every component
//! - The probe only reads state; recovery still goes through the failover path

pub mod monitor;
pub mod report;
pub mod status;

pub use monitor::StoreHealthMonitor;
pub use report::HealthReport;
pub use status::HealthStatus;
