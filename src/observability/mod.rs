//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields: component, caller, task, handler)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through deadline contexts into handler logs
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
