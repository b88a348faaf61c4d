//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_circuit_transitions_total` (counter): breaker transitions by component, target state
//! - `guard_store_operations_total` (counter): store operations by outcome
//! - `guard_store_failovers_total` (counter): primary address changes
//! - `guard_rate_limit_decisions_total` (counter): limiter decisions by kind
//! - `guard_tasks_total` (counter): background task outcomes
//! - `guard_tasks_active` (gauge): tracked background tasks
//! - `guard_deadline_requests_total` (counter): requests by handler, outcome
//! - `guard_deadline_duration_seconds` (histogram): handler execution time
//! - `guard_component_health` (gauge): 0=healthy, 1=warning, 2=critical, 3=unhealthy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users and tests pay nothing
//! - The Prometheus exporter is installed only by the daemon

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_circuit_transition(component: &str, to: &'static str) {
    counter!("guard_circuit_transitions_total", "component" => component.to_string(), "to" => to)
        .increment(1);
}

pub fn record_store_operation(outcome: &'static str) {
    counter!("guard_store_operations_total", "outcome" => outcome).increment(1);
}

pub fn record_failover() {
    counter!("guard_store_failovers_total").increment(1);
}

pub fn record_rate_limit_decision(decision: &'static str) {
    counter!("guard_rate_limit_decisions_total", "decision" => decision).increment(1);
}

pub fn record_task_outcome(outcome: &'static str) {
    counter!("guard_tasks_total", "outcome" => outcome).increment(1);
}

pub fn record_active_tasks(active: usize) {
    gauge!("guard_tasks_active").set(active as f64);
}

pub fn record_deadline(handler: &str, outcome: &'static str, elapsed: Duration) {
    counter!("guard_deadline_requests_total", "handler" => handler.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("guard_deadline_duration_seconds", "handler" => handler.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_component_health(component: &'static str, level: u8) {
    gauge!("guard_component_health", "component" => component).set(level as f64);
}
