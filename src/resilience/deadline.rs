//! Hard per-request time budgets.
//!
//! A handler runs inside `tokio::time::timeout`; when the budget elapses its
//! future is dropped at the current await point, which cancels any store
//! call or timer it was suspended on. Timeouts come back as
//! [`DeadlineOutcome::TimedOut`], handler errors pass through untouched.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::DeadlineConfig;
use crate::health::HealthStatus;
use crate::observability::metrics;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeadlineError {
    #[error("slow threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// Per-request deadline state handed to the handler.
#[derive(Debug, Clone)]
pub struct DeadlineContext {
    pub request_id: Uuid,
    pub handler: String,
    pub started_at: Instant,
    pub deadline: Instant,
}

/// Stand-in deadline for budgets too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl DeadlineContext {
    fn new(handler: &str, budget: Duration) -> Self {
        let started_at = Instant::now();
        let deadline = started_at
            .checked_add(budget)
            .unwrap_or_else(|| started_at + FAR_FUTURE);
        Self {
            request_id: Uuid::new_v4(),
            handler: handler.to_string(),
            started_at,
            deadline,
        }
    }

    pub fn budget(&self) -> Duration {
        self.deadline - self.started_at
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimedOut {
    pub handler: String,
    pub request_id: Uuid,
    pub budget: Duration,
    pub elapsed: Duration,
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler {} exceeded its {:?} budget after {:?}",
            self.handler, self.budget, self.elapsed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineOutcome<T> {
    Completed(T),
    TimedOut(TimedOut),
}

impl<T> DeadlineOutcome<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, DeadlineOutcome::TimedOut(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            DeadlineOutcome::Completed(value) => Some(value),
            DeadlineOutcome::TimedOut(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineStats {
    pub total_requests: u64,
    pub timeouts: u64,
    pub timeout_rate: f64,
    pub slow_handlers: u64,
    pub slow_handler_rate: f64,
    pub errors: u64,
    /// Mean wall time per request in seconds.
    pub avg_execution_time: f64,
    pub budget_ms: u64,
    pub slow_threshold: f64,
    pub timeouts_by_handler: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineHealth {
    pub status: HealthStatus,
    pub message: String,
    pub timeout_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    timeouts: AtomicU64,
    slow: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
}

/// Counts a request once it has an outcome. A request whose `run` future is
/// dropped, or whose handler panics, is settled as an error on drop.
struct InFlight<'a> {
    counters: &'a Counters,
    handler: &'a str,
    request_id: Uuid,
    started_at: Instant,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self) -> Duration {
        self.settled = true;
        let elapsed = self.started_at.elapsed();
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        elapsed
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let elapsed = self.settle();
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            handler = self.handler,
            request_id = %self.request_id,
            elapsed = ?elapsed,
            "Request abandoned before completing"
        );
        metrics::record_deadline(self.handler, "error", elapsed);
    }
}

pub struct DeadlineEnforcer {
    budget: Duration,
    /// f64 bits, updated on config reload.
    slow_threshold: AtomicU64,
    counters: Counters,
    timeouts_by_handler: DashMap<String, u64>,
}

impl fmt::Debug for DeadlineEnforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineEnforcer")
            .field("budget", &self.budget)
            .field("slow_threshold", &self.slow_threshold())
            .finish()
    }
}

impl DeadlineEnforcer {
    pub fn new(config: &DeadlineConfig) -> Self {
        let threshold = config.slow_threshold.clamp(0.0, 1.0);
        tracing::info!(
            budget_ms = config.budget_ms,
            slow_threshold = threshold,
            "Deadline enforcer initialized"
        );

        Self {
            budget: config.budget(),
            slow_threshold: AtomicU64::new(threshold.to_bits()),
            counters: Counters::default(),
            timeouts_by_handler: DashMap::new(),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn slow_threshold(&self) -> f64 {
        f64::from_bits(self.slow_threshold.load(Ordering::Relaxed))
    }

    pub fn configure_threshold(&self, value: f64) -> Result<(), DeadlineError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(DeadlineError::InvalidThreshold(value));
        }
        let previous = f64::from_bits(self.slow_threshold.swap(value.to_bits(), Ordering::Relaxed));
        if previous != value {
            tracing::info!(previous = previous, current = value, "Slow handler threshold updated");
        }
        Ok(())
    }

    /// Run `handler` under `budget` (or the configured default).
    pub async fn run<F, Fut, T, E>(
        &self,
        handler_name: &str,
        budget: Option<Duration>,
        handler: F,
    ) -> Result<DeadlineOutcome<T>, E>
    where
        F: FnOnce(DeadlineContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let ctx = DeadlineContext::new(handler_name, budget.unwrap_or(self.budget));
        let budget = ctx.budget();
        let request_id = ctx.request_id;
        let deadline = ctx.deadline;

        let mut in_flight = InFlight {
            counters: &self.counters,
            handler: handler_name,
            request_id,
            started_at: ctx.started_at,
            settled: false,
        };
        let result = tokio::time::timeout_at(deadline, handler(ctx)).await;
        let elapsed = in_flight.settle();

        match result {
            Ok(Ok(value)) => {
                let slow_after = budget.mul_f64(self.slow_threshold());
                if elapsed > slow_after {
                    self.counters.slow.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        handler = handler_name,
                        request_id = %request_id,
                        elapsed = ?elapsed,
                        budget = ?budget,
                        "Slow handler detected"
                    );
                    metrics::record_deadline(handler_name, "slow", elapsed);
                } else {
                    metrics::record_deadline(handler_name, "completed", elapsed);
                }
                Ok(DeadlineOutcome::Completed(value))
            }
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    handler = handler_name,
                    request_id = %request_id,
                    elapsed = ?elapsed,
                    error = %e,
                    "Handler failed"
                );
                metrics::record_deadline(handler_name, "error", elapsed);
                Err(e)
            }
            Err(_) => {
                let timeouts = self.counters.timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                *self
                    .timeouts_by_handler
                    .entry(handler_name.to_string())
                    .or_insert(0) += 1;
                tracing::error!(
                    handler = handler_name,
                    request_id = %request_id,
                    budget = ?budget,
                    elapsed = ?elapsed,
                    timeouts = timeouts,
                    total = self.counters.total_requests.load(Ordering::Relaxed),
                    "Handler exceeded its deadline"
                );
                metrics::record_deadline(handler_name, "timeout", elapsed);
                Ok(DeadlineOutcome::TimedOut(TimedOut {
                    handler: handler_name.to_string(),
                    request_id,
                    budget,
                    elapsed,
                }))
            }
        }
    }

    pub fn stats(&self) -> DeadlineStats {
        let total = self.counters.total_requests.load(Ordering::Relaxed);
        let timeouts = self.counters.timeouts.load(Ordering::Relaxed);
        let slow = self.counters.slow.load(Ordering::Relaxed);
        let micros = self.counters.total_micros.load(Ordering::Relaxed);
        let ratio = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        DeadlineStats {
            total_requests: total,
            timeouts,
            timeout_rate: ratio(timeouts),
            slow_handlers: slow,
            slow_handler_rate: ratio(slow),
            errors: self.counters.errors.load(Ordering::Relaxed),
            avg_execution_time: if total == 0 {
                0.0
            } else {
                micros as f64 / total as f64 / 1_000_000.0
            },
            budget_ms: self.budget.as_millis() as u64,
            slow_threshold: self.slow_threshold(),
            timeouts_by_handler: self
                .timeouts_by_handler
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.total_requests.store(0, Ordering::Relaxed);
        self.counters.timeouts.store(0, Ordering::Relaxed);
        self.counters.slow.store(0, Ordering::Relaxed);
        self.counters.errors.store(0, Ordering::Relaxed);
        self.counters.total_micros.store(0, Ordering::Relaxed);
        self.timeouts_by_handler.clear();
        tracing::info!("Deadline statistics reset");
    }

    pub fn get_health_status(&self) -> DeadlineHealth {
        let timeout_rate = self.stats().timeout_rate;
        let status = HealthStatus::from_ratio(timeout_rate, 0.05, 0.9);
        let message = match status {
            HealthStatus::Healthy => "Handlers within budget".to_string(),
            _ => format!("Timeout rate {:.1}%", timeout_rate * 100.0),
        };
        DeadlineHealth {
            status,
            message,
            timeout_rate,
        }
    }
}
