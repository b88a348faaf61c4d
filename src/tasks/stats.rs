//! Task outcomes and counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::health::HealthStatus;

/// How a background task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Returned an error or panicked.
    Failed(String),
    /// Aborted before finishing.
    Cancelled,
    /// Exceeded its timeout and was dropped.
    TimedOut,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Cancelled => "cancelled",
            TaskOutcome::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskCounters {
    pub created: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub timed_out: AtomicU64,
}

impl TaskCounters {
    pub fn record(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed(_) => &self.failed,
            TaskOutcome::Cancelled => &self.cancelled,
            TaskOutcome::TimedOut => &self.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub active: usize,
    pub max_concurrent: usize,
    pub total_created: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_timed_out: u64,
    pub utilization: f64,
}

impl TaskStats {
    pub(crate) fn new(active: usize, max_concurrent: usize, counters: &TaskCounters) -> Self {
        Self {
            active,
            max_concurrent,
            total_created: counters.created.load(Ordering::Relaxed),
            total_completed: counters.completed.load(Ordering::Relaxed),
            total_failed: counters.failed.load(Ordering::Relaxed),
            total_cancelled: counters.cancelled.load(Ordering::Relaxed),
            total_timed_out: counters.timed_out.load(Ordering::Relaxed),
            utilization: active as f64 / max_concurrent.max(1) as f64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskHealth {
    pub status: HealthStatus,
    pub message: String,
    pub stats: TaskStats,
}

impl From<TaskStats> for TaskHealth {
    fn from(stats: TaskStats) -> Self {
        let status = HealthStatus::from_ratio(stats.utilization, 0.7, 0.9);
        let message = match status {
            HealthStatus::Healthy => "Task manager healthy".to_string(),
            HealthStatus::Warning => format!("Task utilization high: {:.1}%", stats.utilization * 100.0),
            _ => format!("Task utilization critical: {:.1}%", stats.utilization * 100.0),
        };
        Self {
            status,
            message,
            stats,
        }
    }
}

/// What `shutdown_all` did with the tasks it found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub cancelled: usize,
    pub completed: usize,
    pub failed: usize,
}

impl ShutdownReport {
    pub(crate) fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Failed(_) | TaskOutcome::TimedOut => self.failed += 1,
            TaskOutcome::Cancelled => self.cancelled += 1,
        }
    }
}
