//! Bounded tracking of fire-and-forget work.
//!
//! # Responsibilities
//! - Admit background tasks up to a fixed ceiling
//! - Apply a per-task timeout and classify how each task ended
//! - Forget finished tasks immediately so tracking never grows without bound
//! - Drain or abort everything on shutdown

use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::config::TaskConfig;
use crate::observability::metrics;
use crate::tasks::stats::{ShutdownReport, TaskCounters, TaskHealth, TaskOutcome, TaskStats};

pub type TaskId = u64;

/// Grace period for aborted tasks to unwind.
const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Shutdown deadline used when the requested window overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task capacity exceeded ({active}/{max})")]
    CapacityExceeded { active: usize, max: usize },

    #[error("task manager is shutting down")]
    ShuttingDown,
}

struct TrackedTask {
    name: String,
    started_at: Instant,
    handle: JoinHandle<TaskOutcome>,
}

struct Shared {
    tasks: Mutex<HashMap<TaskId, TrackedTask>>,
    counters: TaskCounters,
}

/// Handle to one spawned task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Cancel the task; it is recorded as cancelled.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Removes the task from tracking and records its outcome, however the
/// wrapper future ends (including abort).
struct CompletionGuard {
    shared: Arc<Shared>,
    id: TaskId,
    name: String,
    outcome: Option<TaskOutcome>,
}

impl CompletionGuard {
    fn finish(&mut self, outcome: TaskOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(TaskOutcome::Cancelled);
        let active = {
            let mut tasks = self.shared.tasks.lock();
            tasks.remove(&self.id);
            tasks.len()
        };

        self.shared.counters.record(&outcome);
        metrics::record_task_outcome(outcome.as_str());
        metrics::record_active_tasks(active);

        match &outcome {
            TaskOutcome::Completed => tracing::debug!(task = %self.name, "Background task completed"),
            TaskOutcome::Failed(error) => {
                tracing::warn!(task = %self.name, error = %error, "Background task failed")
            }
            TaskOutcome::TimedOut => tracing::warn!(task = %self.name, "Background task timed out"),
            TaskOutcome::Cancelled => tracing::debug!(task = %self.name, "Background task cancelled"),
        }
    }
}

pub struct TaskManager {
    shared: Arc<Shared>,
    max_concurrent: usize,
    default_timeout: Option<Duration>,
    cleanup_interval: Duration,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("active", &self.active())
            .field("max_concurrent", &self.max_concurrent)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl TaskManager {
    pub fn new(config: &TaskConfig) -> Self {
        tracing::info!(
            max_concurrent = config.max_concurrent_tasks,
            default_timeout_secs = ?config.default_timeout_secs,
            cleanup_interval_secs = config.cleanup_interval_secs,
            "Task manager initialized"
        );

        Self {
            shared: Arc::new(Shared {
                tasks: Mutex::new(HashMap::new()),
                counters: TaskCounters::default(),
            }),
            max_concurrent: config.max_concurrent_tasks.max(1),
            default_timeout: config.default_timeout_secs.map(Duration::from_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs.max(1)),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Start `work` in the background.
    ///
    /// `timeout` overrides the configured default. At capacity, finished
    /// tasks are swept first; if the manager is still full the work is
    /// rejected and never started. Must be called from within a Tokio runtime.
    pub fn spawn<F, E>(
        &self,
        name: impl Into<String>,
        work: F,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle, TaskError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let name = name.into();
        let mut tasks = self.shared.tasks.lock();
        // Checked under the lock so a task cannot slip in after shutdown drains.
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(TaskError::ShuttingDown);
        }

        if tasks.len() >= self.max_concurrent {
            let before = tasks.len();
            tasks.retain(|_, task| !task.handle.is_finished());
            tracing::debug!(swept = before - tasks.len(), "Inline cleanup at capacity");

            if tasks.len() >= self.max_concurrent {
                tracing::error!(
                    task = %name,
                    active = tasks.len(),
                    max = self.max_concurrent,
                    "Task capacity exceeded, rejecting"
                );
                metrics::record_task_outcome("rejected");
                return Err(TaskError::CapacityExceeded {
                    active: tasks.len(),
                    max: self.max_concurrent,
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let limit = timeout.or(self.default_timeout);
        let mut guard = CompletionGuard {
            shared: self.shared.clone(),
            id,
            name: name.clone(),
            outcome: None,
        };

        // The lock is held until the task is registered, so its guard cannot
        // try to remove it before it is inserted.
        let handle = tokio::spawn(async move {
            let run = AssertUnwindSafe(work).catch_unwind();
            let outcome = match limit {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(result) => classify(result),
                    Err(_) => TaskOutcome::TimedOut,
                },
                None => classify(run.await),
            };
            guard.finish(outcome.clone());
            outcome
        });

        let abort = handle.abort_handle();
        tasks.insert(
            id,
            TrackedTask {
                name: name.clone(),
                started_at: Instant::now(),
                handle,
            },
        );
        self.shared.counters.created.fetch_add(1, Ordering::Relaxed);
        let active = tasks.len();
        drop(tasks);

        metrics::record_active_tasks(active);
        tracing::debug!(task = %name, id = id, active = active, max = self.max_concurrent, "Background task spawned");

        Ok(TaskHandle { id, name, abort })
    }

    /// Forget tasks that have already finished. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut tasks = self.shared.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, task| !task.handle.is_finished());
        let removed = before - tasks.len();
        drop(tasks);

        if removed > 0 {
            tracing::debug!(removed = removed, "Cleaned up finished tasks");
        }
        removed
    }

    /// Periodic `cleanup` until shutdown.
    pub async fn run_cleanup_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.cleanup_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Task cleanup loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Stop admitting work, then wait up to `timeout` for tracked tasks when
    /// `graceful`, and abort whatever is left.
    pub async fn shutdown_all(&self, timeout: Duration, graceful: bool) -> ShutdownReport {
        let tasks: Vec<TrackedTask> = {
            let mut tracked = self.shared.tasks.lock();
            self.shutting_down.store(true, Ordering::Release);
            tracked.drain().map(|(_, t)| t).collect()
        };
        let mut report = ShutdownReport::default();

        if tasks.is_empty() {
            return report;
        }

        tracing::info!(tasks = tasks.len(), timeout = ?timeout, graceful = graceful, "Shutting down background tasks");

        let mut remaining = Vec::new();
        if graceful {
            let now = Instant::now();
            let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
            for mut task in tasks {
                match tokio::time::timeout_at(deadline, &mut task.handle).await {
                    Ok(Ok(outcome)) => report.record(&outcome),
                    Ok(Err(e)) if e.is_cancelled() => report.cancelled += 1,
                    Ok(Err(_)) => report.failed += 1,
                    Err(_) => remaining.push(task),
                }
            }
            if !remaining.is_empty() {
                tracing::warn!(
                    remaining = remaining.len(),
                    timeout = ?timeout,
                    "Graceful shutdown window elapsed, forcing cancellation"
                );
            }
        } else {
            remaining = tasks;
        }

        for task in &remaining {
            task.handle.abort();
        }
        for task in remaining {
            let running_for = task.started_at.elapsed();
            match tokio::time::timeout(ABORT_GRACE, task.handle).await {
                // Finished between the deadline and the abort
                Ok(Ok(outcome)) if outcome != TaskOutcome::Cancelled => report.record(&outcome),
                Ok(Err(e)) if !e.is_cancelled() => report.failed += 1,
                Ok(_) => report.cancelled += 1,
                Err(_) => {
                    tracing::warn!(task = %task.name, running_for = ?running_for, "Task did not stop after abort");
                    report.cancelled += 1;
                }
            }
        }

        tracing::info!(
            cancelled = report.cancelled,
            completed = report.completed,
            failed = report.failed,
            "Background task shutdown complete"
        );
        report
    }

    pub fn active(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// Names and ages of tracked tasks, oldest first.
    pub fn active_tasks(&self) -> Vec<(String, Duration)> {
        let tasks = self.shared.tasks.lock();
        let mut active: Vec<(String, Duration)> = tasks
            .values()
            .map(|t| (t.name.clone(), t.started_at.elapsed()))
            .collect();
        active.sort_by(|a, b| b.1.cmp(&a.1));
        active
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats::new(self.active(), self.max_concurrent, &self.shared.counters)
    }

    pub fn health_check(&self) -> TaskHealth {
        TaskHealth::from(self.stats())
    }
}

fn classify<E: fmt::Display>(result: std::thread::Result<Result<(), E>>) -> TaskOutcome {
    match result {
        Ok(Ok(())) => TaskOutcome::Completed,
        Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskOutcome::Failed(format!("panicked: {}", message))
        }
    }
}
