//! Circuit breaker for store protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: testing if the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after recovery_timeout
//! Half-Open → Closed: success_threshold successes
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - All state lives behind one lock so two callers cannot both move Open → Half-Open
//! - The lock is never held across the wrapped operation
//! - Concurrent calls in Half-Open are all allowed to probe; the first failure reopens
//! - `tokio::time::Instant` so tests can pause and advance time

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit breaker states representing the current operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a call through the breaker.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not invoked.
    #[error("circuit breaker is open for {component}, retry in {retry_after:?}")]
    Open {
        component: String,
        retry_after: Duration,
    },

    /// The operation ran and failed; its error is passed through untouched.
    #[error(transparent)]
    Inner(E),
}

/// Point-in-time view of breaker state and counters.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub failure_rate: f64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    total_calls: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
}

/// Circuit breaker around one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            recovery_timeout: config.recovery_timeout(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure: None,
                total_calls: 0,
                successes: 0,
                failures: 0,
                rejections: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Execute `operation` under breaker protection.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire::<E>()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Decide whether a call may proceed, moving Open → Half-Open when due.
    fn try_acquire<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(self.recovery_timeout);

        if elapsed >= self.recovery_timeout {
            self.transition(&mut inner, CircuitState::HalfOpen);
            return Ok(());
        }

        inner.rejections += 1;
        Err(CircuitBreakerError::Open {
            component: self.name.clone(),
            retry_after: self.recovery_timeout - elapsed,
        })
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.successes += 1;

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // A probe that started before another probe reopened the circuit.
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Open => {
                inner.half_open_successes = 0;
                if inner.last_failure.is_none() {
                    inner.last_failure = Some(Instant::now());
                }
                error!(
                    component = %self.name,
                    from = %from,
                    consecutive_failures = inner.consecutive_failures,
                    recovery_timeout_ms = self.recovery_timeout.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                info!(component = %self.name, "Circuit breaker half-open, probing recovery");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.half_open_successes = 0;
                inner.last_failure = None;
                info!(component = %self.name, from = %from, "Circuit breaker closed");
            }
        }

        metrics::record_circuit_transition(&self.name, to.as_str());
    }

    /// Open the circuit now, starting a full recovery window.
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Close the circuit and clear failure counters.
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn snapshot(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let failure_rate = if inner.total_calls > 0 {
            inner.failures as f64 / inner.total_calls as f64
        } else {
            0.0
        };

        CircuitBreakerMetrics {
            state: inner.state,
            total_calls: inner.total_calls,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            failure_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(failure_threshold: u32, recovery_ms: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            &CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout_ms: recovery_ms,
                success_threshold,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.call(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_normal_operation() {
        let cb = breaker(3, 100, 2);
        assert_eq!(cb.state(), CircuitState::Closed);

        let result = cb.call(|| async { Ok::<_, String>("ok") }).await;
        assert_eq!(result, Ok("ok"));

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.total_calls, 1);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let cb = breaker(3, 100, 2);
        assert_eq!(fail(&cb).await, Err(CircuitBreakerError::Inner("boom")));
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 100, 2);
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking() {
        let cb = breaker(3, 5000, 1);
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.snapshot().rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_timeout() {
        let cb = breaker(3, 5000, 1);
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(matches!(succeed(&cb).await, Err(CircuitBreakerError::Open { .. })));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(succeed(&cb).await, Ok(()));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(succeed(&cb).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 1000, 2);
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(succeed(&cb).await, Ok(()));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Full window again before the next probe
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(succeed(&cb).await, Err(CircuitBreakerError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_needs_success_threshold() {
        let cb = breaker(1, 1000, 3);
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(1000)).await;

        let _ = succeed(&cb).await;
        let _ = succeed(&cb).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_successes, 2);

        let _ = succeed(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().half_open_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_counts_down() {
        let cb = breaker(1, 5000, 1);
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        match succeed(&cb).await {
            Err(CircuitBreakerError::Open { component, retry_after }) => {
                assert_eq!(component, "test");
                assert_eq!(retry_after, Duration::from_secs(3));
            }
            other => panic!("expected open circuit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_open_and_closed() {
        let cb = breaker(5, 1000, 1);
        cb.force_open();
        assert!(matches!(succeed(&cb).await, Err(CircuitBreakerError::Open { .. })));

        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(succeed(&cb).await, Ok(()));
    }
}
