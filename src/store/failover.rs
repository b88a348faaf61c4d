//! Failover-aware access to the replicated store.
//!
//! # Responsibilities
//! - Resolve the primary at startup and keep a cached connection to it
//! - Run operations through the circuit breaker with bounded retries
//! - Re-resolve the primary after connection-class failures and count failovers
//! - Report health and counters for the admin surface

use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use crate::config::{CircuitBreakerConfig, RetryConfig, StoreConfig};
use crate::health::HealthStatus;
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use crate::store::connection::{StoreAddr, StoreConnection, StoreDriver};
use crate::store::error::{StoreError, StoreResult};

/// Result of a store health probe.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverHealth {
    pub status: HealthStatus,
    pub primary: Option<String>,
    pub latency_ms: Option<f64>,
    pub circuit_state: CircuitState,
    pub operation_count: u64,
    pub error_count: u64,
    pub failover_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running counters of the failover manager.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverStats {
    pub operation_count: u64,
    pub error_count: u64,
    pub failover_count: u64,
    /// Unix seconds of the most recent primary change.
    pub last_failover: Option<u64>,
    pub error_rate: f64,
    pub circuit_state: CircuitState,
    pub primary: Option<String>,
    pub replica: Option<String>,
}

struct Node {
    addr: StoreAddr,
    conn: Arc<dyn StoreConnection>,
}

/// Hands out connections to the current primary and survives failover.
pub struct FailoverManager {
    driver: Arc<dyn StoreDriver>,
    service_name: String,
    connect_timeout: Duration,
    socket_timeout: Duration,
    backoff: BackoffPolicy,
    breaker: Arc<CircuitBreaker>,
    primary: ArcSwapOption<Node>,
    replica: ArcSwapOption<Node>,
    refresh_lock: Mutex<()>,
    operation_count: AtomicU64,
    error_count: AtomicU64,
    failover_count: AtomicU64,
    last_failover: AtomicU64,
}

impl fmt::Debug for FailoverManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverManager")
            .field("service_name", &self.service_name)
            .field("primary", &self.primary_addr())
            .field("circuit_state", &self.breaker.state())
            .finish()
    }
}

impl FailoverManager {
    pub fn new(
        driver: Arc<dyn StoreDriver>,
        store: &StoreConfig,
        breaker: &CircuitBreakerConfig,
        retries: &RetryConfig,
    ) -> Self {
        Self {
            driver,
            service_name: store.service_name.clone(),
            connect_timeout: store.connect_timeout(),
            socket_timeout: store.socket_timeout(),
            backoff: BackoffPolicy::from(retries),
            breaker: Arc::new(CircuitBreaker::new("store", breaker)),
            primary: ArcSwapOption::empty(),
            replica: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            operation_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            failover_count: AtomicU64::new(0),
            last_failover: AtomicU64::new(0),
        }
    }

    /// Resolve the primary and connect to it.
    ///
    /// Fails if no primary is reachable within the connect timeout; callers
    /// treat this as fatal.
    pub async fn init(&self) -> StoreResult<()> {
        let addr = match timeout(self.connect_timeout, self.refresh(false)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Connection(format!(
                    "no primary for '{}' found within {:?}",
                    self.service_name, self.connect_timeout
                )))
            }
        };

        tracing::info!(
            service = %self.service_name,
            primary = %addr,
            replica = ?self.replica.load_full().map(|n| n.addr.to_string()),
            "Store connection initialized"
        );
        Ok(())
    }

    /// Cached connection to the primary, or to a replica when `prefer_replica`
    /// is set and one is available. Never touches the network.
    pub fn get_connection(&self, prefer_replica: bool) -> StoreResult<Arc<dyn StoreConnection>> {
        if prefer_replica {
            if let Some(node) = self.replica.load_full() {
                return Ok(node.conn.clone());
            }
        }
        self.primary
            .load_full()
            .map(|node| node.conn.clone())
            .ok_or(StoreError::NotInitialized)
    }

    /// Address of the cached primary.
    pub fn primary_addr(&self) -> Option<StoreAddr> {
        self.primary.load_full().map(|n| n.addr.clone())
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` against the primary, retrying connection-class failures.
    ///
    /// `max_attempts` overrides the configured total attempt count. Each retry
    /// waits with exponential backoff and re-resolves the primary first.
    /// Anything else (protocol errors, an open circuit) is returned at once.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        operation: F,
        max_attempts: Option<u32>,
    ) -> StoreResult<T>
    where
        F: Fn(Arc<dyn StoreConnection>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = max_attempts.unwrap_or(self.backoff.max_attempts).max(1);
        let socket_timeout = self.socket_timeout;
        let operation = &operation;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let conn = self.get_connection(false)?;

            let result = self
                .breaker
                .call(move || async move {
                    match timeout(socket_timeout, operation(conn)).await {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout(socket_timeout)),
                    }
                })
                .await;

            let err = match result {
                Ok(value) => {
                    self.operation_count.fetch_add(1, Ordering::Relaxed);
                    metrics::record_store_operation("success");
                    return Ok(value);
                }
                Err(CircuitBreakerError::Open { component, retry_after }) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    metrics::record_store_operation("rejected");
                    tracing::debug!(component = %component, retry_after = ?retry_after, "Store call rejected by open circuit");
                    return Err(StoreError::CircuitOpen { component });
                }
                Err(CircuitBreakerError::Inner(e)) => e,
            };

            self.error_count.fetch_add(1, Ordering::Relaxed);

            if !err.is_connection_error() {
                metrics::record_store_operation("failed");
                tracing::error!(error = %err, "Store operation failed with non-retryable error");
                return Err(err);
            }

            if attempt >= max_attempts {
                metrics::record_store_operation("failed");
                tracing::error!(attempts = attempt, error = %err, "Store operation failed after all attempts");
                return Err(err);
            }

            let delay = self.backoff.delay(attempt);
            tracing::warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                delay = ?delay,
                error = %err,
                "Store operation failed, retrying"
            );
            tokio::time::sleep(delay).await;

            if let Err(e) = self.refresh_primary().await {
                tracing::warn!(error = %e, "Primary re-resolution failed, retrying against cached primary");
            }
        }
    }

    /// Ask discovery for the primary again and reconnect.
    ///
    /// A failover is recorded only when the resolved address differs from
    /// the cached one. On failure the cached connection is kept.
    pub async fn refresh_primary(&self) -> StoreResult<StoreAddr> {
        self.refresh(true).await
    }

    async fn refresh(&self, detect_failover: bool) -> StoreResult<StoreAddr> {
        let _guard = self.refresh_lock.lock().await;

        let addr = self.driver.resolve_primary(&self.service_name).await?;
        let conn = self.driver.connect(&addr).await?;

        let previous = self.primary.load_full().map(|n| n.addr.clone());
        self.primary.store(Some(Arc::new(Node {
            addr: addr.clone(),
            conn,
        })));

        if detect_failover {
            if let Some(previous) = previous.filter(|p| *p != addr) {
                self.failover_count.fetch_add(1, Ordering::Relaxed);
                self.last_failover.store(unix_now(), Ordering::Relaxed);
                metrics::record_failover();
                tracing::warn!(from = %previous, to = %addr, "Store primary failover detected");
            }
        }

        self.refresh_replica().await;
        Ok(addr)
    }

    async fn refresh_replica(&self) {
        let replicas = match self.driver.resolve_replicas(&self.service_name).await {
            Ok(replicas) => replicas,
            Err(e) => {
                tracing::warn!(error = %e, "Replica discovery failed");
                self.replica.store(None);
                return;
            }
        };

        for addr in replicas {
            match self.driver.connect(&addr).await {
                Ok(conn) => {
                    self.replica.store(Some(Arc::new(Node { addr, conn })));
                    return;
                }
                Err(e) => tracing::debug!(replica = %addr, error = %e, "Replica connect failed"),
            }
        }
        self.replica.store(None);
    }

    /// Ping the primary and report latency, breaker state and counters.
    pub async fn health_check(&self) -> FailoverHealth {
        let circuit_state = self.breaker.state();
        let node = self.primary.load_full();

        let (status, latency_ms, error) = match &node {
            None => (HealthStatus::Unhealthy, None, Some(StoreError::NotInitialized.to_string())),
            Some(node) => {
                let start = Instant::now();
                let ping = match timeout(self.socket_timeout, node.conn.ping()).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(self.socket_timeout)),
                };
                let latency = start.elapsed().as_secs_f64() * 1000.0;

                match ping {
                    Ok(()) if circuit_state == CircuitState::Closed => (HealthStatus::Healthy, Some(latency), None),
                    Ok(()) => (HealthStatus::Warning, Some(latency), None),
                    Err(e) => (HealthStatus::Unhealthy, None, Some(e.to_string())),
                }
            }
        };

        FailoverHealth {
            status,
            primary: node.map(|n| n.addr.to_string()),
            latency_ms,
            circuit_state,
            operation_count: self.operation_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            failover_count: self.failover_count.load(Ordering::Relaxed),
            error,
        }
    }

    pub fn stats(&self) -> FailoverStats {
        let operation_count = self.operation_count.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);
        let last_failover = self.last_failover.load(Ordering::Relaxed);

        FailoverStats {
            operation_count,
            error_count,
            failover_count: self.failover_count.load(Ordering::Relaxed),
            last_failover: (last_failover > 0).then_some(last_failover),
            error_rate: error_count as f64 / operation_count.max(1) as f64,
            circuit_state: self.breaker.state(),
            primary: self.primary.load_full().map(|n| n.addr.to_string()),
            replica: self.replica.load_full().map(|n| n.addr.to_string()),
        }
    }

    /// Drop cached connections. Later calls fail with `NotInitialized`.
    pub async fn close(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.primary.store(None);
        self.replica.store(None);
        tracing::info!(service = %self.service_name, "Store connections closed");
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
