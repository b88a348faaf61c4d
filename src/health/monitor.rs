//! Periodic store health probe.
//!
//! # Responsibilities
//! - Ping the primary on an interval
//! - Log status changes and export a health gauge
//! - Re-resolve the primary when it stops answering, so a failover is
//!   picked up even while no traffic flows

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthConfig;
use crate::health::status::HealthStatus;
use crate::observability::metrics;
use crate::store::FailoverManager;

pub struct StoreHealthMonitor {
    store: Arc<FailoverManager>,
    config: HealthConfig,
    last: Mutex<Option<HealthStatus>>,
}

impl StoreHealthMonitor {
    pub fn new(store: Arc<FailoverManager>, config: HealthConfig) -> Self {
        Self {
            store,
            config,
            last: Mutex::new(None),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Store health probe disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Store health monitor starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Store health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One probe. Returns the observed status.
    pub async fn check(&self) -> HealthStatus {
        let health = self.store.health_check().await;
        metrics::record_component_health("store", health.status.level());

        let previous = self.last.lock().replace(health.status);
        if previous != Some(health.status) {
            match health.status {
                HealthStatus::Healthy => tracing::info!(
                    primary = ?health.primary,
                    latency_ms = ?health.latency_ms,
                    "Store healthy"
                ),
                HealthStatus::Warning | HealthStatus::Critical => tracing::warn!(
                    primary = ?health.primary,
                    circuit = %health.circuit_state,
                    "Store degraded"
                ),
                HealthStatus::Unhealthy => tracing::error!(
                    primary = ?health.primary,
                    error = ?health.error,
                    "Store unhealthy"
                ),
            }
        }

        if health.status == HealthStatus::Unhealthy {
            if let Err(e) = self.store.refresh_primary().await {
                tracing::warn!(error = %e, "Primary re-resolution from health probe failed");
            }
        }

        health.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, RetryConfig, StoreConfig};
    use crate::store::{MemoryCluster, StoreAddr};

    async fn setup() -> (StoreHealthMonitor, MemoryCluster, Arc<FailoverManager>) {
        let cluster = MemoryCluster::local();
        let store = Arc::new(FailoverManager::new(
            Arc::new(cluster.clone()),
            &StoreConfig::default(),
            &CircuitBreakerConfig::default(),
            &RetryConfig::default(),
        ));
        store.init().await.unwrap();
        let monitor = StoreHealthMonitor::new(store.clone(), HealthConfig::default());
        (monitor, cluster, store)
    }

    #[tokio::test]
    async fn test_health_check_picks_up_failover() {
        let (monitor, cluster, store) = setup().await;
        assert_eq!(monitor.check().await, HealthStatus::Healthy);

        let old = cluster.primary();
        let new: StoreAddr = "127.0.0.1:6380".parse().unwrap();
        cluster.kill_node(&old);
        cluster.promote(&new);

        assert_eq!(monitor.check().await, HealthStatus::Unhealthy);
        assert_eq!(store.primary_addr(), Some(new));
        assert_eq!(monitor.check().await, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_shutdown() {
        let (monitor, _cluster, _store) = setup().await;
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor.run(rx));

        time::sleep(Duration::from_secs(65)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
