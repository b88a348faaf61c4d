//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the guard services in dependency order
//! - Start the background loops (task cleanup, store health probe)
//! - Apply live-reloadable settings
//! - Tear everything down in reverse order
//!
//! # Design Decisions
//! - Fail fast: an unreachable store at startup is fatal
//! - Services initialize in order, not concurrently

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::admin::AppState;
use crate::config::GuardConfig;
use crate::health::StoreHealthMonitor;
use crate::lifecycle::shutdown::Shutdown;
use crate::pipeline::RequestGuard;
use crate::resilience::DeadlineEnforcer;
use crate::security::RateLimiter;
use crate::store::{FailoverManager, StoreDriver, StoreError};
use crate::tasks::{ShutdownReport, TaskManager};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("store initialization failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// The long-lived services of one guard instance.
#[derive(Debug, Clone)]
pub struct GuardServices {
    pub store: Arc<FailoverManager>,
    pub limiter: Arc<RateLimiter>,
    pub tasks: Arc<TaskManager>,
    pub deadlines: Arc<DeadlineEnforcer>,
}

impl GuardServices {
    pub async fn start(config: &GuardConfig, driver: Arc<dyn StoreDriver>) -> Result<Self, StartupError> {
        let store = Arc::new(FailoverManager::new(
            driver,
            &config.store,
            &config.circuit_breaker,
            &config.retries,
        ));
        store.init().await?;

        let limiter = Arc::new(RateLimiter::new(store.clone(), config.rate_limit.clone()));
        let tasks = Arc::new(TaskManager::new(&config.tasks));
        let deadlines = Arc::new(DeadlineEnforcer::new(&config.deadline));

        tracing::info!("Guard services started");
        Ok(Self {
            store,
            limiter,
            tasks,
            deadlines,
        })
    }

    pub fn request_guard(&self) -> RequestGuard {
        RequestGuard::new(self.deadlines.clone(), self.limiter.clone())
    }

    pub fn admin_state(&self, api_key: &str) -> AppState {
        AppState {
            store: self.store.clone(),
            limiter: self.limiter.clone(),
            tasks: self.tasks.clone(),
            deadlines: self.deadlines.clone(),
            api_key: Arc::from(api_key),
        }
    }

    /// Start the task cleanup loop and the store health probe.
    pub fn spawn_background(&self, config: &GuardConfig, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let tasks = self.tasks.clone();
        let cleanup_rx = shutdown.subscribe();
        let cleanup = tokio::spawn(async move { tasks.run_cleanup_loop(cleanup_rx).await });

        let monitor = StoreHealthMonitor::new(self.store.clone(), config.health.clone());
        let health = tokio::spawn(monitor.run(shutdown.subscribe()));

        vec![cleanup, health]
    }

    /// Apply the settings that may change without a restart.
    pub fn apply_reload(&self, config: &GuardConfig) {
        if self.limiter.config() != config.rate_limit {
            self.limiter.update_config(config.rate_limit.clone());
        }
        if let Err(e) = self.deadlines.configure_threshold(config.deadline.slow_threshold) {
            tracing::error!(error = %e, "Ignoring reloaded slow threshold");
        }
    }

    /// Drain background work, then drop store connections.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let report = self.tasks.shutdown_all(timeout, true).await;
        self.store.close().await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::store::MemoryCluster;

    #[tokio::test]
    async fn test_start_fails_without_discovery() {
        let cluster = MemoryCluster::local();
        cluster.set_discovery_reachable(false);

        let result = GuardServices::start(&GuardConfig::default(), Arc::new(cluster)).await;
        assert!(matches!(result, Err(StartupError::Store(_))));
    }

    #[tokio::test]
    async fn test_reload_applies_live_settings() {
        let services = GuardServices::start(&GuardConfig::default(), Arc::new(MemoryCluster::local()))
            .await
            .unwrap();

        let mut config = GuardConfig::default();
        config.rate_limit = RateLimitConfig {
            max_tokens: 50.0,
            ..RateLimitConfig::default()
        };
        config.deadline.slow_threshold = 0.9;
        services.apply_reload(&config);

        assert_eq!(services.limiter.config().max_tokens, 50.0);
        assert_eq!(services.deadlines.slow_threshold(), 0.9);
    }

    #[tokio::test]
    async fn test_shutdown_closes_store() {
        let services = GuardServices::start(&GuardConfig::default(), Arc::new(MemoryCluster::local()))
            .await
            .unwrap();
        let shutdown = Shutdown::new();
        let handles = services.spawn_background(&GuardConfig::default(), &shutdown);

        shutdown.trigger();
        for handle in handles {
            handle.await.unwrap();
        }
        services.shutdown(Duration::from_secs(1)).await;
        assert!(services.store.get_connection(false).is_err());
    }
}
