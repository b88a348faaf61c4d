//! sentinel-guard daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!     Inbound request (caller id)
//!     ─────────────────────────────▶ pipeline::RequestGuard
//!                                      │
//!                                      ├─ resilience::DeadlineEnforcer (budget)
//!                                      ├─ security::RateLimiter ──────┐
//!                                      └─ handler ─▶ tasks::TaskManager
//!                                                                     │
//!                                      store::FailoverManager ◀───────┘
//!                                        ├─ resilience::CircuitBreaker
//!                                        └─ StoreDriver (sentinels / memory)
//!
//!     Cross-cutting: config (hot reload), observability (logs + Prometheus),
//!     health (store probe), admin (HTTP), lifecycle (startup/shutdown)
//! ```

use clap::Parser;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use sentinel_guard::admin;
use sentinel_guard::config::{load_config, watcher::ConfigWatcher, GuardConfig};
use sentinel_guard::lifecycle::{wait_for_signal, GuardServices, Shutdown, StartupError};
use sentinel_guard::observability::{logging, metrics};
use sentinel_guard::store::{MemoryCluster, SentinelDriver, StoreDriver};

/// Background loops get this long to exit after the shutdown broadcast.
const LOOP_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "sentinel-guard", version)]
#[command(about = "Resilience and admission control for a replicated-store backed service")]
struct Args {
    /// Path to the TOML config file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use an in-process store instead of the configured sentinels
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "sentinel-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let driver: Arc<dyn StoreDriver> = if args.memory_store {
        tracing::warn!("Using in-process memory store; limits are not shared across instances");
        Arc::new(MemoryCluster::local())
    } else {
        Arc::new(SentinelDriver::from_config(&config.store)?)
    };

    let services = match GuardServices::start(&config, driver).await {
        Ok(services) => services,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    let shutdown = Shutdown::new();
    let mut background = services.spawn_background(&config, &shutdown);

    // Held for the life of the process; dropping it stops file events.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(watcher) => {
                    let reload = services.clone();
                    let mut stop = shutdown.subscribe();
                    background.push(tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                Some(new_config) = updates.recv() => reload.apply_reload(&new_config),
                                _ = stop.recv() => break,
                            }
                        }
                    }));
                    Some(watcher)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    if config.admin.enabled {
        let address = config.admin.bind_address.clone();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => return Err(StartupError::Bind { address, source }.into()),
        };
        let router = admin::setup_admin_router(services.admin_state(&config.admin.api_key));
        let stop = shutdown.subscribe();
        background.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, router, stop).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    let signal = wait_for_signal().await;
    tracing::info!(signal = signal, "Shutdown signal received");
    shutdown.trigger();

    if tokio::time::timeout(LOOP_EXIT_TIMEOUT, join_all(background)).await.is_err() {
        tracing::warn!(timeout = ?LOOP_EXIT_TIMEOUT, "Background loops did not exit in time");
    }

    let report = services
        .shutdown(Duration::from_secs(config.tasks.shutdown_timeout_secs))
        .await;
    tracing::info!(
        cancelled = report.cancelled,
        completed = report.completed,
        failed = report.failed,
        "Shutdown complete"
    );
    Ok(())
}
