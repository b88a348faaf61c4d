//! Admin HTTP surface.
//!
//! # Routes
//! ```text
//! GET    /health                       aggregate health (no auth)
//! GET    /admin/status                 one-line summary of every component
//! GET    /admin/store                  failover counters + breaker snapshot
//! POST   /admin/store/circuit/reset    force the store breaker closed
//! GET    /admin/tasks                  task manager stats + running tasks
//! GET    /admin/deadlines              deadline stats
//! GET    /admin/ratelimit/{caller}     stored limiter state
//! DELETE /admin/ratelimit/{caller}     clear limiter state
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::resilience::DeadlineEnforcer;
use crate::security::RateLimiter;
use crate::store::FailoverManager;
use crate::tasks::TaskManager;

/// Admin requests never wait on the store longer than this.
const ADMIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FailoverManager>,
    pub limiter: Arc<RateLimiter>,
    pub tasks: Arc<TaskManager>,
    pub deadlines: Arc<DeadlineEnforcer>,
    pub api_key: Arc<str>,
}

#[allow(deprecated)]
pub fn setup_admin_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/store", get(get_store))
        .route("/admin/store/circuit/reset", post(reset_circuit))
        .route("/admin/tasks", get(get_tasks))
        .route("/admin/deadlines", get(get_deadlines))
        .route(
            "/admin/ratelimit/{caller}",
            get(get_rate_limit).delete(reset_rate_limit),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(get_health))
        .merge(protected)
        .with_state(state)
        .layer(TimeoutLayer::new(ADMIN_REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API until the shutdown broadcast fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Admin API received shutdown signal");
        })
        .await
}
