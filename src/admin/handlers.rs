use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AppState;
use crate::health::{HealthReport, HealthStatus};
use crate::resilience::{CircuitBreakerMetrics, CircuitState, DeadlineStats};
use crate::security::RateLimitRecord;
use crate::store::{FailoverStats, StoreError};
use crate::tasks::TaskStats;

/// Store failures surfaced to admin callers.
#[derive(Debug)]
pub struct AdminError(StoreError);

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = if self.0.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: HealthStatus,
    pub primary: Option<String>,
    pub circuit_state: CircuitState,
    pub active_tasks: usize,
    pub timeout_rate: f64,
}

#[derive(Serialize)]
pub struct StoreStatus {
    pub stats: FailoverStats,
    pub circuit: CircuitBreakerMetrics,
}

#[derive(Serialize)]
pub struct RunningTask {
    pub name: String,
    pub running_secs: f64,
}

#[derive(Serialize)]
pub struct TaskStatus {
    pub stats: TaskStats,
    pub running: Vec<RunningTask>,
}

#[derive(Serialize)]
pub struct RateLimitReset {
    pub caller: String,
    pub removed: u64,
}

pub async fn get_health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::collect(&state.store, &state.tasks, &state.deadlines).await;
    let code = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report))
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let report = HealthReport::collect(&state.store, &state.tasks, &state.deadlines).await;

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: report.status,
        primary: report.store.primary,
        circuit_state: report.store.circuit_state,
        active_tasks: report.tasks.stats.active,
        timeout_rate: report.deadlines.timeout_rate,
    })
}

pub async fn get_store(State(state): State<AppState>) -> Json<StoreStatus> {
    Json(StoreStatus {
        stats: state.store.stats(),
        circuit: state.store.circuit_breaker().snapshot(),
    })
}

pub async fn reset_circuit(State(state): State<AppState>) -> Json<CircuitBreakerMetrics> {
    let breaker = state.store.circuit_breaker();
    breaker.force_closed();
    tracing::info!(component = %breaker.name(), "Circuit breaker reset via admin API");
    Json(breaker.snapshot())
}

pub async fn get_tasks(State(state): State<AppState>) -> Json<TaskStatus> {
    let running = state
        .tasks
        .active_tasks()
        .into_iter()
        .map(|(name, age)| RunningTask {
            name,
            running_secs: age.as_secs_f64(),
        })
        .collect();

    Json(TaskStatus {
        stats: state.tasks.stats(),
        running,
    })
}

pub async fn get_deadlines(State(state): State<AppState>) -> Json<DeadlineStats> {
    Json(state.deadlines.stats())
}

pub async fn get_rate_limit(
    State(state): State<AppState>,
    Path(caller): Path<String>,
) -> Result<Json<RateLimitRecord>, AdminError> {
    Ok(Json(state.limiter.peek(&caller).await?))
}

pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Path(caller): Path<String>,
) -> Result<Json<RateLimitReset>, AdminError> {
    let removed = state.limiter.reset(&caller).await?;
    tracing::info!(caller = %caller, removed = removed, "Rate limit reset via admin API");
    Ok(Json(RateLimitReset { caller, removed }))
}
