//! Aggregate health across components.

use serde::Serialize;

use crate::health::status::HealthStatus;
use crate::resilience::{DeadlineEnforcer, DeadlineHealth};
use crate::store::{FailoverHealth, FailoverManager};
use crate::tasks::{TaskHealth, TaskManager};

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status of the parts.
    pub status: HealthStatus,
    pub store: FailoverHealth,
    pub tasks: TaskHealth,
    pub deadlines: DeadlineHealth,
}

impl HealthReport {
    pub async fn collect(
        store: &FailoverManager,
        tasks: &TaskManager,
        deadlines: &DeadlineEnforcer,
    ) -> Self {
        let store = store.health_check().await;
        let tasks = tasks.health_check();
        let deadlines = deadlines.get_health_status();
        let status = store.status.worst(tasks.status).worst(deadlines.status);

        Self {
            status,
            store,
            tasks,
            deadlines,
        }
    }
}
