use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::observability::MetricsSnapshot;
use crate::repository::InstanceCounts;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_connections: u64,
}

#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    pub projects: u64,
    pub instances: u64,
    #[serde(flatten)]
    pub counts: InstanceCounts,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let status = match state.repository.ping().await {
        Ok(()) => "operational",
        Err(_) => "degraded",
    };
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        active_connections: state.tracker.active_count(),
    })
}

pub async fn get_instances(
    State(state): State<AdminState>,
) -> Result<Json<InstanceSummary>, (StatusCode, String)> {
    let unavailable = |e: crate::repository::RepositoryError| (StatusCode::SERVICE_UNAVAILABLE, e.to_string());

    let counts = state.repository.instance_counts().await.map_err(unavailable)?;
    let projects = state.repository.project_count().await.map_err(unavailable)?;
    let instances = state.repository.instance_count().await.map_err(unavailable)?;

    Ok(Json(InstanceSummary {
        projects,
        instances,
        counts,
    }))
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
