//! Deployment endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use hostit_core::ResourceId;
use hostit_core::deployment::Deployment;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{deployment_id}", get(get_deployment))
        .route("/{deployment_id}/logs", get(get_logs))
}

/// Deployment as returned by the API, without its build logs.
#[derive(Debug, Serialize)]
pub struct DeploymentSummary {
    pub id: String,
    pub site_id: String,
    pub status: String,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub error: Option<String>,
    pub backend_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Deployment> for DeploymentSummary {
    fn from(d: Deployment) -> Self {
        Self {
            id: d.id.to_string(),
            site_id: d.site_id.to_string(),
            status: d.status.to_string(),
            branch: d.branch,
            commit_hash: d.commit_hash,
            commit_message: d.commit_message,
            error: d.error,
            backend_url: d.backend_url,
            created_at: d.created_at,
            started_at: d.started_at,
            completed_at: d.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    deployment_id: String,
    logs: String,
}

fn parse_id(raw: &str) -> Result<ResourceId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("deployment {}", raw)))
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<Json<DeploymentSummary>, ApiError> {
    let deployment = state
        .pipeline
        .get_deployment(parse_id(&deployment_id)?)
        .await?;
    Ok(Json(deployment.into()))
}

async fn get_logs(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> Result<Json<LogsResponse>, ApiError> {
    let id = parse_id(&deployment_id)?;
    let logs = state.pipeline.deployment_logs(id).await?;
    Ok(Json(LogsResponse {
        deployment_id: id.to_string(),
        logs,
    }))
}
