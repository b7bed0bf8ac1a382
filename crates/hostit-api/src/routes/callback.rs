//! Build progress callbacks.
//!
//! Build jobs call back to `/callback?deployment_id=<id>`. The unguessable
//! deployment id is the only credential.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::AppState;
use crate::error::ApiError;
use hostit_core::ResourceId;

/// Status meaning "check the job now" when the body carries none.
const CHECK: &str = "check";

pub fn router() -> Router<AppState> {
    Router::new().route("/callback", post(build_callback))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    deployment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    status: String,
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    deployment_id: String,
    status: String,
}

async fn build_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> Result<Json<CallbackResponse>, ApiError> {
    let raw_id = query
        .deployment_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("deployment_id is required".to_string()))?;
    let deployment_id: ResourceId = raw_id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("deployment {}", raw_id)))?;

    let status = match serde_json::from_slice::<CallbackBody>(&body) {
        Ok(body) => body.status,
        Err(e) => {
            debug!(deployment_id = %deployment_id, error = %e, "Callback without status");
            CHECK.to_string()
        }
    };
    info!(deployment_id = %deployment_id, status = %status, "Build callback");

    let deployment = state
        .pipeline
        .handle_callback(deployment_id, &status)
        .await?;

    Ok(Json(CallbackResponse {
        deployment_id: deployment.id.to_string(),
        status: deployment.status.to_string(),
    }))
}
