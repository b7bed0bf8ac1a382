//! Push webhook endpoint for GitHub.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;
use hostit_core::repository::PushEvent;

const EVENT_HEADER: &str = "X-GitHub-Event";
const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", name)))
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let delivery = header(&headers, DELIVERY_HEADER)?;
    let event_type = header(&headers, EVENT_HEADER)?;
    let signature = header(&headers, SIGNATURE_HEADER)?;

    if !verify_github_signature(&state.webhook_secret, &body, Some(signature)) {
        warn!(delivery = %delivery, event = %event_type, "Invalid webhook signature");
        return Err(ApiError::Unauthorized("signature mismatch".to_string()));
    }

    info!(delivery = %delivery, event = %event_type, "Received GitHub webhook");

    match event_type {
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            Ok((StatusCode::OK, Json(json!({ "status": "pong" }))))
        }
        "push" => {
            let payload: Value = serde_json::from_slice(&body)
                .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;
            let push_event = PushEvent::from_github_payload(&payload)
                .ok_or_else(|| ApiError::BadRequest("malformed push payload".to_string()))?;

            info!(
                repo = %push_event.repository_full_name,
                branch = ?push_event.branch,
                sha = %push_event.after,
                pusher = %push_event.pusher,
                "Processing push event"
            );
            let pushed = state.pipeline.handle_push(&push_event).await?;
            let ids: Vec<String> = pushed.iter().map(|p| p.deployment.id.to_string()).collect();
            let dispatch_errors: Map<String, Value> = pushed
                .iter()
                .filter_map(|p| {
                    let error = p.dispatch_error.clone()?;
                    Some((p.deployment.id.to_string(), Value::String(error)))
                })
                .collect();

            if dispatch_errors.is_empty() {
                return Ok((StatusCode::OK, Json(json!({ "deployments": ids }))));
            }
            warn!(
                repo = %push_event.repository_full_name,
                failed = dispatch_errors.len(),
                "Builds could not be dispatched"
            );
            Ok((
                StatusCode::OK,
                Json(json!({ "deployments": ids, "dispatch_errors": dispatch_errors })),
            ))
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
            Err(ApiError::NotImplemented(format!(
                "unsupported event: {}",
                event_type
            )))
        }
    }
}

/// Verify GitHub webhook signature.
pub fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
