//! Edge request router for hostit sites.
//!
//! Every request is routed by the first label of its host. The subdomain's
//! routing entry either names a static artifact, served from the artifact
//! root, or a live backend URL the request is proxied to.

pub mod error;
pub mod host;
pub mod proxy;
pub mod static_files;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use hostit_core::routing::RouteTarget;
use hostit_routing::RouteCache;
use tracing::debug;

use crate::error::RouterError;

/// Shared router state.
#[derive(Clone)]
pub struct RouterState {
    pub cache: Arc<RouteCache>,
    pub artifact_root: Arc<PathBuf>,
    pub client: reqwest::Client,
    pub max_body_bytes: usize,
}

/// Build the router. Every path is handled by host-based dispatch.
pub fn router(state: RouterState) -> Router {
    Router::new().fallback(route_request).with_state(state)
}

async fn route_request(
    State(state): State<RouterState>,
    request: Request,
) -> Result<Response, RouterError> {
    let subdomain = host::request_host(request.headers(), request.uri())
        .and_then(host::subdomain)
        .ok_or(RouterError::MissingHost)?;

    let target = state
        .cache
        .resolve(&subdomain)
        .await
        .map_err(|e| RouterError::StoreUnavailable(e.to_string()))?
        .ok_or_else(|| RouterError::UnknownSite(subdomain.clone()))?;
    debug!(subdomain = %subdomain, target = %target, "Routing request");

    match target {
        RouteTarget::Backend(url) => {
            proxy::forward(&state.client, &url, request, state.max_body_bytes).await
        }
        RouteTarget::Artifact(pointer) => {
            static_files::serve_artifact(&state.artifact_root, &pointer, request).await
        }
    }
}
