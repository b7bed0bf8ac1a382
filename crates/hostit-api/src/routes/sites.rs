//! Site management endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::deployments::DeploymentSummary;
use hostit_core::ResourceId;
use hostit_core::site::{BuildVariant, EnvVar, NewSite, Site, SubdomainBinding};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sites).post(create_site))
        .route("/{site_id}", get(get_site))
        .route("/{site_id}/env", put(update_env_vars))
        .route(
            "/{site_id}/subdomains",
            get(list_subdomains).post(add_subdomain),
        )
        .route("/{site_id}/subdomains/{subdomain}", delete(remove_subdomain))
        .route(
            "/{site_id}/deployments",
            get(list_deployments).post(trigger_deploy),
        )
}

fn parse_id(raw: &str) -> Result<ResourceId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id: {}", raw)))
}

#[derive(Debug, Serialize)]
struct SiteResponse {
    id: String,
    owner_id: String,
    name: String,
    repository: String,
    variant: BuildVariant,
    env_vars: Vec<EnvVar>,
    active_deployment_id: Option<String>,
    live_backend: Option<String>,
}

impl From<Site> for SiteResponse {
    fn from(site: Site) -> Self {
        Self {
            id: site.id.to_string(),
            owner_id: site.owner_id,
            name: site.name,
            repository: site.repository,
            variant: site.variant,
            env_vars: site.env_vars,
            active_deployment_id: site.active_deployment_id.map(|id| id.to_string()),
            live_backend: site.live_backend,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubdomainResponse {
    subdomain: String,
    is_active: bool,
}

impl From<SubdomainBinding> for SubdomainResponse {
    fn from(binding: SubdomainBinding) -> Self {
        Self {
            subdomain: binding.subdomain,
            is_active: binding.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListSitesQuery {
    owner_id: String,
}

async fn list_sites(
    State(state): State<AppState>,
    Query(query): Query<ListSitesQuery>,
) -> Result<Json<Vec<SiteResponse>>, ApiError> {
    let sites = state.pipeline.list_sites(&query.owner_id).await?;
    Ok(Json(sites.into_iter().map(SiteResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
struct CreateSiteRequest {
    owner_id: String,
    name: String,
    repository: String,
    clone_url: Option<String>,
    variant: BuildVariant,
    #[serde(default)]
    env_vars: Vec<EnvVar>,
}

#[derive(Debug, Serialize)]
struct CreateSiteResponse {
    site: SiteResponse,
    subdomain: String,
    deployment: DeploymentSummary,
    dispatch_error: Option<String>,
}

async fn create_site(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<CreateSiteResponse>), ApiError> {
    let clone_url = req
        .clone_url
        .unwrap_or_else(|| format!("https://github.com/{}.git", req.repository));
    let created = state
        .pipeline
        .create_site(NewSite {
            owner_id: req.owner_id,
            name: req.name,
            repository: req.repository,
            clone_url,
            variant: req.variant,
            env_vars: req.env_vars,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSiteResponse {
            site: created.site.into(),
            subdomain: created.subdomain.subdomain,
            deployment: created.deployment.into(),
            dispatch_error: created.dispatch_error,
        }),
    ))
}

async fn get_site(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> Result<Json<SiteResponse>, ApiError> {
    let site = state.pipeline.get_site(parse_id(&site_id)?).await?;
    Ok(Json(site.into()))
}

#[derive(Debug, Deserialize)]
struct UpdateEnvRequest {
    env_vars: Vec<EnvVar>,
}

async fn update_env_vars(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(req): Json<UpdateEnvRequest>,
) -> Result<Json<SiteResponse>, ApiError> {
    let site = state
        .pipeline
        .update_env_vars(parse_id(&site_id)?, req.env_vars)
        .await?;
    Ok(Json(site.into()))
}

async fn list_subdomains(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> Result<Json<Vec<SubdomainResponse>>, ApiError> {
    let bindings = state.pipeline.list_subdomains(parse_id(&site_id)?).await?;
    Ok(Json(bindings.into_iter().map(SubdomainResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
struct AddSubdomainRequest {
    subdomain: String,
}

async fn add_subdomain(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(req): Json<AddSubdomainRequest>,
) -> Result<(StatusCode, Json<SubdomainResponse>), ApiError> {
    let binding = state
        .pipeline
        .add_subdomain(parse_id(&site_id)?, &req.subdomain)
        .await?;
    Ok((StatusCode::CREATED, Json(binding.into())))
}

async fn remove_subdomain(
    State(state): State<AppState>,
    Path((site_id, subdomain)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .pipeline
        .remove_subdomain(parse_id(&site_id)?, &subdomain)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_deployments(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> Result<Json<Vec<DeploymentSummary>>, ApiError> {
    let deployments = state.pipeline.list_deployments(parse_id(&site_id)?).await?;
    Ok(Json(
        deployments.into_iter().map(DeploymentSummary::from).collect(),
    ))
}

#[derive(Debug, Default, Deserialize)]
struct TriggerDeployRequest {
    branch: Option<String>,
}

async fn trigger_deploy(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    body: Option<Json<TriggerDeployRequest>>,
) -> Result<(StatusCode, Json<DeploymentSummary>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let deployment = state
        .pipeline
        .trigger_deploy(parse_id(&site_id)?, req.branch)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(deployment.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use axum::body::Body;
    use axum::http::Request;
    use hostit_scheduler::testing::TestPipeline;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(t: &TestPipeline) -> axum::Router {
        routes::router(AppState::new(t.pipeline.clone(), "secret"))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(t: &TestPipeline) -> Value {
        let response = app(t)
            .oneshot(json_request(
                "POST",
                "/api/v1/sites",
                json!({
                    "owner_id": "user-1",
                    "name": "Docs Site",
                    "repository": "octo/docs",
                    "variant": "static",
                    "env_vars": [{ "key": "PUBLIC_API", "value": "https://api.example" }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_create_site() {
        let t = TestPipeline::new();
        let created = create(&t).await;

        assert!(created["subdomain"].as_str().unwrap().starts_with("docs-site-"));
        assert_eq!(created["deployment"]["status"], "QUEUED");
        assert!(created["dispatch_error"].is_null());
        assert_eq!(
            t.static_builds.requests()[0].clone_url,
            "https://github.com/octo/docs.git"
        );
    }

    #[tokio::test]
    async fn test_create_site_rejects_bad_repository() {
        let t = TestPipeline::new();
        let response = app(&t)
            .oneshot(json_request(
                "POST",
                "/api/v1/sites",
                json!({
                    "owner_id": "user-1",
                    "name": "Docs",
                    "repository": "docs",
                    "variant": "static"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_subdomain_lifecycle() {
        let t = TestPipeline::new();
        let created = create(&t).await;
        let site_id = created["site"]["id"].as_str().unwrap();
        let uri = format!("/api/v1/sites/{}/subdomains", site_id);

        let response = app(&t)
            .oneshot(json_request("POST", &uri, json!({ "subdomain": "docs" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app(&t)
            .oneshot(json_request("POST", &uri, json!({ "subdomain": "docs" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app(&t)
            .oneshot(json_request("POST", &uri, json!({ "subdomain": "-bad-" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(&t)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("{}/docs", uri))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app(&t)
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let list = body_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_and_list_deployments() {
        let t = TestPipeline::new();
        let created = create(&t).await;
        let site_id = created["site"]["id"].as_str().unwrap();
        let uri = format!("/api/v1/sites/{}/deployments", site_id);

        let response = app(&t)
            .oneshot(json_request("POST", &uri, json!({ "branch": "main" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["branch"], "main");

        let response = app(&t)
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
        assert_eq!(t.static_builds.dispatch_count(), 2);
    }

    #[tokio::test]
    async fn test_update_env_vars() {
        let t = TestPipeline::new();
        let created = create(&t).await;
        let site_id = created["site"]["id"].as_str().unwrap();

        let response = app(&t)
            .oneshot(json_request(
                "PUT",
                &format!("/api/v1/sites/{}/env", site_id),
                json!({ "env_vars": [{ "key": "FEATURE_FLAG", "value": "on" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let site = body_json(response).await;
        assert_eq!(site["env_vars"][0]["key"], "FEATURE_FLAG");
    }

    #[tokio::test]
    async fn test_unknown_site_is_not_found() {
        let t = TestPipeline::new();
        let response = app(&t)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/sites/{}", ResourceId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(&t)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/sites/not-an-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
