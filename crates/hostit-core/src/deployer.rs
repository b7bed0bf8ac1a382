//! Live backend provisioning for server-variant sites.
//!
//! A live backend is a scale-to-zero service that runs the container image
//! produced by a server build. Each successful deployment becomes a new
//! revision and receives all traffic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::site::EnvVar;
use crate::{ResourceId, Result};

/// A container image reference: `<registry>/<repository>:<tag>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// Image a server build of `deployment_id` pushes for `site_id`.
    pub fn for_deployment(
        registry: &str,
        prefix: &str,
        site_id: &ResourceId,
        deployment_id: &ResourceId,
    ) -> Self {
        let name = format!("hostit-{}", site_id);
        let repository = match prefix.trim_matches('/') {
            "" => name,
            prefix => format!("{}/{}", prefix, name),
        };
        Self {
            registry: registry.trim_end_matches('/').to_string(),
            repository,
            tag: deployment_id.to_string(),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// Desired state of a live backend revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveBackendSpec {
    pub site_id: ResourceId,
    pub deployment_id: ResourceId,
    pub image: ImageRef,
    pub env: Vec<EnvVar>,
    pub revision: String,
    pub traffic_tag: String,
    pub min_instances: u32,
    pub max_instances: u32,
    pub public: bool,
}

impl LiveBackendSpec {
    /// Spec for the revision of `deployment_id`, with a scale-to-zero policy
    /// and runtime markers appended to the frozen user environment.
    pub fn for_deployment(
        site_id: ResourceId,
        deployment_id: ResourceId,
        image: ImageRef,
        user_env: &[EnvVar],
    ) -> Self {
        let mut env: Vec<EnvVar> = user_env
            .iter()
            .filter(|v| !is_reserved_runtime_key(&v.key))
            .cloned()
            .collect();
        env.push(EnvVar::new("NODE_ENV", "production"));
        env.push(EnvVar::new("HOSTIT_DEPLOYMENT_ID", deployment_id.to_string()));

        Self {
            site_id,
            deployment_id,
            image,
            env,
            revision: revision_name(&site_id, &deployment_id),
            traffic_tag: format!("h{}", deployment_id.short(7)),
            min_instances: 0,
            max_instances: 1,
            public: true,
        }
    }
}

fn is_reserved_runtime_key(key: &str) -> bool {
    key == "NODE_ENV" || key == "HOSTIT_DEPLOYMENT_ID"
}

/// Stable service name for a site's live backend.
pub fn service_name(site_id: &ResourceId) -> String {
    format!("h{}", site_id.short(12))
}

/// Revision name for a deployment: site id plus short deployment id.
pub fn revision_name(site_id: &ResourceId, deployment_id: &ResourceId) -> String {
    format!("{}-{}", service_name(site_id), deployment_id.short(7))
}

/// A provisioned live backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBackend {
    /// Stable identifier persisted on the site.
    pub id: String,
    /// Public endpoint once known.
    pub url: Option<String>,
}

/// Container image registry.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Whether the image has been pushed.
    async fn has_image(&self, image: &ImageRef) -> Result<bool>;
}

/// Provisioner of live backends.
#[async_trait]
pub trait LiveBackendProvisioner: Send + Sync {
    /// Create the live backend for a site with its first revision.
    async fn create(&self, spec: &LiveBackendSpec) -> Result<LiveBackend>;

    /// Deploy a new revision on an existing backend and send it all traffic.
    async fn roll_out(&self, backend_id: &str, spec: &LiveBackendSpec) -> Result<LiveBackend>;
}
