//! Knative Serving provisioner.
//!
//! Each site gets one `serving.knative.dev/v1` Service. Every deployment adds
//! a named revision that receives all traffic. The backend id persisted on the
//! site is `<namespace>/<service>`.

use std::time::Duration;

use async_trait::async_trait;
use hostit_core::deployer::{LiveBackend, LiveBackendProvisioner, LiveBackendSpec, service_name};
use hostit_core::{Error, Result};
use kube::Client;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, GroupVersionKind};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FIELD_MANAGER: &str = "hostit";

pub struct KnativeProvisioner {
    client: Client,
    namespace: String,
    container_port: u16,
    ready_timeout: Duration,
    poll_interval: Duration,
}

impl KnativeProvisioner {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        container_port: u16,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            container_port,
            ready_timeout,
            poll_interval: Duration::from_secs(2),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "serving.knative.dev",
            "v1",
            "Service",
        ));
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    fn manifest(&self, spec: &LiveBackendSpec) -> Result<DynamicObject> {
        let manifest = service_manifest(spec, &self.namespace, self.container_port);
        serde_json::from_value(manifest)
            .map_err(|e| Error::Provisioning(format!("invalid service manifest: {}", e)))
    }

    async fn apply(&self, namespace: &str, name: &str, spec: &LiveBackendSpec) -> Result<()> {
        let object = self.manifest(spec)?;
        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&object),
            )
            .await
            .map_err(|e| Error::Provisioning(format!("failed to update {}: {}", name, e)))?;
        Ok(())
    }

    /// Poll until the revision is ready and the service reports a URL.
    async fn wait_ready(&self, namespace: &str, name: &str, revision: &str) -> Result<String> {
        let api = self.api(namespace);
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            match api.get_opt(name).await {
                Ok(Some(object)) => {
                    if let Some(url) = ready_url(&object.data, revision) {
                        return Ok(url);
                    }
                }
                Ok(None) => {
                    return Err(Error::Provisioning(format!("service {} disappeared", name)));
                }
                Err(e) => warn!(service = %name, error = %e, "Failed to read service status"),
            }

            if Instant::now() >= deadline {
                return Err(Error::Provisioning(format!(
                    "revision {} not ready after {:?}",
                    revision, self.ready_timeout
                )));
            }
            debug!(service = %name, revision, "Waiting for revision");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl LiveBackendProvisioner for KnativeProvisioner {
    async fn create(&self, spec: &LiveBackendSpec) -> Result<LiveBackend> {
        let name = service_name(&spec.site_id);
        let object = self.manifest(spec)?;

        match self
            .api(&self.namespace)
            .create(&PostParams::default(), &object)
            .await
        {
            Ok(_) => info!(service = %name, revision = %spec.revision, "Created live backend"),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                info!(service = %name, "Live backend already exists, updating");
                self.apply(&self.namespace, &name, spec).await?;
            }
            Err(e) => {
                return Err(Error::Provisioning(format!(
                    "failed to create {}: {}",
                    name, e
                )));
            }
        }

        let url = self.wait_ready(&self.namespace, &name, &spec.revision).await?;
        Ok(LiveBackend {
            id: format!("{}/{}", self.namespace, name),
            url: Some(url),
        })
    }

    async fn roll_out(&self, backend_id: &str, spec: &LiveBackendSpec) -> Result<LiveBackend> {
        let (namespace, name) = backend_id
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("malformed backend id: {}", backend_id)))?;

        self.apply(namespace, name, spec).await?;
        info!(service = %name, revision = %spec.revision, "Rolled out revision");

        let url = self.wait_ready(namespace, name, &spec.revision).await?;
        Ok(LiveBackend {
            id: backend_id.to_string(),
            url: Some(url),
        })
    }
}

/// Knative Service manifest for a revision.
pub fn service_manifest(spec: &LiveBackendSpec, namespace: &str, container_port: u16) -> Value {
    let name = service_name(&spec.site_id);
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|v| json!({ "name": v.key, "value": v.value }))
        .collect();

    let mut labels = json!({
        "hostit.dev/site-id": spec.site_id.to_string(),
    });
    if !spec.public {
        labels["networking.knative.dev/visibility"] = json!("cluster-local");
    }

    json!({
        "apiVersion": "serving.knative.dev/v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": labels,
        },
        "spec": {
            "template": {
                "metadata": {
                    "name": spec.revision,
                    "labels": {
                        "hostit.dev/deployment-id": spec.deployment_id.to_string(),
                    },
                    "annotations": {
                        "autoscaling.knative.dev/min-scale": spec.min_instances.to_string(),
                        "autoscaling.knative.dev/max-scale": spec.max_instances.to_string(),
                    },
                },
                "spec": {
                    "containers": [{
                        "image": spec.image.to_string(),
                        "ports": [{ "containerPort": container_port }],
                        "env": env,
                    }],
                },
            },
            "traffic": [{
                "revisionName": spec.revision,
                "percent": 100,
                "tag": spec.traffic_tag,
            }],
        },
    })
}

/// Service URL once `revision` is the latest ready revision.
pub fn ready_url(data: &Value, revision: &str) -> Option<String> {
    let status = data.get("status")?;
    let latest_ready = status.get("latestReadyRevisionName")?.as_str()?;
    if latest_ready != revision {
        return None;
    }
    status.get("url")?.as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostit_core::ResourceId;
    use hostit_core::deployer::ImageRef;
    use hostit_core::site::EnvVar;

    fn spec() -> LiveBackendSpec {
        let site: ResourceId = "0192f1c4-7a2b-7c3d-8e4f-a1b2c3d4e5f6".parse().unwrap();
        let deployment: ResourceId = "9f8e7d6c-5b4a-4321-8fed-cba987654321".parse().unwrap();
        let image = ImageRef::for_deployment("registry.example", "server-builds", &site, &deployment);
        LiveBackendSpec::for_deployment(site, deployment, image, &[EnvVar::new("PORT_NAME", "web")])
    }

    #[test]
    fn test_manifest_routes_all_traffic_to_revision() {
        let manifest = service_manifest(&spec(), "hostit-sites", 3000);

        assert_eq!(manifest["metadata"]["name"], "h0192f1c47a2b");
        assert_eq!(manifest["spec"]["template"]["metadata"]["name"], "h0192f1c47a2b-9f8e7d6");
        assert_eq!(
            manifest["spec"]["template"]["metadata"]["annotations"]
                ["autoscaling.knative.dev/min-scale"],
            "0"
        );
        assert_eq!(manifest["spec"]["traffic"][0]["revisionName"], "h0192f1c47a2b-9f8e7d6");
        assert_eq!(manifest["spec"]["traffic"][0]["percent"], 100);
        assert_eq!(manifest["spec"]["traffic"][0]["tag"], "h9f8e7d6");
        assert!(manifest["metadata"]["labels"]
            .get("networking.knative.dev/visibility")
            .is_none());

        let env = manifest["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap();
        assert!(env.iter().any(|v| v["name"] == "NODE_ENV" && v["value"] == "production"));
    }

    #[test]
    fn test_private_backend_is_cluster_local() {
        let mut spec = spec();
        spec.public = false;
        let manifest = service_manifest(&spec, "hostit-sites", 3000);
        assert_eq!(
            manifest["metadata"]["labels"]["networking.knative.dev/visibility"],
            "cluster-local"
        );
    }

    #[test]
    fn test_manifest_parses_as_dynamic_object() {
        let object: DynamicObject =
            serde_json::from_value(service_manifest(&spec(), "ns", 8080)).unwrap();
        assert_eq!(object.metadata.name.as_deref(), Some("h0192f1c47a2b"));
    }

    #[test]
    fn test_ready_url_requires_matching_revision() {
        let data = json!({
            "status": {
                "url": "https://h0192f1c47a2b.sites.example",
                "latestReadyRevisionName": "h0192f1c47a2b-old1234"
            }
        });
        assert_eq!(ready_url(&data, "h0192f1c47a2b-9f8e7d6"), None);
        assert_eq!(
            ready_url(&data, "h0192f1c47a2b-old1234").as_deref(),
            Some("https://h0192f1c47a2b.sites.example")
        );
        assert_eq!(ready_url(&json!({}), "x"), None);
    }
}
