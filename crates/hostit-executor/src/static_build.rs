//! Static builds run from a pre-provisioned job template.

use std::sync::Arc;

use async_trait::async_trait;
use hostit_core::executor::{BuildRequest, BuildStrategy, JobHandle, JobStatus};
use hostit_core::site::{BuildVariant, EnvVar};
use hostit_core::{Error, Result};
use k8s_openapi::api::batch::v1::{Job, JobTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::env::job_env;
use crate::kubernetes::{KubeJobService, build_labels, job_name, k8s_env};

/// Runs the static builder template once per dispatch, with the deployment's
/// environment injected into every container.
pub struct StaticBuildStrategy {
    jobs: Arc<KubeJobService>,
    template: String,
}

impl StaticBuildStrategy {
    pub fn new(jobs: Arc<KubeJobService>, template: impl Into<String>) -> Self {
        Self {
            jobs,
            template: template.into(),
        }
    }
}

#[async_trait]
impl BuildStrategy for StaticBuildStrategy {
    fn variant(&self) -> BuildVariant {
        BuildVariant::Static
    }

    async fn dispatch(&self, request: &BuildRequest) -> Result<JobHandle> {
        let template = self.jobs.template(&self.template).await?;
        let env = job_env(request, BuildVariant::Static);
        let job = static_job(template, job_name("static", &request.deployment_id), request, &env)?;
        self.jobs.submit(job).await
    }

    async fn check_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        self.jobs.status(handle).await
    }

    async fn fetch_logs(&self, handle: &JobHandle) -> Result<String> {
        self.jobs.logs(handle).await
    }
}

/// Instantiate a job from the template, overriding container environment.
pub fn static_job(
    template: JobTemplateSpec,
    name: String,
    request: &BuildRequest,
    env: &[EnvVar],
) -> Result<Job> {
    let mut spec = template
        .spec
        .ok_or_else(|| Error::Dispatch("job template has no job spec".to_string()))?;

    let overrides = k8s_env(env);
    let pod_spec = spec
        .template
        .spec
        .as_mut()
        .ok_or_else(|| Error::Dispatch("job template has no pod spec".to_string()))?;
    for container in &mut pod_spec.containers {
        let vars = container.env.get_or_insert_with(Vec::new);
        vars.retain(|existing| !overrides.iter().any(|o| o.name == existing.name));
        vars.extend(overrides.iter().cloned());
    }

    let template_meta = template.metadata.unwrap_or_default();
    let mut labels = template_meta.labels.unwrap_or_default();
    labels.extend(build_labels(request));

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(labels),
            annotations: template_meta.annotations,
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostit_core::ResourceId;
    use serde_json::json;

    fn template() -> JobTemplateSpec {
        serde_json::from_value(json!({
            "metadata": { "labels": { "app": "static-builder" } },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "builder",
                            "image": "ghcr.io/hostit/static-builder:latest",
                            "env": [
                                { "name": "ARTIFACT_BUCKET", "value": "artifacts" },
                                { "name": "HOSTIT_REPO_URL", "value": "placeholder" }
                            ]
                        }]
                    }
                }
            }
        }))
        .unwrap()
    }

    fn request() -> BuildRequest {
        BuildRequest {
            deployment_id: ResourceId::new_unguessable(),
            site_id: ResourceId::new(),
            clone_url: "https://github.com/octo/blog.git".to_string(),
            commit_sha: Some("abc123".to_string()),
            branch: Some("main".to_string()),
            env: vec![EnvVar::new("PUBLIC_API", "https://api.example")],
            callback_url: "https://hostit.example/callback?deployment_id=1".to_string(),
            artifact_key: "abc123".to_string(),
        }
    }

    #[test]
    fn test_job_overrides_template_env() {
        let req = request();
        let env = job_env(&req, BuildVariant::Static);
        let job = static_job(template(), "hostit-static-x".to_string(), &req, &env).unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("hostit-static-x"));
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("static-builder"));
        assert_eq!(
            labels.get(crate::kubernetes::DEPLOYMENT_LABEL),
            Some(&req.deployment_id.to_string())
        );

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let container = &spec.template.spec.unwrap().containers[0];
        let vars = container.env.as_ref().unwrap();
        let get = |key: &str| {
            vars.iter()
                .filter(|v| v.name == key)
                .map(|v| v.value.clone().unwrap_or_default())
                .collect::<Vec<_>>()
        };
        assert_eq!(get("ARTIFACT_BUCKET"), vec!["artifacts"]);
        assert_eq!(get("HOSTIT_REPO_URL"), vec!["https://github.com/octo/blog.git"]);
        assert_eq!(get("PUBLIC_API"), vec!["https://api.example"]);
    }

    #[test]
    fn test_template_without_spec_is_rejected() {
        let req = request();
        let result = static_job(JobTemplateSpec::default(), "x".to_string(), &req, &[]);
        assert!(matches!(result, Err(Error::Dispatch(_))));
    }
}
