//! Server builds: a one-shot job that builds and pushes a container image.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostit_core::deployer::ImageRef;
use hostit_core::executor::{BuildRequest, BuildStrategy, JobHandle, JobStatus};
use hostit_core::Result;
use hostit_core::site::{BuildVariant, EnvVar};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, SecurityContext};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::env::{IMAGE, REGISTRY_TOKEN, job_env, user_env};
use crate::kubernetes::{KubeJobService, build_labels, job_name, k8s_env};
use crate::script::{build_arg_keys, build_script};

/// Where server builds push their images.
#[derive(Debug, Clone)]
pub struct ImageTarget {
    pub registry: String,
    pub repository_prefix: String,
    pub token: Option<String>,
}

impl ImageTarget {
    pub fn image_for(&self, request: &BuildRequest) -> ImageRef {
        ImageRef::for_deployment(
            &self.registry,
            &self.repository_prefix,
            &request.site_id,
            &request.deployment_id,
        )
    }
}

pub struct ServerBuildStrategy {
    jobs: Arc<KubeJobService>,
    builder_image: String,
    target: ImageTarget,
    max_run_duration: Duration,
}

impl ServerBuildStrategy {
    pub fn new(
        jobs: Arc<KubeJobService>,
        builder_image: impl Into<String>,
        target: ImageTarget,
        max_run_duration: Duration,
    ) -> Self {
        Self {
            jobs,
            builder_image: builder_image.into(),
            target,
            max_run_duration,
        }
    }
}

/// Job definition for one server build dispatch.
pub fn server_job(
    request: &BuildRequest,
    name: String,
    builder_image: &str,
    target: &ImageTarget,
    max_run_duration: Duration,
) -> Job {
    let image = target.image_for(request);

    let mut env = job_env(request, BuildVariant::Server);
    env.push(EnvVar::new(IMAGE, image.to_string()));
    if let Some(token) = &target.token {
        env.push(EnvVar::new(REGISTRY_TOKEN, token));
    }

    let user_vars = user_env(&request.env);
    let script = build_script(&image, &build_arg_keys(&user_vars));

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(build_labels(request)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(i64::try_from(max_run_duration.as_secs()).unwrap_or(i64::MAX)),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(build_labels(request)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "builder".to_string(),
                        image: Some(builder_image.to_string()),
                        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                        args: Some(vec![script]),
                        env: Some(k8s_env(&env)),
                        security_context: Some(SecurityContext {
                            privileged: Some(true),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl BuildStrategy for ServerBuildStrategy {
    fn variant(&self) -> BuildVariant {
        BuildVariant::Server
    }

    async fn dispatch(&self, request: &BuildRequest) -> Result<JobHandle> {
        let job = server_job(
            request,
            job_name("server", &request.deployment_id),
            &self.builder_image,
            &self.target,
            self.max_run_duration,
        );
        self.jobs.submit(job).await
    }

    async fn check_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        self.jobs.status(handle).await
    }

    async fn fetch_logs(&self, handle: &JobHandle) -> Result<String> {
        self.jobs.logs(handle).await
    }
}
