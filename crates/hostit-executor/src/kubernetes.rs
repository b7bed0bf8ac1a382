//! Kubernetes job service.
//!
//! Build jobs are `batch/v1` Jobs. A handle's execution id is the Job name
//! and its operation id is `<namespace>/<name>`.

use std::collections::BTreeMap;

use hostit_core::executor::{BuildRequest, JobHandle, JobStatus};
use hostit_core::site::EnvVar;
use hostit_core::{Error, ResourceId, Result};
use k8s_openapi::api::batch::v1::{CronJob, Job, JobTemplateSpec};
use k8s_openapi::api::core::v1::{EnvVar as K8sEnvVar, Pod};
use kube::Client;
use kube::api::{Api, ListParams, LogParams, PostParams};
use tracing::{debug, info};

/// Label carrying the deployment a job builds.
pub const DEPLOYMENT_LABEL: &str = "hostit.dev/deployment-id";
/// Label carrying the site a job builds.
pub const SITE_LABEL: &str = "hostit.dev/site-id";

pub struct KubeJobService {
    client: Client,
    namespace: String,
}

impl KubeJobService {
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::JobService(e.to_string()))?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Job template of a pre-provisioned (suspended) CronJob.
    pub async fn template(&self, name: &str) -> Result<JobTemplateSpec> {
        let cron_jobs: Api<CronJob> = Api::namespaced(self.client.clone(), &self.namespace);
        let cron_job = cron_jobs
            .get_opt(name)
            .await
            .map_err(|e| Error::JobService(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("job template {}", name)))?;

        cron_job
            .spec
            .map(|spec| spec.job_template)
            .ok_or_else(|| Error::JobService(format!("job template {} has no spec", name)))
    }

    /// Create a job and return its handle.
    pub async fn submit(&self, job: Job) -> Result<JobHandle> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
        let created = jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| Error::JobService(format!("Failed to create job: {}", e)))?;

        let name = created
            .metadata
            .name
            .ok_or_else(|| Error::JobService("created job has no name".to_string()))?;
        info!(job = %name, namespace = %self.namespace, "Submitted build job");
        Ok(handle_for(&self.namespace, &name))
    }

    /// Status of a job. A job the cluster no longer knows is `NotFound`.
    pub async fn status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let (namespace, name) = parse_operation(&handle.operation)?;
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let job = jobs
            .get_opt(name)
            .await
            .map_err(|e| Error::JobService(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("job {}", handle.operation)))?;
        Ok(job_status(&job))
    }

    /// Logs of every pod the job has run, oldest first.
    pub async fn logs(&self, handle: &JobHandle) -> Result<String> {
        let (namespace, name) = parse_operation(&handle.operation)?;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut list = pods
            .list(&ListParams::default().labels(&format!("job-name={}", name)))
            .await
            .map_err(|e| Error::JobService(e.to_string()))?
            .items;
        list.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
        });

        let mut output = String::new();
        for pod in list {
            let Some(pod_name) = pod.metadata.name else {
                continue;
            };
            match pods.logs(&pod_name, &LogParams::default()).await {
                Ok(logs) => output.push_str(&logs),
                Err(e) => debug!(pod = %pod_name, error = %e, "Pod logs unavailable"),
            }
        }
        Ok(output)
    }
}

pub fn handle_for(namespace: &str, name: &str) -> JobHandle {
    JobHandle {
        execution: name.to_string(),
        operation: format!("{}/{}", namespace, name),
    }
}

/// Unique job name for one dispatch of a deployment.
pub fn job_name(kind: &str, deployment_id: &ResourceId) -> String {
    format!(
        "hostit-{}-{}-{}",
        kind,
        deployment_id.short(12),
        ResourceId::new_unguessable().short(5)
    )
}

pub fn build_labels(request: &BuildRequest) -> BTreeMap<String, String> {
    BTreeMap::from([
        (DEPLOYMENT_LABEL.to_string(), request.deployment_id.to_string()),
        (SITE_LABEL.to_string(), request.site_id.to_string()),
    ])
}

pub fn k8s_env(vars: &[EnvVar]) -> Vec<K8sEnvVar> {
    vars.iter()
        .map(|v| K8sEnvVar {
            name: v.key.clone(),
            value: Some(v.value.clone()),
            ..Default::default()
        })
        .collect()
}

fn parse_operation(operation: &str) -> Result<(&str, &str)> {
    operation
        .split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("malformed job operation: {}", operation)))
}

/// Map a Job's reported state onto a build status.
pub fn job_status(job: &Job) -> JobStatus {
    let Some(status) = &job.status else {
        return JobStatus::Pending;
    };

    for condition in status.conditions.iter().flatten() {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => {
                return JobStatus::Succeeded {
                    finished_at: status.completion_time.as_ref().map(|t| t.0),
                };
            }
            "Failed" => {
                return JobStatus::Failed {
                    message: condition
                        .message
                        .clone()
                        .or_else(|| condition.reason.clone())
                        .unwrap_or_else(|| "job failed".to_string()),
                };
            }
            _ => {}
        }
    }

    if status.active.unwrap_or(0) > 0 {
        JobStatus::Running {
            started_at: status.start_time.as_ref().map(|t| t.0),
        }
    } else {
        JobStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(status: serde_json::Value) -> Job {
        serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "hostit-static-abc" },
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(job_status(&job(json!({}))), JobStatus::Pending);

        assert!(matches!(
            job_status(&job(json!({ "active": 1, "startTime": "2026-01-01T00:00:00Z" }))),
            JobStatus::Running { started_at: Some(_) }
        ));

        assert!(matches!(
            job_status(&job(json!({
                "conditions": [{ "type": "Complete", "status": "True" }],
                "completionTime": "2026-01-01T00:05:00Z"
            }))),
            JobStatus::Succeeded { finished_at: Some(_) }
        ));

        assert_eq!(
            job_status(&job(json!({
                "conditions": [{
                    "type": "Failed",
                    "status": "True",
                    "reason": "BackoffLimitExceeded",
                    "message": "Job has reached the specified backoff limit"
                }]
            }))),
            JobStatus::Failed {
                message: "Job has reached the specified backoff limit".to_string()
            }
        );
    }

    #[test]
    fn test_false_conditions_are_ignored() {
        let status = job_status(&job(json!({
            "active": 1,
            "conditions": [{ "type": "Failed", "status": "False" }]
        })));
        assert!(matches!(status, JobStatus::Running { .. }));
    }

    #[test]
    fn test_handles() {
        let handle = handle_for("builds", "hostit-static-abc");
        assert_eq!(handle.execution, "hostit-static-abc");
        assert_eq!(
            parse_operation(&handle.operation).unwrap(),
            ("builds", "hostit-static-abc")
        );
        assert!(parse_operation("no-slash").is_err());
    }

    #[test]
    fn test_job_names_are_unique_dns_labels() {
        let id = ResourceId::new_unguessable();
        let a = job_name("static", &id);
        let b = job_name("static", &id);
        assert_ne!(a, b);
        assert!(a.len() <= 63);
        assert!(a.starts_with(&format!("hostit-static-{}", id.short(12))));
    }
}
