//! Build strategy trait and job types.
//!
//! Builds run out of process on an external job service. Each build variant
//! is a `BuildStrategy`; the pipeline picks one per site and never branches
//! on the variant itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::site::{BuildVariant, EnvVar};
use crate::{ResourceId, Result};

/// Everything a strategy needs to submit one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub deployment_id: ResourceId,
    pub site_id: ResourceId,
    /// Repository URL to clone.
    pub clone_url: String,
    /// Commit to check out; `None` builds the branch head.
    pub commit_sha: Option<String>,
    pub branch: Option<String>,
    /// Frozen environment of the deployment.
    pub env: Vec<EnvVar>,
    /// Where the job reports progress.
    pub callback_url: String,
    /// Key the static output is published under.
    pub artifact_key: String,
}

/// Handle to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Job-service identifier of the execution.
    pub execution: String,
    /// Job-service identifier used to query progress.
    pub operation: String,
}

/// Status of a job as reported by the job service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job is waiting to start.
    Pending,
    /// Job is currently running.
    Running { started_at: Option<DateTime<Utc>> },
    /// Job completed successfully.
    Succeeded { finished_at: Option<DateTime<Utc>> },
    /// Job failed.
    Failed { message: String },
    /// Job was cancelled by the job service.
    Cancelled { message: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled { .. }
        )
    }
}

/// One way of building a site.
#[async_trait]
pub trait BuildStrategy: Send + Sync {
    /// Which variant this strategy builds.
    fn variant(&self) -> BuildVariant;

    /// Submit a build job. Not idempotent: every call submits a new job.
    async fn dispatch(&self, request: &BuildRequest) -> Result<JobHandle>;

    /// Current status of a submitted job.
    async fn check_status(&self, handle: &JobHandle) -> Result<JobStatus>;

    /// Build output collected so far.
    async fn fetch_logs(&self, handle: &JobHandle) -> Result<String>;
}
