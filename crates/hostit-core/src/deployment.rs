//! Deployment records and their lifecycle.
//!
//! A deployment moves `QUEUED → BUILDING → SUCCEEDED | FAILED`. The only
//! shortcut is `QUEUED → FAILED` for a deployment whose build was never
//! dispatched. No deployment ever leaves a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::JobHandle;
use crate::site::EnvVar;
use crate::{Error, ResourceId, Result};

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Succeeded,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "QUEUED",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Succeeded => "SUCCEEDED",
            DeploymentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Succeeded | DeploymentStatus::Failed)
    }

    /// Whether `self → next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Queued, Building) | (Queued, Failed) | (Building, Succeeded) | (Building, Failed)
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(DeploymentStatus::Queued),
            "BUILDING" => Ok(DeploymentStatus::Building),
            "SUCCEEDED" => Ok(DeploymentStatus::Succeeded),
            "FAILED" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Unknown deployment status: {}", s)),
        }
    }
}

/// Validate a single lifecycle step.
pub fn transition(from: DeploymentStatus, to: DeploymentStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

/// One build attempt for a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: ResourceId,
    pub site_id: ResourceId,
    pub status: DeploymentStatus,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    /// Environment snapshot taken when the deployment was created.
    pub env_vars: Vec<EnvVar>,
    pub execution_handle: Option<String>,
    pub operation_handle: Option<String>,
    /// Set once a dispatch attempt has claimed this deployment.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub build_logs: Option<String>,
    /// Raw diagnostic captured on failure.
    pub error: Option<String>,
    /// Live backend endpoint (server variant only).
    pub backend_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Handle of the submitted build job, if dispatch completed.
    pub fn job_handle(&self) -> Option<JobHandle> {
        match (&self.execution_handle, &self.operation_handle) {
            (Some(execution), Some(operation)) => Some(JobHandle {
                execution: execution.clone(),
                operation: operation.clone(),
            }),
            _ => None,
        }
    }

    /// Key the static artifact is published under: the commit hash when
    /// known, otherwise the deployment id.
    pub fn artifact_key(&self) -> String {
        self.commit_hash
            .clone()
            .unwrap_or_else(|| self.id.short(32))
    }
}

/// Fields needed to insert a deployment. Always inserted as `QUEUED`.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub site_id: ResourceId,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    pub env_vars: Vec<EnvVar>,
}
