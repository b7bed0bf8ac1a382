//! Error types for hostit.

use thiserror::Error;

use crate::deployment::DeploymentStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("job service error: {0}")]
    JobService(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("routing table error: {0}")]
    Routing(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
