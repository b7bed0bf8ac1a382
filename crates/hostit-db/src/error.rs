//! Database error types.

use hostit_core::deployment::DeploymentStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Map a unique-constraint violation to `Duplicate`, passing other
    /// errors through.
    pub(crate) fn on_unique(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Duplicate(what.into())
            }
            _ => DbError::Database(err),
        }
    }
}

impl From<DbError> for hostit_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => hostit_core::Error::NotFound(what),
            DbError::Duplicate(what) => hostit_core::Error::Conflict(what),
            DbError::InvalidTransition { from, to } => {
                hostit_core::Error::InvalidTransition { from, to }
            }
            other => hostit_core::Error::Storage(other.to_string()),
        }
    }
}
