//! Deployment repository.
//!
//! Status changes are compare-and-set: an update only applies when the row
//! is still in the status the caller observed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostit_core::ResourceId;
use hostit_core::deployment::{Deployment, DeploymentStatus, NewDeployment};
use hostit_core::executor::JobHandle;
use hostit_core::site::EnvVar;
use sqlx::PgPool;
use sqlx::types::Json;

use crate::{DbError, DbResult};

#[async_trait]
pub trait DeploymentRepo: Send + Sync {
    /// Insert a new `QUEUED` deployment.
    async fn create(&self, deployment: &NewDeployment) -> DbResult<Deployment>;

    async fn get(&self, id: ResourceId) -> DbResult<Deployment>;

    /// Deployments of a site, newest first.
    async fn list_by_site(&self, site_id: ResourceId) -> DbResult<Vec<Deployment>>;

    /// Deployments that are `QUEUED` or `BUILDING`, oldest first.
    async fn list_in_flight(&self) -> DbResult<Vec<Deployment>>;

    /// Claim the right to dispatch a `QUEUED` deployment. Exactly one caller
    /// ever receives `true` for a given deployment.
    async fn claim_dispatch(&self, id: ResourceId) -> DbResult<bool>;

    async fn record_job_handle(&self, id: ResourceId, handle: &JobHandle) -> DbResult<()>;

    async fn record_error(&self, id: ResourceId, error: &str) -> DbResult<()>;

    /// Move `from → to` if the deployment is still in `from`. Returns whether
    /// the update applied. Entering `BUILDING` stamps `started_at`; entering a
    /// terminal status stamps `completed_at`.
    async fn transition(
        &self,
        id: ResourceId,
        from: DeploymentStatus,
        to: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<bool>;

    async fn set_backend_url(&self, id: ResourceId, url: &str) -> DbResult<()>;

    async fn set_build_logs(&self, id: ResourceId, logs: &str) -> DbResult<()>;
}

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: uuid::Uuid,
    site_id: uuid::Uuid,
    status: String,
    branch: Option<String>,
    commit_hash: Option<String>,
    commit_message: Option<String>,
    env_vars: Json<Vec<EnvVar>>,
    execution_handle: Option<String>,
    operation_handle: Option<String>,
    dispatched_at: Option<DateTime<Utc>>,
    build_logs: Option<String>,
    error: Option<String>,
    backend_url: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = DbError;

    fn try_from(row: DeploymentRow) -> DbResult<Self> {
        let status = row
            .status
            .parse()
            .map_err(|e: String| DbError::Corrupt(format!("deployment {}: {}", row.id, e)))?;
        Ok(Deployment {
            id: row.id.into(),
            site_id: row.site_id.into(),
            status,
            branch: row.branch,
            commit_hash: row.commit_hash,
            commit_message: row.commit_message,
            env_vars: row.env_vars.0,
            execution_handle: row.execution_handle,
            operation_handle: row.operation_handle,
            dispatched_at: row.dispatched_at,
            build_logs: row.build_logs,
            error: row.error,
            backend_url: row.backend_url,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Reject steps the lifecycle never allows before touching storage.
pub(crate) fn check_step(from: DeploymentStatus, to: DeploymentStatus) -> DbResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(DbError::InvalidTransition { from, to })
    }
}

/// PostgreSQL implementation of DeploymentRepo.
pub struct PgDeploymentRepo {
    pool: PgPool,
}

impl PgDeploymentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn expect_updated(id: ResourceId, rows: u64) -> DbResult<()> {
    if rows == 0 {
        return Err(DbError::NotFound(format!("deployment {}", id)));
    }
    Ok(())
}

#[async_trait]
impl DeploymentRepo for PgDeploymentRepo {
    async fn create(&self, deployment: &NewDeployment) -> DbResult<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            INSERT INTO deployments (id, site_id, status, branch, commit_hash, commit_message,
                                     env_vars, created_at)
            VALUES ($1, $2, 'QUEUED', $3, $4, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(ResourceId::new_unguessable().as_uuid())
        .bind(deployment.site_id.as_uuid())
        .bind(&deployment.branch)
        .bind(&deployment.commit_hash)
        .bind(&deployment.commit_message)
        .bind(Json(&deployment.env_vars))
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get(&self, id: ResourceId) -> DbResult<Deployment> {
        sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?
            .try_into()
    }

    async fn list_by_site(&self, site_id: ResourceId) -> DbResult<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE site_id = $1 ORDER BY created_at DESC",
        )
        .bind(site_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Deployment::try_from).collect()
    }

    async fn list_in_flight(&self) -> DbResult<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT * FROM deployments
            WHERE status IN ('QUEUED', 'BUILDING')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Deployment::try_from).collect()
    }

    async fn claim_dispatch(&self, id: ResourceId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE deployments SET dispatched_at = NOW()
            WHERE id = $1 AND status = 'QUEUED' AND dispatched_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_job_handle(&self, id: ResourceId, handle: &JobHandle) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE deployments SET execution_handle = $2, operation_handle = $3 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(&handle.execution)
        .bind(&handle.operation)
        .execute(&self.pool)
        .await?;
        expect_updated(id, result.rows_affected())
    }

    async fn record_error(&self, id: ResourceId, error: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE deployments SET error = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(error)
            .execute(&self.pool)
            .await?;
        expect_updated(id, result.rows_affected())
    }

    async fn transition(
        &self,
        id: ResourceId,
        from: DeploymentStatus,
        to: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<bool> {
        check_step(from, to)?;
        let result = sqlx::query(
            r#"
            UPDATE deployments SET
                status = $3,
                error = COALESCE($4, error),
                started_at = CASE WHEN $3 = 'BUILDING' THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('SUCCEEDED', 'FAILED') THEN NOW()
                                    ELSE completed_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_backend_url(&self, id: ResourceId, url: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE deployments SET backend_url = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(url)
            .execute(&self.pool)
            .await?;
        expect_updated(id, result.rows_affected())
    }

    async fn set_build_logs(&self, id: ResourceId, logs: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE deployments SET build_logs = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(logs)
            .execute(&self.pool)
            .await?;
        expect_updated(id, result.rows_affected())
    }
}
