//! Site repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostit_core::ResourceId;
use hostit_core::site::{EnvVar, NewSite, Site};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::{DbError, DbResult};

#[async_trait]
pub trait SiteRepo: Send + Sync {
    async fn create(&self, site: &NewSite) -> DbResult<Site>;
    async fn get(&self, id: ResourceId) -> DbResult<Site>;
    async fn list_by_owner(&self, owner_id: &str) -> DbResult<Vec<Site>>;
    /// Sites connected to a repository full name such as `octo/app`.
    async fn list_by_repository(&self, repository: &str) -> DbResult<Vec<Site>>;
    async fn update_env_vars(&self, id: ResourceId, env_vars: &[EnvVar]) -> DbResult<Site>;
    async fn set_active_deployment(&self, id: ResourceId, deployment_id: ResourceId)
    -> DbResult<()>;
    async fn set_live_backend(&self, id: ResourceId, backend_id: &str) -> DbResult<()>;
}

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: uuid::Uuid,
    owner_id: String,
    name: String,
    repository: String,
    clone_url: String,
    variant: String,
    env_vars: Json<Vec<EnvVar>>,
    active_deployment_id: Option<uuid::Uuid>,
    live_backend: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SiteRow> for Site {
    type Error = DbError;

    fn try_from(row: SiteRow) -> DbResult<Self> {
        let variant = row
            .variant
            .parse()
            .map_err(|e: String| DbError::Corrupt(format!("site {}: {}", row.id, e)))?;
        Ok(Site {
            id: row.id.into(),
            owner_id: row.owner_id,
            name: row.name,
            repository: row.repository,
            clone_url: row.clone_url,
            variant,
            env_vars: row.env_vars.0,
            active_deployment_id: row.active_deployment_id.map(ResourceId::from),
            live_backend: row.live_backend,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL implementation of SiteRepo.
pub struct PgSiteRepo {
    pool: PgPool,
}

impl PgSiteRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteRepo for PgSiteRepo {
    async fn create(&self, site: &NewSite) -> DbResult<Site> {
        let row = sqlx::query_as::<_, SiteRow>(
            r#"
            INSERT INTO sites (id, owner_id, name, repository, clone_url, variant, env_vars,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&site.owner_id)
        .bind(&site.name)
        .bind(&site.repository)
        .bind(&site.clone_url)
        .bind(site.variant.as_str())
        .bind(Json(&site.env_vars))
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get(&self, id: ResourceId) -> DbResult<Site> {
        sqlx::query_as::<_, SiteRow>("SELECT * FROM sites WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("site {}", id)))?
            .try_into()
    }

    async fn list_by_owner(&self, owner_id: &str) -> DbResult<Vec<Site>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT * FROM sites WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Site::try_from).collect()
    }

    async fn list_by_repository(&self, repository: &str) -> DbResult<Vec<Site>> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT * FROM sites WHERE repository = $1 ORDER BY created_at",
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Site::try_from).collect()
    }

    async fn update_env_vars(&self, id: ResourceId, env_vars: &[EnvVar]) -> DbResult<Site> {
        sqlx::query_as::<_, SiteRow>(
            r#"
            UPDATE sites SET env_vars = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(Json(env_vars))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("site {}", id)))?
        .try_into()
    }

    async fn set_active_deployment(
        &self,
        id: ResourceId,
        deployment_id: ResourceId,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sites SET active_deployment_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(deployment_id.as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("site {}", id)));
        }
        Ok(())
    }

    async fn set_live_backend(&self, id: ResourceId, backend_id: &str) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE sites SET live_backend = $2, updated_at = NOW() WHERE id = $1")
                .bind(id.as_uuid())
                .bind(backend_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("site {}", id)));
        }
        Ok(())
    }
}
