//! Subdomain binding repository.
//!
//! Subdomains are unique across all sites; the table's unique constraint is
//! the final arbiter when two sites race for the same name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostit_core::ResourceId;
use hostit_core::site::SubdomainBinding;
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[async_trait]
pub trait SubdomainRepo: Send + Sync {
    /// Bind a subdomain to a site. Fails with `Duplicate` if it is taken.
    async fn create(&self, site_id: ResourceId, subdomain: &str) -> DbResult<SubdomainBinding>;
    async fn exists(&self, subdomain: &str) -> DbResult<bool>;
    async fn list_by_site(&self, site_id: ResourceId) -> DbResult<Vec<SubdomainBinding>>;
    async fn list_active_by_site(&self, site_id: ResourceId) -> DbResult<Vec<SubdomainBinding>>;
    /// Remove a site's binding and return it.
    async fn delete(&self, site_id: ResourceId, subdomain: &str) -> DbResult<SubdomainBinding>;
}

#[derive(sqlx::FromRow)]
struct SubdomainRow {
    id: uuid::Uuid,
    site_id: uuid::Uuid,
    subdomain: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<SubdomainRow> for SubdomainBinding {
    fn from(row: SubdomainRow) -> Self {
        SubdomainBinding {
            id: row.id.into(),
            site_id: row.site_id.into(),
            subdomain: row.subdomain,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL implementation of SubdomainRepo.
pub struct PgSubdomainRepo {
    pool: PgPool,
}

impl PgSubdomainRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubdomainRepo for PgSubdomainRepo {
    async fn create(&self, site_id: ResourceId, subdomain: &str) -> DbResult<SubdomainBinding> {
        let row = sqlx::query_as::<_, SubdomainRow>(
            r#"
            INSERT INTO subdomains (id, site_id, subdomain, is_active, created_at)
            VALUES ($1, $2, $3, TRUE, NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(site_id.as_uuid())
        .bind(subdomain)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::on_unique(e, format!("subdomain {}", subdomain)))?;
        Ok(row.into())
    }

    async fn exists(&self, subdomain: &str) -> DbResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM subdomains WHERE subdomain = $1)")
                .bind(subdomain)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list_by_site(&self, site_id: ResourceId) -> DbResult<Vec<SubdomainBinding>> {
        let rows = sqlx::query_as::<_, SubdomainRow>(
            "SELECT * FROM subdomains WHERE site_id = $1 ORDER BY created_at",
        )
        .bind(site_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active_by_site(&self, site_id: ResourceId) -> DbResult<Vec<SubdomainBinding>> {
        let rows = sqlx::query_as::<_, SubdomainRow>(
            "SELECT * FROM subdomains WHERE site_id = $1 AND is_active ORDER BY created_at",
        )
        .bind(site_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete(&self, site_id: ResourceId, subdomain: &str) -> DbResult<SubdomainBinding> {
        sqlx::query_as::<_, SubdomainRow>(
            "DELETE FROM subdomains WHERE site_id = $1 AND subdomain = $2 RETURNING *",
        )
        .bind(site_id.as_uuid())
        .bind(subdomain)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into)
        .ok_or_else(|| DbError::NotFound(format!("subdomain {}", subdomain)))
    }
}
