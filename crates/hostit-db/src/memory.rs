//! In-memory store for testing.
//!
//! Implements every repository trait with the same compare-and-set and
//! uniqueness semantics as the PostgreSQL implementations. Data is lost when
//! the process exits.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use hostit_core::ResourceId;
use hostit_core::deployment::{Deployment, DeploymentStatus, NewDeployment};
use hostit_core::executor::JobHandle;
use hostit_core::site::{EnvVar, NewSite, Site, SubdomainBinding};

use crate::repo::deployment::check_step;
use crate::{DbError, DbResult, DeploymentRepo, SiteRepo, SubdomainRepo};

#[derive(Debug, Default)]
pub struct MemoryStore {
    sites: RwLock<HashMap<ResourceId, Site>>,
    // Insertion order doubles as creation order.
    deployments: RwLock<Vec<Deployment>>,
    subdomains: RwLock<Vec<SubdomainBinding>>,
}

fn poisoned<T>(_: T) -> DbError {
    DbError::Internal("lock poisoned".to_string())
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift a deployment's creation time into the past.
    pub fn backdate_deployment(&self, id: ResourceId, age: chrono::Duration) -> DbResult<()> {
        self.update_deployment(id, |d| d.created_at = Utc::now() - age)
    }

    fn update_deployment<F>(&self, id: ResourceId, f: F) -> DbResult<()>
    where
        F: FnOnce(&mut Deployment),
    {
        let mut deployments = self.deployments.write().map_err(poisoned)?;
        let deployment = deployments
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?;
        f(deployment);
        Ok(())
    }

    fn update_site<F>(&self, id: ResourceId, f: F) -> DbResult<Site>
    where
        F: FnOnce(&mut Site),
    {
        let mut sites = self.sites.write().map_err(poisoned)?;
        let site = sites
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("site {}", id)))?;
        f(site);
        site.updated_at = Utc::now();
        Ok(site.clone())
    }
}

#[async_trait]
impl SiteRepo for MemoryStore {
    async fn create(&self, site: &NewSite) -> DbResult<Site> {
        let now = Utc::now();
        let site = Site {
            id: ResourceId::new(),
            owner_id: site.owner_id.clone(),
            name: site.name.clone(),
            repository: site.repository.clone(),
            clone_url: site.clone_url.clone(),
            variant: site.variant,
            env_vars: site.env_vars.clone(),
            active_deployment_id: None,
            live_backend: None,
            created_at: now,
            updated_at: now,
        };
        self.sites
            .write()
            .map_err(poisoned)?
            .insert(site.id, site.clone());
        Ok(site)
    }

    async fn get(&self, id: ResourceId) -> DbResult<Site> {
        self.sites
            .read()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("site {}", id)))
    }

    async fn list_by_owner(&self, owner_id: &str) -> DbResult<Vec<Site>> {
        let sites = self.sites.read().map_err(poisoned)?;
        let mut results: Vec<Site> = sites
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    async fn list_by_repository(&self, repository: &str) -> DbResult<Vec<Site>> {
        let sites = self.sites.read().map_err(poisoned)?;
        let mut results: Vec<Site> = sites
            .values()
            .filter(|s| s.repository == repository)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    async fn update_env_vars(&self, id: ResourceId, env_vars: &[EnvVar]) -> DbResult<Site> {
        self.update_site(id, |site| site.env_vars = env_vars.to_vec())
    }

    async fn set_active_deployment(
        &self,
        id: ResourceId,
        deployment_id: ResourceId,
    ) -> DbResult<()> {
        self.update_site(id, |site| site.active_deployment_id = Some(deployment_id))
            .map(|_| ())
    }

    async fn set_live_backend(&self, id: ResourceId, backend_id: &str) -> DbResult<()> {
        self.update_site(id, |site| site.live_backend = Some(backend_id.to_string()))
            .map(|_| ())
    }
}

#[async_trait]
impl DeploymentRepo for MemoryStore {
    async fn create(&self, deployment: &NewDeployment) -> DbResult<Deployment> {
        let deployment = Deployment {
            id: ResourceId::new_unguessable(),
            site_id: deployment.site_id,
            status: DeploymentStatus::Queued,
            branch: deployment.branch.clone(),
            commit_hash: deployment.commit_hash.clone(),
            commit_message: deployment.commit_message.clone(),
            env_vars: deployment.env_vars.clone(),
            execution_handle: None,
            operation_handle: None,
            dispatched_at: None,
            build_logs: None,
            error: None,
            backend_url: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.deployments
            .write()
            .map_err(poisoned)?
            .push(deployment.clone());
        Ok(deployment)
    }

    async fn get(&self, id: ResourceId) -> DbResult<Deployment> {
        self.deployments
            .read()
            .map_err(poisoned)?
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))
    }

    async fn list_by_site(&self, site_id: ResourceId) -> DbResult<Vec<Deployment>> {
        let deployments = self.deployments.read().map_err(poisoned)?;
        Ok(deployments
            .iter()
            .rev()
            .filter(|d| d.site_id == site_id)
            .cloned()
            .collect())
    }

    async fn list_in_flight(&self) -> DbResult<Vec<Deployment>> {
        let deployments = self.deployments.read().map_err(poisoned)?;
        Ok(deployments
            .iter()
            .filter(|d| !d.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn claim_dispatch(&self, id: ResourceId) -> DbResult<bool> {
        let mut claimed = false;
        self.update_deployment(id, |d| {
            if d.status == DeploymentStatus::Queued && d.dispatched_at.is_none() {
                d.dispatched_at = Some(Utc::now());
                claimed = true;
            }
        })?;
        Ok(claimed)
    }

    async fn record_job_handle(&self, id: ResourceId, handle: &JobHandle) -> DbResult<()> {
        self.update_deployment(id, |d| {
            d.execution_handle = Some(handle.execution.clone());
            d.operation_handle = Some(handle.operation.clone());
        })
    }

    async fn record_error(&self, id: ResourceId, error: &str) -> DbResult<()> {
        self.update_deployment(id, |d| d.error = Some(error.to_string()))
    }

    async fn transition(
        &self,
        id: ResourceId,
        from: DeploymentStatus,
        to: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<bool> {
        check_step(from, to)?;
        let mut applied = false;
        self.update_deployment(id, |d| {
            if d.status != from {
                return;
            }
            d.status = to;
            if let Some(error) = error {
                d.error = Some(error.to_string());
            }
            if to == DeploymentStatus::Building {
                d.started_at = Some(Utc::now());
            }
            if to.is_terminal() {
                d.completed_at = Some(Utc::now());
            }
            applied = true;
        })?;
        Ok(applied)
    }

    async fn set_backend_url(&self, id: ResourceId, url: &str) -> DbResult<()> {
        self.update_deployment(id, |d| d.backend_url = Some(url.to_string()))
    }

    async fn set_build_logs(&self, id: ResourceId, logs: &str) -> DbResult<()> {
        self.update_deployment(id, |d| d.build_logs = Some(logs.to_string()))
    }
}

#[async_trait]
impl SubdomainRepo for MemoryStore {
    async fn create(&self, site_id: ResourceId, subdomain: &str) -> DbResult<SubdomainBinding> {
        let mut subdomains = self.subdomains.write().map_err(poisoned)?;
        if subdomains.iter().any(|b| b.subdomain == subdomain) {
            return Err(DbError::Duplicate(format!("subdomain {}", subdomain)));
        }
        let binding = SubdomainBinding {
            id: ResourceId::new(),
            site_id,
            subdomain: subdomain.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        subdomains.push(binding.clone());
        Ok(binding)
    }

    async fn exists(&self, subdomain: &str) -> DbResult<bool> {
        let subdomains = self.subdomains.read().map_err(poisoned)?;
        Ok(subdomains.iter().any(|b| b.subdomain == subdomain))
    }

    async fn list_by_site(&self, site_id: ResourceId) -> DbResult<Vec<SubdomainBinding>> {
        let subdomains = self.subdomains.read().map_err(poisoned)?;
        Ok(subdomains
            .iter()
            .filter(|b| b.site_id == site_id)
            .cloned()
            .collect())
    }

    async fn list_active_by_site(&self, site_id: ResourceId) -> DbResult<Vec<SubdomainBinding>> {
        let subdomains = self.subdomains.read().map_err(poisoned)?;
        Ok(subdomains
            .iter()
            .filter(|b| b.site_id == site_id && b.is_active)
            .cloned()
            .collect())
    }

    async fn delete(&self, site_id: ResourceId, subdomain: &str) -> DbResult<SubdomainBinding> {
        let mut subdomains = self.subdomains.write().map_err(poisoned)?;
        let index = subdomains
            .iter()
            .position(|b| b.site_id == site_id && b.subdomain == subdomain)
            .ok_or_else(|| DbError::NotFound(format!("subdomain {}", subdomain)))?;
        Ok(subdomains.remove(index))
    }
}
