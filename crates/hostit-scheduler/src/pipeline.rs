//! The build-and-publish pipeline.
//!
//! Every entry point (push webhook, build callback, reconciler, site
//! management) goes through this type, which owns the deployment lifecycle:
//! dispatch gating, finalization, live-backend provisioning and publishing
//! routing entries. All collaborators are injected.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use hostit_core::deployer::{ImageRef, ImageRegistry, LiveBackendProvisioner, LiveBackendSpec};
use hostit_core::deployment::{Deployment, DeploymentStatus, NewDeployment};
use hostit_core::executor::{BuildRequest, BuildStrategy, JobHandle, JobStatus};
use hostit_core::repository::PushEvent;
use hostit_core::routing::{RouteTarget, RoutingTable};
use hostit_core::site::{
    BuildVariant, EnvVar, NewSite, Site, SubdomainBinding, derive_subdomain, normalize_env,
    validate_subdomain,
};
use hostit_core::{Error, ResourceId, Result};
use hostit_db::{DbError, DeploymentRepo, SiteRepo, SubdomainRepo};
use hostit_executor::{JobDispatcher, wait_for_completion};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Attempts at finding a free default subdomain for a new site.
const SUBDOMAIN_ATTEMPTS: usize = 10;

/// Callback status a build job reports when it begins.
const STARTED: &str = "started";

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Build callback endpoint; `deployment_id` is appended as a query
    /// parameter.
    pub callback_base_url: String,
    /// Upper bound on the completion wait inside a callback.
    pub completion_wait: Duration,
    pub poll_interval: Duration,
    /// Registry host and repository prefix server images are pushed to.
    pub image_registry: String,
    pub image_prefix: String,
    /// Undispatched `QUEUED` deployments older than this are failed.
    pub queued_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            callback_base_url: "http://localhost:3000/callback".to_string(),
            completion_wait: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            image_registry: "127.0.0.1:5000".to_string(),
            image_prefix: "server-builds".to_string(),
            queued_timeout: Duration::from_secs(900),
        }
    }
}

/// Collaborators the pipeline is built from.
pub struct PipelineDeps {
    pub sites: Arc<dyn SiteRepo>,
    pub deployments: Arc<dyn DeploymentRepo>,
    pub subdomains: Arc<dyn SubdomainRepo>,
    pub routing: Arc<dyn RoutingTable>,
    pub dispatcher: JobDispatcher,
    pub registry: Arc<dyn ImageRegistry>,
    pub provisioner: Arc<dyn LiveBackendProvisioner>,
}

/// Result of creating a site.
#[derive(Debug, Clone)]
pub struct CreatedSite {
    pub site: Site,
    pub subdomain: SubdomainBinding,
    pub deployment: Deployment,
    /// Set when the first build could not be submitted.
    pub dispatch_error: Option<String>,
}

/// A deployment created from a push.
#[derive(Debug, Clone)]
pub struct PushedDeployment {
    pub deployment: Deployment,
    /// Set when the build could not be submitted.
    pub dispatch_error: Option<String>,
}

/// What a publish wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub target: Option<RouteTarget>,
    pub written: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// What one reconciler pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub finalized: usize,
    pub expired: usize,
}

pub struct Pipeline {
    sites: Arc<dyn SiteRepo>,
    deployments: Arc<dyn DeploymentRepo>,
    subdomains: Arc<dyn SubdomainRepo>,
    routing: Arc<dyn RoutingTable>,
    dispatcher: JobDispatcher,
    registry: Arc<dyn ImageRegistry>,
    provisioner: Arc<dyn LiveBackendProvisioner>,
    settings: PipelineSettings,
    // Serializes finalization of a single deployment within this process.
    finalizing: DashMap<ResourceId, Arc<Mutex<()>>>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            sites: deps.sites,
            deployments: deps.deployments,
            subdomains: deps.subdomains,
            routing: deps.routing,
            dispatcher: deps.dispatcher,
            registry: deps.registry,
            provisioner: deps.provisioner,
            settings,
            finalizing: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    // --- Sites -----------------------------------------------------------

    /// Create a site with a derived default subdomain and start its first
    /// build.
    pub async fn create_site(&self, new_site: NewSite) -> Result<CreatedSite> {
        let name = new_site.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("site name is required".to_string()));
        }
        if !is_repository_name(&new_site.repository) {
            return Err(Error::InvalidInput(format!(
                "repository must look like owner/name, got '{}'",
                new_site.repository
            )));
        }
        if new_site.clone_url.trim().is_empty() {
            return Err(Error::InvalidInput("clone url is required".to_string()));
        }

        let new_site = NewSite {
            name: name.to_string(),
            env_vars: normalize_env(new_site.env_vars),
            ..new_site
        };
        let site = self.sites.create(&new_site).await?;
        info!(site_id = %site.id, name = %site.name, variant = %site.variant, "Created site");

        let subdomain = self.bind_default_subdomain(&site).await?;

        let deployment = self
            .deployments
            .create(&NewDeployment {
                site_id: site.id,
                branch: None,
                commit_hash: None,
                commit_message: Some("Initial deployment".to_string()),
                env_vars: site.env_vars.clone(),
            })
            .await?;

        let dispatch_error = match self.dispatch(deployment.id).await {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
        let deployment = self.deployments.get(deployment.id).await?;

        Ok(CreatedSite {
            site,
            subdomain,
            deployment,
            dispatch_error,
        })
    }

    async fn bind_default_subdomain(&self, site: &Site) -> Result<SubdomainBinding> {
        for _ in 0..SUBDOMAIN_ATTEMPTS {
            let suffix = (ResourceId::new_unguessable().as_uuid().as_u128() % 10_000) as u16;
            let candidate = derive_subdomain(&site.name, suffix);
            if self.subdomains.exists(&candidate).await? {
                continue;
            }
            match self.subdomains.create(site.id, &candidate).await {
                Ok(binding) => {
                    info!(site_id = %site.id, subdomain = %candidate, "Bound default subdomain");
                    return Ok(binding);
                }
                Err(DbError::Duplicate(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Conflict(format!(
            "no free subdomain for '{}' after {} attempts",
            site.name, SUBDOMAIN_ATTEMPTS
        )))
    }

    pub async fn get_site(&self, site_id: ResourceId) -> Result<Site> {
        Ok(self.sites.get(site_id).await?)
    }

    pub async fn list_sites(&self, owner_id: &str) -> Result<Vec<Site>> {
        Ok(self.sites.list_by_owner(owner_id).await?)
    }

    /// Replace a site's live variables. Existing deployments keep their
    /// snapshots.
    pub async fn update_env_vars(&self, site_id: ResourceId, vars: Vec<EnvVar>) -> Result<Site> {
        let vars = normalize_env(vars);
        let site = self.sites.update_env_vars(site_id, &vars).await?;
        info!(site_id = %site_id, count = vars.len(), "Updated environment variables");
        Ok(site)
    }

    // --- Subdomains ------------------------------------------------------

    pub async fn list_subdomains(&self, site_id: ResourceId) -> Result<Vec<SubdomainBinding>> {
        self.sites.get(site_id).await?;
        Ok(self.subdomains.list_by_site(site_id).await?)
    }

    /// Bind a subdomain and publish the site's active pointer to it.
    pub async fn add_subdomain(
        &self,
        site_id: ResourceId,
        subdomain: &str,
    ) -> Result<SubdomainBinding> {
        let subdomain = subdomain.trim().to_ascii_lowercase();
        validate_subdomain(&subdomain)?;
        self.sites.get(site_id).await?;

        if self.subdomains.exists(&subdomain).await? {
            return Err(Error::Conflict(format!(
                "subdomain '{}' is already taken",
                subdomain
            )));
        }
        let binding = self.subdomains.create(site_id, &subdomain).await?;
        info!(site_id = %site_id, subdomain = %subdomain, "Added subdomain");

        if let Err(e) = self.publish(site_id).await {
            warn!(site_id = %site_id, error = %e, "Publish after adding subdomain failed");
        }
        Ok(binding)
    }

    /// Unbind a subdomain and drop its routing entry.
    pub async fn remove_subdomain(
        &self,
        site_id: ResourceId,
        subdomain: &str,
    ) -> Result<SubdomainBinding> {
        let subdomain = subdomain.trim().to_ascii_lowercase();
        let owned = self
            .subdomains
            .list_by_site(site_id)
            .await?
            .into_iter()
            .any(|b| b.subdomain == subdomain);
        if !owned {
            return Err(Error::NotFound(format!("subdomain {}", subdomain)));
        }

        self.routing.remove(&subdomain).await?;
        let binding = self.subdomains.delete(site_id, &subdomain).await?;
        info!(site_id = %site_id, subdomain = %subdomain, "Removed subdomain");
        Ok(binding)
    }

    // --- Deployments -----------------------------------------------------

    pub async fn get_deployment(&self, id: ResourceId) -> Result<Deployment> {
        Ok(self.deployments.get(id).await?)
    }

    pub async fn list_deployments(&self, site_id: ResourceId) -> Result<Vec<Deployment>> {
        self.sites.get(site_id).await?;
        Ok(self.deployments.list_by_site(site_id).await?)
    }

    /// Manually start a new deployment of a site.
    pub async fn trigger_deploy(
        &self,
        site_id: ResourceId,
        branch: Option<String>,
    ) -> Result<Deployment> {
        let site = self.sites.get(site_id).await?;
        let deployment = self
            .deployments
            .create(&NewDeployment {
                site_id,
                branch,
                commit_hash: None,
                commit_message: Some("Manual deployment".to_string()),
                env_vars: site.env_vars.clone(),
            })
            .await?;
        info!(site_id = %site_id, deployment_id = %deployment.id, "Triggered deployment");

        self.dispatch(deployment.id).await?;
        Ok(self.deployments.get(deployment.id).await?)
    }

    /// Create and dispatch a deployment for every site bound to the pushed
    /// repository. Pushes to other branches create nothing.
    ///
    /// A failed submission does not stop the remaining sites; it is reported
    /// on the affected entry.
    pub async fn handle_push(&self, event: &PushEvent) -> Result<Vec<PushedDeployment>> {
        if !event.targets_default_branch() {
            info!(
                repository = %event.repository_full_name,
                r#ref = %event.r#ref,
                "Ignoring push to non-default branch"
            );
            return Ok(Vec::new());
        }

        let sites = self
            .sites
            .list_by_repository(&event.repository_full_name)
            .await?;
        if sites.is_empty() {
            debug!(repository = %event.repository_full_name, "No sites for repository");
        }

        let mut created = Vec::with_capacity(sites.len());
        for site in sites {
            let deployment = self
                .deployments
                .create(&NewDeployment {
                    site_id: site.id,
                    branch: event.branch.clone(),
                    commit_hash: Some(event.after.clone()),
                    commit_message: Some(event.latest_commit_message()),
                    env_vars: site.env_vars.clone(),
                })
                .await?;
            info!(
                site_id = %site.id,
                deployment_id = %deployment.id,
                sha = %event.after,
                "Created deployment from push"
            );

            let dispatch_error = match self.dispatch(deployment.id).await {
                Ok(_) => None,
                Err(e) => Some(e.to_string()),
            };
            created.push(PushedDeployment {
                deployment: self.deployments.get(deployment.id).await?,
                dispatch_error,
            });
        }
        Ok(created)
    }

    /// Submit a `QUEUED` deployment's build job.
    ///
    /// Only the caller that wins the dispatch claim submits; everyone else
    /// gets `Ok(None)`. A failed submission leaves the deployment `QUEUED`
    /// without a handle and is not retried.
    pub async fn dispatch(&self, deployment_id: ResourceId) -> Result<Option<JobHandle>> {
        let deployment = self.deployments.get(deployment_id).await?;
        if deployment.status != DeploymentStatus::Queued {
            return Ok(None);
        }
        if !self.deployments.claim_dispatch(deployment_id).await? {
            debug!(deployment_id = %deployment_id, "Dispatch already claimed");
            return Ok(None);
        }

        let site = self.sites.get(deployment.site_id).await?;
        let strategy = self.dispatcher.strategy(site.variant)?;
        let request = BuildRequest {
            deployment_id,
            site_id: site.id,
            clone_url: site.clone_url.clone(),
            commit_sha: deployment.commit_hash.clone(),
            branch: deployment.branch.clone(),
            env: deployment.env_vars.clone(),
            callback_url: self.callback_url(deployment_id)?,
            artifact_key: deployment.artifact_key(),
        };

        match strategy.dispatch(&request).await {
            Ok(handle) => {
                self.deployments
                    .record_job_handle(deployment_id, &handle)
                    .await?;
                info!(
                    deployment_id = %deployment_id,
                    job = %handle.execution,
                    variant = %site.variant,
                    "Dispatched build"
                );
                Ok(Some(handle))
            }
            Err(e) => {
                let message = e.to_string();
                error!(deployment_id = %deployment_id, error = %message, "Build submission failed");
                self.deployments
                    .record_error(deployment_id, &message)
                    .await?;
                Err(Error::Dispatch(message))
            }
        }
    }

    fn callback_url(&self, deployment_id: ResourceId) -> Result<String> {
        let mut url = url::Url::parse(&self.settings.callback_base_url).map_err(|e| {
            Error::Internal(format!(
                "invalid callback base url '{}': {}",
                self.settings.callback_base_url, e
            ))
        })?;
        url.query_pairs_mut()
            .append_pair("deployment_id", &deployment_id.to_string());
        Ok(url.into())
    }

    // --- Lifecycle -------------------------------------------------------

    /// Handle a build progress callback.
    ///
    /// `started` moves the deployment to `BUILDING`; any other status checks
    /// the job with a bounded wait and finalizes it if it has finished.
    pub async fn handle_callback(&self, deployment_id: ResourceId, status: &str) -> Result<Deployment> {
        let deployment = self.deployments.get(deployment_id).await?;
        if deployment.job_handle().is_none() {
            return Err(Error::NotFound(format!(
                "job handle for deployment {}",
                deployment_id
            )));
        }

        if status == STARTED {
            self.mark_started(deployment_id).await
        } else {
            self.finalize(deployment_id, self.settings.completion_wait)
                .await
        }
    }

    /// `QUEUED → BUILDING`. Repeated or late signals are no-ops.
    pub async fn mark_started(&self, deployment_id: ResourceId) -> Result<Deployment> {
        let deployment = self.deployments.get(deployment_id).await?;
        if deployment.status == DeploymentStatus::Queued {
            let applied = self
                .deployments
                .transition(
                    deployment_id,
                    DeploymentStatus::Queued,
                    DeploymentStatus::Building,
                    None,
                )
                .await?;
            if applied {
                info!(deployment_id = %deployment_id, "Build started");
            }
        }
        Ok(self.deployments.get(deployment_id).await?)
    }

    /// Check the deployment's job, waiting at most `max_wait`, and move the
    /// deployment to its terminal status once the job has finished.
    ///
    /// Status query failures are treated as transient and leave the
    /// deployment untouched; a job the service no longer knows fails it.
    ///
    /// Live-backend provisioning shares the same deadline. If it does not
    /// finish in time the deployment stays `BUILDING` and the reconciler
    /// completes it.
    pub async fn finalize(&self, deployment_id: ResourceId, max_wait: Duration) -> Result<Deployment> {
        let deadline = Instant::now() + max_wait;
        self.finalize_with(deployment_id, max_wait, Some(deadline))
            .await
    }

    async fn finalize_with(
        &self,
        deployment_id: ResourceId,
        max_wait: Duration,
        deadline: Option<Instant>,
    ) -> Result<Deployment> {
        let lock = self
            .finalizing
            .entry(deployment_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let result = self
            .finalize_locked(deployment_id, max_wait, deadline)
            .await;
        if matches!(&result, Ok(d) if d.status.is_terminal()) {
            self.finalizing.remove(&deployment_id);
        }
        result
    }

    async fn finalize_locked(
        &self,
        deployment_id: ResourceId,
        max_wait: Duration,
        deadline: Option<Instant>,
    ) -> Result<Deployment> {
        let deployment = self.deployments.get(deployment_id).await?;
        if deployment.status.is_terminal() {
            return Ok(deployment);
        }
        let Some(handle) = deployment.job_handle() else {
            return Ok(deployment);
        };

        let site = self.sites.get(deployment.site_id).await?;
        let strategy = self.dispatcher.strategy(site.variant)?;

        let status = match wait_for_completion(
            strategy.as_ref(),
            &handle,
            max_wait,
            self.settings.poll_interval,
        )
        .await
        {
            Ok(Some(status)) => status,
            Ok(None) => return Ok(deployment),
            Err(Error::NotFound(_)) => {
                warn!(deployment_id = %deployment_id, job = %handle.execution, "Build job vanished");
                return self
                    .fail(&deployment, "build job not found on the job service")
                    .await;
            }
            Err(e) => {
                warn!(deployment_id = %deployment_id, error = %e, "Job status check failed");
                return Ok(deployment);
            }
        };

        let finished = match status {
            JobStatus::Succeeded { .. } => self.succeed(&site, &deployment, deadline).await?,
            JobStatus::Failed { message } | JobStatus::Cancelled { message } => {
                self.fail(&deployment, &message).await?
            }
            JobStatus::Pending | JobStatus::Running { .. } => return Ok(deployment),
        };

        if finished.status.is_terminal() && finished.build_logs.is_none() {
            self.cache_logs(strategy.as_ref(), &finished, &handle).await;
        }
        Ok(self.deployments.get(deployment_id).await?)
    }

    async fn succeed(
        &self,
        site: &Site,
        deployment: &Deployment,
        deadline: Option<Instant>,
    ) -> Result<Deployment> {
        if !self.ensure_building(deployment).await? {
            return Ok(self.deployments.get(deployment.id).await?);
        }

        if site.variant == BuildVariant::Server {
            let provisioned = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.provision(site, deployment)).await {
                        Ok(result) => result,
                        Err(_) => {
                            info!(
                                deployment_id = %deployment.id,
                                "Live backend not ready before the deadline, deferring to the reconciler"
                            );
                            return Ok(self.deployments.get(deployment.id).await?);
                        }
                    }
                }
                None => self.provision(site, deployment).await,
            };
            if let Err(e) = provisioned {
                error!(deployment_id = %deployment.id, error = %e, "Live backend provisioning failed");
                if matches!(e, Error::Provisioning(_)) {
                    self.restore_live_backend(site, deployment).await;
                }
                return self.fail(deployment, &e.to_string()).await;
            }
        }

        let applied = self
            .deployments
            .transition(
                deployment.id,
                DeploymentStatus::Building,
                DeploymentStatus::Succeeded,
                None,
            )
            .await?;
        if !applied {
            return Ok(self.deployments.get(deployment.id).await?);
        }
        info!(deployment_id = %deployment.id, site_id = %site.id, "Deployment succeeded");

        self.sites
            .set_active_deployment(site.id, deployment.id)
            .await?;
        match self.publish(site.id).await {
            Ok(report) if !report.failed.is_empty() => {
                warn!(site_id = %site.id, failed = report.failed.len(), "Publish was partial");
            }
            Ok(_) => {}
            Err(e) => error!(site_id = %site.id, error = %e, "Publish failed"),
        }
        Ok(self.deployments.get(deployment.id).await?)
    }

    /// Fail a dispatched deployment. It passes through `BUILDING` even when
    /// the `started` signal never arrived.
    async fn fail(&self, deployment: &Deployment, message: &str) -> Result<Deployment> {
        if !self.ensure_building(deployment).await? {
            return Ok(self.deployments.get(deployment.id).await?);
        }
        let applied = self
            .deployments
            .transition(
                deployment.id,
                DeploymentStatus::Building,
                DeploymentStatus::Failed,
                Some(message),
            )
            .await?;
        if applied {
            warn!(deployment_id = %deployment.id, error = %message, "Deployment failed");
        }
        Ok(self.deployments.get(deployment.id).await?)
    }

    /// Make sure the deployment is `BUILDING`, stepping through it when the
    /// `started` signal never arrived. Returns false if it is already terminal.
    async fn ensure_building(&self, deployment: &Deployment) -> Result<bool> {
        let current = self.deployments.get(deployment.id).await?;
        match current.status {
            DeploymentStatus::Building => Ok(true),
            DeploymentStatus::Queued => {
                self.deployments
                    .transition(
                        deployment.id,
                        DeploymentStatus::Queued,
                        DeploymentStatus::Building,
                        None,
                    )
                    .await?;
                let current = self.deployments.get(deployment.id).await?;
                Ok(current.status == DeploymentStatus::Building)
            }
            DeploymentStatus::Succeeded | DeploymentStatus::Failed => Ok(false),
        }
    }

    /// Confirm the image exists and point the site's live backend at it.
    async fn provision(&self, site: &Site, deployment: &Deployment) -> Result<()> {
        let image = ImageRef::for_deployment(
            &self.settings.image_registry,
            &self.settings.image_prefix,
            &site.id,
            &deployment.id,
        );
        if !self.registry.has_image(&image).await? {
            return Err(Error::Registry(format!("image not found: {}", image)));
        }

        let spec = LiveBackendSpec::for_deployment(site.id, deployment.id, image, &deployment.env_vars);
        let backend = match &site.live_backend {
            Some(backend_id) => self.provisioner.roll_out(backend_id, &spec).await?,
            None => self.provisioner.create(&spec).await?,
        };

        if site.live_backend.as_deref() != Some(backend.id.as_str()) {
            self.sites.set_live_backend(site.id, &backend.id).await?;
        }
        match &backend.url {
            Some(url) => {
                self.deployments.set_backend_url(deployment.id, url).await?;
                info!(deployment_id = %deployment.id, backend = %backend.id, url = %url, "Live backend ready");
            }
            None => warn!(deployment_id = %deployment.id, backend = %backend.id, "Live backend has no endpoint yet"),
        }
        Ok(())
    }

    /// Point the live backend back at the active deployment's revision after
    /// a failed roll-out.
    async fn restore_live_backend(&self, site: &Site, failed: &Deployment) {
        let (Some(backend_id), Some(active_id)) = (&site.live_backend, site.active_deployment_id)
        else {
            return;
        };
        if active_id == failed.id {
            return;
        }
        let active = match self.deployments.get(active_id).await {
            Ok(active) => active,
            Err(e) => {
                warn!(site_id = %site.id, error = %e, "Cannot load active deployment for rollback");
                return;
            }
        };

        let image = ImageRef::for_deployment(
            &self.settings.image_registry,
            &self.settings.image_prefix,
            &site.id,
            &active.id,
        );
        let spec = LiveBackendSpec::for_deployment(site.id, active.id, image, &active.env_vars);
        match self.provisioner.roll_out(backend_id, &spec).await {
            Ok(_) => info!(site_id = %site.id, deployment_id = %active.id, "Restored live backend revision"),
            Err(e) => error!(site_id = %site.id, error = %e, "Live backend rollback failed"),
        }
    }

    async fn cache_logs(&self, strategy: &dyn BuildStrategy, deployment: &Deployment, handle: &JobHandle) {
        match strategy.fetch_logs(handle).await {
            Ok(logs) if !logs.is_empty() => {
                if let Err(e) = self.deployments.set_build_logs(deployment.id, &logs).await {
                    warn!(deployment_id = %deployment.id, error = %e, "Failed to cache build logs");
                }
            }
            Ok(_) => {}
            Err(e) => debug!(deployment_id = %deployment.id, error = %e, "Build logs unavailable"),
        }
    }

    /// Build output of a deployment. Logs fetched after the deployment has
    /// finished are cached on it.
    pub async fn deployment_logs(&self, deployment_id: ResourceId) -> Result<String> {
        let deployment = self.deployments.get(deployment_id).await?;
        if let Some(logs) = deployment.build_logs {
            return Ok(logs);
        }
        let Some(handle) = deployment.job_handle() else {
            return Ok(String::new());
        };

        let site = self.sites.get(deployment.site_id).await?;
        let strategy = self.dispatcher.strategy(site.variant)?;
        let logs = strategy.fetch_logs(&handle).await?;
        if deployment.status.is_terminal() && !logs.is_empty() {
            self.deployments.set_build_logs(deployment_id, &logs).await?;
        }
        Ok(logs)
    }

    // --- Publishing ------------------------------------------------------

    /// Write the site's active pointer to the routing entry of every active
    /// subdomain. Writes are independent: a failed subdomain is logged and
    /// left stale without affecting the others.
    pub async fn publish(&self, site_id: ResourceId) -> Result<PublishReport> {
        let site = self.sites.get(site_id).await?;
        let Some(active_id) = site.active_deployment_id else {
            debug!(site_id = %site_id, "Nothing to publish yet");
            return Ok(PublishReport::default());
        };
        let active = self.deployments.get(active_id).await?;

        let target = match site.variant {
            BuildVariant::Static => RouteTarget::Artifact(active.artifact_key()),
            BuildVariant::Server => match active.backend_url {
                Some(url) => RouteTarget::Backend(url),
                None => {
                    warn!(site_id = %site_id, deployment_id = %active_id, "No live backend endpoint to publish");
                    return Ok(PublishReport::default());
                }
            },
        };

        let bindings = self.subdomains.list_active_by_site(site_id).await?;
        let writes = bindings.iter().map(|binding| {
            let target = &target;
            async move {
                let result = self.routing.set(&binding.subdomain, target).await;
                (binding.subdomain.clone(), result)
            }
        });

        let mut report = PublishReport {
            target: Some(target.clone()),
            ..Default::default()
        };
        for (subdomain, result) in join_all(writes).await {
            match result {
                Ok(()) => report.written.push(subdomain),
                Err(e) => {
                    error!(site_id = %site_id, subdomain = %subdomain, error = %e, "Routing write failed");
                    report.failed.push((subdomain, e.to_string()));
                }
            }
        }
        info!(
            site_id = %site_id,
            target = %target,
            written = report.written.len(),
            failed = report.failed.len(),
            "Published site"
        );
        Ok(report)
    }

    // --- Reconciliation --------------------------------------------------

    /// One pass over in-flight deployments: finalize those whose job has
    /// finished, and fail queued ones that never got a job in time.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let in_flight = self.deployments.list_in_flight().await?;
        let mut report = ReconcileReport {
            checked: in_flight.len(),
            ..Default::default()
        };

        for deployment in in_flight {
            if deployment.job_handle().is_some() {
                match self.finalize_with(deployment.id, Duration::ZERO, None).await {
                    Ok(d) if d.status.is_terminal() => report.finalized += 1,
                    Ok(_) => {}
                    Err(e) => warn!(deployment_id = %deployment.id, error = %e, "Reconcile failed"),
                }
                continue;
            }

            if deployment.status == DeploymentStatus::Queued && self.is_expired(&deployment) {
                let message = deployment
                    .error
                    .clone()
                    .unwrap_or_else(|| "build was never dispatched".to_string());
                let applied = self
                    .deployments
                    .transition(
                        deployment.id,
                        DeploymentStatus::Queued,
                        DeploymentStatus::Failed,
                        Some(&message),
                    )
                    .await?;
                if applied {
                    warn!(deployment_id = %deployment.id, error = %message, "Expired queued deployment");
                    report.expired += 1;
                }
            }
        }
        Ok(report)
    }

    fn is_expired(&self, deployment: &Deployment) -> bool {
        let age = chrono::Utc::now() - deployment.created_at;
        age.to_std()
            .map(|age| age >= self.settings.queued_timeout)
            .unwrap_or(false)
    }
}

fn is_repository_name(repository: &str) -> bool {
    matches!(
        repository.split_once('/'),
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvisioner, TestPipeline};
    use hostit_core::repository::CommitInfo;

    fn new_site(variant: BuildVariant) -> NewSite {
        NewSite {
            owner_id: "user-1".to_string(),
            name: "Blog".to_string(),
            repository: "octo/blog".to_string(),
            clone_url: "https://github.com/octo/blog.git".to_string(),
            variant,
            env_vars: vec![EnvVar::new("PUBLIC_API", "https://api.example")],
        }
    }

    fn push(r#ref: &str, after: &str) -> PushEvent {
        PushEvent {
            r#ref: r#ref.to_string(),
            after: after.to_string(),
            repository_full_name: "octo/blog".to_string(),
            default_branch: "main".to_string(),
            clone_url: "https://github.com/octo/blog.git".to_string(),
            branch: r#ref.strip_prefix("refs/heads/").map(String::from),
            commits: vec![CommitInfo {
                sha: after.to_string(),
                message: "Fix typo".to_string(),
                author: "octocat".to_string(),
            }],
            head_commit: None,
            pusher: "octocat".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_site_binds_subdomain_and_dispatches() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        assert!(created.dispatch_error.is_none());
        assert!(created.subdomain.subdomain.starts_with("blog-"));
        assert_eq!(created.subdomain.subdomain.len(), "blog-0000".len());
        assert_eq!(created.deployment.status, DeploymentStatus::Queued);
        assert!(created.deployment.job_handle().is_some());
        assert_eq!(created.deployment.env_vars, created.site.env_vars);

        assert_eq!(t.static_builds.dispatch_count(), 1);
        let request = &t.static_builds.requests()[0];
        assert_eq!(
            request.callback_url,
            format!("https://hostit.test/callback?deployment_id={}", created.deployment.id)
        );
        assert_eq!(request.clone_url, "https://github.com/octo/blog.git");
    }

    #[tokio::test]
    async fn test_create_site_validates_input() {
        let t = TestPipeline::new();

        let mut site = new_site(BuildVariant::Static);
        site.name = "   ".to_string();
        assert!(matches!(
            t.pipeline.create_site(site).await,
            Err(Error::InvalidInput(_))
        ));

        let mut site = new_site(BuildVariant::Static);
        site.repository = "just-a-name".to_string();
        assert!(matches!(
            t.pipeline.create_site(site).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(t.static_builds.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn test_static_build_publishes_artifact() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        let id = created.deployment.id;

        let building = t.pipeline.handle_callback(id, "started").await.unwrap();
        assert_eq!(building.status, DeploymentStatus::Building);
        assert!(building.started_at.is_some());

        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        t.static_builds.set_logs("built 12 pages\n");
        let done = t.pipeline.handle_callback(id, "success").await.unwrap();

        assert_eq!(done.status, DeploymentStatus::Succeeded);
        assert!(done.completed_at.is_some());
        assert_eq!(done.build_logs.as_deref(), Some("built 12 pages\n"));

        let site = t.pipeline.get_site(created.site.id).await.unwrap();
        assert_eq!(site.active_deployment_id, Some(id));
        assert_eq!(
            t.routing.raw(&created.subdomain.subdomain),
            Some(RouteTarget::Artifact(done.artifact_key()).encode())
        );
    }

    #[tokio::test]
    async fn test_success_without_started_signal_steps_through_building() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let done = t
            .pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();
        assert_eq!(done.status, DeploymentStatus::Succeeded);
        assert!(done.started_at.is_some());
    }

    #[tokio::test]
    async fn test_repeated_callbacks_are_noops() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        let id = created.deployment.id;

        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let first = t.pipeline.handle_callback(id, "success").await.unwrap();
        let second = t.pipeline.handle_callback(id, "success").await.unwrap();
        let late_start = t.pipeline.handle_callback(id, "started").await.unwrap();

        assert_eq!(second.status, DeploymentStatus::Succeeded);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(late_start.status, DeploymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_routing() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        let subdomain = created.subdomain.subdomain.clone();

        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let good = t
            .pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();
        let published = t.routing.raw(&subdomain);

        let next = t.pipeline.trigger_deploy(created.site.id, None).await.unwrap();
        t.static_builds.set_status(JobStatus::Failed {
            message: "npm run build exited with 1".to_string(),
        });
        let failed = t.pipeline.handle_callback(next.id, "error").await.unwrap();

        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("npm run build exited with 1"));
        let site = t.pipeline.get_site(created.site.id).await.unwrap();
        assert_eq!(site.active_deployment_id, Some(good.id));
        assert_eq!(t.routing.raw(&subdomain), published);
    }

    #[tokio::test]
    async fn test_vanished_job_fails_deployment() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        t.static_builds.forget_job();
        let done = t
            .pipeline
            .handle_callback(created.deployment.id, "error")
            .await
            .unwrap();
        assert_eq!(done.status, DeploymentStatus::Failed);
        assert!(done.error.is_some());
    }

    #[tokio::test]
    async fn test_failure_without_started_signal_steps_through_building() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        t.static_builds.set_status(JobStatus::Failed {
            message: "boom".to_string(),
        });
        let done = t
            .pipeline
            .handle_callback(created.deployment.id, "error")
            .await
            .unwrap();
        assert_eq!(done.status, DeploymentStatus::Failed);
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert_eq!(done.error.as_deref(), Some("boom"));

        let next = t.pipeline.trigger_deploy(created.site.id, None).await.unwrap();
        t.static_builds.forget_job();
        let vanished = t.pipeline.handle_callback(next.id, "error").await.unwrap();
        assert_eq!(vanished.status, DeploymentStatus::Failed);
        assert!(vanished.started_at.is_some());
    }

    #[tokio::test]
    async fn test_status_query_errors_leave_deployment_in_flight() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        let id = created.deployment.id;
        t.pipeline.handle_callback(id, "started").await.unwrap();

        t.static_builds.fail_status(true);
        let unchanged = t.pipeline.handle_callback(id, "success").await.unwrap();
        assert_eq!(unchanged.status, DeploymentStatus::Building);

        let still_running = t.pipeline.finalize(id, Duration::ZERO).await.unwrap();
        assert_eq!(still_running.status, DeploymentStatus::Building);
    }

    #[tokio::test]
    async fn test_push_deploys_default_branch_only() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        let ignored = t
            .pipeline
            .handle_push(&push("refs/heads/feature", "f00"))
            .await
            .unwrap();
        assert!(ignored.is_empty());

        let deployments = t
            .pipeline
            .handle_push(&push("refs/heads/main", "a1b2c3d"))
            .await
            .unwrap();
        assert_eq!(deployments.len(), 1);
        assert!(deployments[0].dispatch_error.is_none());
        let deployment = &deployments[0].deployment;
        assert_eq!(deployment.site_id, created.site.id);
        assert_eq!(deployment.commit_hash.as_deref(), Some("a1b2c3d"));
        assert_eq!(deployment.commit_message.as_deref(), Some("Fix typo"));
        assert_eq!(deployment.branch.as_deref(), Some("main"));
        assert!(deployment.job_handle().is_some());

        let request = t.static_builds.requests().pop().unwrap();
        assert_eq!(request.commit_sha.as_deref(), Some("a1b2c3d"));
        assert_eq!(request.artifact_key, "a1b2c3d");

        let history = t.pipeline.list_deployments(created.site.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|d| d.id == deployment.id));
    }

    #[tokio::test]
    async fn test_push_reports_dispatch_failure() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        t.static_builds.fail_dispatch(true);
        let deployments = t
            .pipeline
            .handle_push(&push("refs/heads/main", "a1b2c3d"))
            .await
            .unwrap();

        assert_eq!(deployments.len(), 1);
        let pushed = &deployments[0];
        assert!(pushed.dispatch_error.as_deref().unwrap().contains("quota exceeded"));
        assert_eq!(pushed.deployment.site_id, created.site.id);
        assert_eq!(pushed.deployment.status, DeploymentStatus::Queued);
        assert!(pushed.deployment.job_handle().is_none());
        assert!(pushed.deployment.error.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_submits_once() {
        let t = TestPipeline::new();
        let site = SiteRepo::create(t.store.as_ref(), &new_site(BuildVariant::Static))
            .await
            .unwrap();
        let deployment = DeploymentRepo::create(
            t.store.as_ref(),
            &NewDeployment {
                site_id: site.id,
                branch: None,
                commit_hash: Some("abc".to_string()),
                commit_message: None,
                env_vars: Vec::new(),
            },
        )
        .await
        .unwrap();

        let (a, b) = tokio::join!(
            t.pipeline.dispatch(deployment.id),
            t.pipeline.dispatch(deployment.id)
        );
        let handles: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
        assert_eq!(handles.len(), 1);
        assert_eq!(t.static_builds.dispatch_count(), 1);

        assert!(t.pipeline.dispatch(deployment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_failure_then_expiry() {
        let t = TestPipeline::new();
        t.static_builds.fail_dispatch(true);

        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        let id = created.deployment.id;
        assert!(created.dispatch_error.is_some());
        assert_eq!(created.deployment.status, DeploymentStatus::Queued);
        assert!(created.deployment.job_handle().is_none());
        assert!(created.deployment.error.is_some());

        assert!(matches!(
            t.pipeline.handle_callback(id, "started").await,
            Err(Error::NotFound(_))
        ));

        let report = t.pipeline.reconcile_once().await.unwrap();
        assert_eq!(report.expired, 0);

        t.store
            .backdate_deployment(id, chrono::Duration::seconds(1000))
            .unwrap();
        let report = t.pipeline.reconcile_once().await.unwrap();
        assert_eq!(report.expired, 1);

        let failed = t.pipeline.get_deployment(id).await.unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert!(failed.error.unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_reconcile_finalizes_missed_callbacks() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        let report = t.pipeline.reconcile_once().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.finalized, 0);

        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let report = t.pipeline.reconcile_once().await.unwrap();
        assert_eq!(report.finalized, 1);

        let done = t.pipeline.get_deployment(created.deployment.id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::Succeeded);
        assert!(t.routing.raw(&created.subdomain.subdomain).is_some());
    }

    #[tokio::test]
    async fn test_server_build_provisions_and_rolls_out() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Server)).await.unwrap();
        assert_eq!(t.server_builds.dispatch_count(), 1);
        assert_eq!(t.static_builds.dispatch_count(), 0);

        t.server_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let first = t
            .pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();
        assert_eq!(first.status, DeploymentStatus::Succeeded);
        assert_eq!(t.provisioner.created(), 1);

        let spec = &t.provisioner.specs()[0];
        let url = FakeProvisioner::url_for(spec);
        assert_eq!(first.backend_url.as_deref(), Some(url.as_str()));
        assert_eq!(spec.image.registry, "registry.test");
        assert!(spec.env.iter().any(|v| v.key == "PUBLIC_API"));
        assert_eq!(
            t.routing.raw(&created.subdomain.subdomain),
            Some(RouteTarget::Backend(url).encode())
        );

        let site = t.pipeline.get_site(created.site.id).await.unwrap();
        assert!(site.live_backend.is_some());

        let next = t.pipeline.trigger_deploy(created.site.id, None).await.unwrap();
        let second = t.pipeline.handle_callback(next.id, "success").await.unwrap();
        assert_eq!(second.status, DeploymentStatus::Succeeded);
        assert_eq!(t.provisioner.created(), 1);
        assert_eq!(t.provisioner.rolled_out(), 1);
        assert_ne!(second.backend_url, first.backend_url);
    }

    #[tokio::test]
    async fn test_server_build_without_image_fails() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Server)).await.unwrap();

        t.registry.set_present(false);
        t.server_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let done = t
            .pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();

        assert_eq!(done.status, DeploymentStatus::Failed);
        assert!(done.error.unwrap().contains("image not found"));
        assert_eq!(t.provisioner.created(), 0);
        assert!(t.routing.is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_failure_fails_deployment() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Server)).await.unwrap();

        t.provisioner.fail(true);
        t.server_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let done = t
            .pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();

        assert_eq!(done.status, DeploymentStatus::Failed);
        let site = t.pipeline.get_site(created.site.id).await.unwrap();
        assert_eq!(site.active_deployment_id, None);
    }

    #[tokio::test]
    async fn test_slow_provisioning_is_left_to_the_reconciler() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Server)).await.unwrap();
        let id = created.deployment.id;

        t.provisioner.set_delay(Duration::from_millis(500));
        t.server_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let pending = t.pipeline.handle_callback(id, "success").await.unwrap();

        assert_eq!(pending.status, DeploymentStatus::Building);
        assert_eq!(t.provisioner.created(), 0);
        assert!(t.routing.is_empty());

        t.provisioner.set_delay(Duration::ZERO);
        let report = t.pipeline.reconcile_once().await.unwrap();
        assert_eq!(report.finalized, 1);

        let done = t.pipeline.get_deployment(id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::Succeeded);
        assert_eq!(t.provisioner.created(), 1);
        assert!(t.routing.raw(&created.subdomain.subdomain).is_some());
    }

    #[tokio::test]
    async fn test_failed_roll_out_restores_active_revision() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Server)).await.unwrap();
        let subdomain = created.subdomain.subdomain.clone();

        t.server_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let good = t
            .pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();
        let published = t.routing.raw(&subdomain);

        let next = t.pipeline.trigger_deploy(created.site.id, None).await.unwrap();
        t.provisioner.fail_for(next.id);
        let failed = t.pipeline.handle_callback(next.id, "success").await.unwrap();

        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert!(failed.started_at.is_some());
        assert_eq!(t.provisioner.rolled_out(), 1);
        let restored = t.provisioner.specs().pop().unwrap();
        assert_eq!(restored.deployment_id, good.id);

        let site = t.pipeline.get_site(created.site.id).await.unwrap();
        assert_eq!(site.active_deployment_id, Some(good.id));
        assert_eq!(t.routing.raw(&subdomain), published);
    }

    #[tokio::test]
    async fn test_partial_publish_failure() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        t.pipeline.add_subdomain(created.site.id, "docs").await.unwrap();
        t.routing.fail_writes_for("docs");

        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        let done = t
            .pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();
        assert_eq!(done.status, DeploymentStatus::Succeeded);
        assert!(t.routing.raw(&created.subdomain.subdomain).is_some());
        assert!(t.routing.raw("docs").is_none());

        let report = t.pipeline.publish(created.site.id).await.unwrap();
        assert_eq!(report.written, vec![created.subdomain.subdomain.clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "docs");

        t.routing.clear_failures();
        let report = t.pipeline.publish(created.site.id).await.unwrap();
        assert_eq!(report.written.len(), 2);
        assert_eq!(t.routing.raw("docs"), t.routing.raw(&created.subdomain.subdomain));
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        t.pipeline.add_subdomain(created.site.id, "docs").await.unwrap();
        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        t.pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();

        let snapshot = |t: &TestPipeline| {
            (
                t.routing.raw(&created.subdomain.subdomain),
                t.routing.raw("docs"),
                t.routing.len(),
            )
        };
        let before = snapshot(&t);
        let first = t.pipeline.publish(created.site.id).await.unwrap();
        let after_first = snapshot(&t);
        let second = t.pipeline.publish(created.site.id).await.unwrap();

        assert_eq!(before, after_first);
        assert_eq!(after_first, snapshot(&t));
        assert_eq!(first.target, second.target);
        assert_eq!(t.routing.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_before_first_success_writes_nothing() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        let report = t.pipeline.publish(created.site.id).await.unwrap();
        assert_eq!(report, PublishReport::default());
        assert!(t.routing.is_empty());
    }

    #[tokio::test]
    async fn test_subdomain_management() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        let site_id = created.site.id;

        assert!(matches!(
            t.pipeline.add_subdomain(site_id, "Bad_Name!").await,
            Err(Error::InvalidInput(_))
        ));

        t.static_builds.set_status(JobStatus::Succeeded { finished_at: None });
        t.pipeline
            .handle_callback(created.deployment.id, "success")
            .await
            .unwrap();

        let binding = t.pipeline.add_subdomain(site_id, "Docs").await.unwrap();
        assert_eq!(binding.subdomain, "docs");
        assert!(t.routing.raw("docs").is_some());

        assert!(matches!(
            t.pipeline.add_subdomain(site_id, "docs").await,
            Err(Error::Conflict(_))
        ));

        let other = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        assert!(matches!(
            t.pipeline.remove_subdomain(other.site.id, "docs").await,
            Err(Error::NotFound(_))
        ));

        let removed = t.pipeline.remove_subdomain(site_id, " Docs ").await.unwrap();
        assert_eq!(removed.subdomain, "docs");
        assert!(t.routing.raw("docs").is_none());
        assert_eq!(t.pipeline.list_subdomains(site_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_env_vars_are_snapshotted() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();

        let site = t
            .pipeline
            .update_env_vars(created.site.id, vec![EnvVar::new("PUBLIC_API", "https://v2.example")])
            .await
            .unwrap();
        assert_eq!(site.env_vars[0].value, "https://v2.example");

        let old = t.pipeline.get_deployment(created.deployment.id).await.unwrap();
        assert_eq!(old.env_vars[0].value, "https://api.example");

        let next = t.pipeline.trigger_deploy(created.site.id, None).await.unwrap();
        assert_eq!(next.env_vars[0].value, "https://v2.example");
    }

    #[tokio::test]
    async fn test_logs_are_fetched_then_cached() {
        let t = TestPipeline::new();
        let created = t.pipeline.create_site(new_site(BuildVariant::Static)).await.unwrap();
        let id = created.deployment.id;

        t.static_builds.set_logs("cloning\n");
        assert_eq!(t.pipeline.deployment_logs(id).await.unwrap(), "cloning\n");
        assert!(t.pipeline.get_deployment(id).await.unwrap().build_logs.is_none());

        t.static_builds.set_status(JobStatus::Failed {
            message: "exit 2".to_string(),
        });
        t.static_builds.set_logs("cloning\nfailed\n");
        t.pipeline.handle_callback(id, "error").await.unwrap();

        t.static_builds.set_logs("");
        assert_eq!(t.pipeline.deployment_logs(id).await.unwrap(), "cloning\nfailed\n");
    }

    #[tokio::test]
    async fn test_unknown_deployment_is_not_found() {
        let t = TestPipeline::new();
        assert!(matches!(
            t.pipeline.handle_callback(ResourceId::new(), "success").await,
            Err(Error::NotFound(_))
        ));
    }
}
