//! In-memory fakes for the pipeline's collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hostit_core::deployer::{
    ImageRef, ImageRegistry, LiveBackend, LiveBackendProvisioner, LiveBackendSpec, service_name,
};
use hostit_core::executor::{BuildRequest, BuildStrategy, JobHandle, JobStatus};
use hostit_core::site::BuildVariant;
use hostit_core::{Error, ResourceId, Result};
use hostit_db::MemoryStore;
use hostit_executor::JobDispatcher;
use hostit_routing::MemoryRoutingTable;

use crate::pipeline::{Pipeline, PipelineDeps, PipelineSettings};

/// Build strategy that records dispatches and reports a scripted status.
pub struct FakeBuildStrategy {
    variant: BuildVariant,
    dispatched: AtomicUsize,
    requests: Mutex<Vec<BuildRequest>>,
    fail_dispatch: AtomicBool,
    fail_status: AtomicBool,
    // None reports the job as gone.
    status: Mutex<Option<JobStatus>>,
    logs: Mutex<String>,
}

impl FakeBuildStrategy {
    pub fn new(variant: BuildVariant) -> Self {
        Self {
            variant,
            dispatched: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fail_dispatch: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            status: Mutex::new(Some(JobStatus::Running { started_at: None })),
            logs: Mutex::new(String::new()),
        }
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: JobStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = Some(status);
        }
    }

    pub fn forget_job(&self) {
        if let Ok(mut current) = self.status.lock() {
            *current = None;
        }
    }

    pub fn set_logs(&self, logs: &str) {
        if let Ok(mut current) = self.logs.lock() {
            *current = logs.to_string();
        }
    }
}

#[async_trait]
impl BuildStrategy for FakeBuildStrategy {
    fn variant(&self) -> BuildVariant {
        self.variant
    }

    async fn dispatch(&self, request: &BuildRequest) -> Result<JobHandle> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(Error::JobService("quota exceeded".to_string()));
        }
        let n = self.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let name = format!("fake-{}-{}-{}", self.variant, request.deployment_id.short(8), n);
        Ok(JobHandle {
            operation: format!("builds/{}", name),
            execution: name,
        })
    }

    async fn check_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(Error::JobService("connection reset".to_string()));
        }
        self.status
            .lock()
            .map_err(|_| Error::Internal("lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| Error::NotFound(format!("job {}", handle.operation)))
    }

    async fn fetch_logs(&self, _handle: &JobHandle) -> Result<String> {
        Ok(self.logs.lock().map(|l| l.clone()).unwrap_or_default())
    }
}

/// Registry that either has every image or none.
pub struct FakeRegistry {
    present: AtomicBool,
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self {
            present: AtomicBool::new(true),
        }
    }
}

impl FakeRegistry {
    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn has_image(&self, _image: &ImageRef) -> Result<bool> {
        Ok(self.present.load(Ordering::SeqCst))
    }
}

/// Provisioner that serves every revision at a predictable cluster URL.
#[derive(Default)]
pub struct FakeProvisioner {
    created: AtomicUsize,
    rolled_out: AtomicUsize,
    fail: AtomicBool,
    failing_deployment: Mutex<Option<ResourceId>>,
    delay: Mutex<Duration>,
    specs: Mutex<Vec<LiveBackendSpec>>,
}

impl FakeProvisioner {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn rolled_out(&self) -> usize {
        self.rolled_out.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fail only revisions of this deployment.
    pub fn fail_for(&self, deployment_id: ResourceId) {
        if let Ok(mut failing) = self.failing_deployment.lock() {
            *failing = Some(deployment_id);
        }
    }

    /// Time every create or roll-out takes before it is applied.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.delay.lock() {
            *current = delay;
        }
    }

    pub fn specs(&self) -> Vec<LiveBackendSpec> {
        self.specs.lock().map(|s| s.clone()).unwrap_or_default()
    }

    async fn record(&self, spec: &LiveBackendSpec) -> Result<()> {
        let delay = self.delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing_deployment
            .lock()
            .map(|f| *f == Some(spec.deployment_id))
            .unwrap_or(false);
        if failing || self.fail.load(Ordering::SeqCst) {
            return Err(Error::Provisioning(format!(
                "revision {} not ready",
                spec.revision
            )));
        }
        if let Ok(mut specs) = self.specs.lock() {
            specs.push(spec.clone());
        }
        Ok(())
    }

    pub fn url_for(spec: &LiveBackendSpec) -> String {
        format!("http://{}.sites.test", spec.revision)
    }
}

#[async_trait]
impl LiveBackendProvisioner for FakeProvisioner {
    async fn create(&self, spec: &LiveBackendSpec) -> Result<LiveBackend> {
        self.record(spec).await?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(LiveBackend {
            id: format!("hostit-sites/{}", service_name(&spec.site_id)),
            url: Some(Self::url_for(spec)),
        })
    }

    async fn roll_out(&self, backend_id: &str, spec: &LiveBackendSpec) -> Result<LiveBackend> {
        self.record(spec).await?;
        self.rolled_out.fetch_add(1, Ordering::SeqCst);
        Ok(LiveBackend {
            id: backend_id.to_string(),
            url: Some(Self::url_for(spec)),
        })
    }
}

/// A pipeline wired entirely to in-memory collaborators.
pub struct TestPipeline {
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<MemoryStore>,
    pub routing: Arc<MemoryRoutingTable>,
    pub static_builds: Arc<FakeBuildStrategy>,
    pub server_builds: Arc<FakeBuildStrategy>,
    pub registry: Arc<FakeRegistry>,
    pub provisioner: Arc<FakeProvisioner>,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings {
            callback_base_url: "https://hostit.test/callback".to_string(),
            completion_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            image_registry: "registry.test".to_string(),
            image_prefix: "server-builds".to_string(),
            queued_timeout: Duration::from_secs(900),
        })
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let routing = Arc::new(MemoryRoutingTable::new());
        let static_builds = Arc::new(FakeBuildStrategy::new(BuildVariant::Static));
        let server_builds = Arc::new(FakeBuildStrategy::new(BuildVariant::Server));
        let registry = Arc::new(FakeRegistry::default());
        let provisioner = Arc::new(FakeProvisioner::default());

        let dispatcher = JobDispatcher::new()
            .with_strategy(static_builds.clone())
            .with_strategy(server_builds.clone());

        let pipeline = Arc::new(Pipeline::new(
            PipelineDeps {
                sites: store.clone(),
                deployments: store.clone(),
                subdomains: store.clone(),
                routing: routing.clone(),
                dispatcher,
                registry: registry.clone(),
                provisioner: provisioner.clone(),
            },
            settings,
        ));

        Self {
            pipeline,
            store,
            routing,
            static_builds,
            server_builds,
            registry,
            provisioner,
        }
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}
