//! Build strategy selection and completion polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hostit_core::executor::{BuildStrategy, JobHandle, JobStatus};
use hostit_core::site::BuildVariant;
use hostit_core::{Error, Result};
use tokio::time::Instant;
use tracing::debug;

/// Maps each build variant to the strategy that builds it.
#[derive(Clone, Default)]
pub struct JobDispatcher {
    strategies: HashMap<BuildVariant, Arc<dyn BuildStrategy>>,
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under the variant it reports.
    pub fn with_strategy(mut self, strategy: Arc<dyn BuildStrategy>) -> Self {
        self.strategies.insert(strategy.variant(), strategy);
        self
    }

    pub fn strategy(&self, variant: BuildVariant) -> Result<Arc<dyn BuildStrategy>> {
        self.strategies
            .get(&variant)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no build strategy for {} sites", variant)))
    }
}

/// Poll a job until it reaches a terminal status or `max_wait` elapses.
///
/// Returns `None` when the job is still running at the deadline. Status
/// query errors are returned to the caller unchanged.
pub async fn wait_for_completion(
    strategy: &dyn BuildStrategy,
    handle: &JobHandle,
    max_wait: Duration,
    poll_interval: Duration,
) -> Result<Option<JobStatus>> {
    let deadline = Instant::now() + max_wait;
    loop {
        let status = strategy.check_status(handle).await?;
        if status.is_terminal() {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            debug!(job = %handle.execution, ?status, "Job still running at deadline");
            return Ok(None);
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
