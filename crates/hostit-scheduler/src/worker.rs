//! Background reconciler that converges in-flight deployments.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;

/// Periodically re-checks deployments whose build callbacks may have been
/// lost.
pub struct Reconciler {
    id: String,
    pipeline: Arc<Pipeline>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(id: impl Into<String>, pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self {
            id: id.into(),
            pipeline,
            interval,
        }
    }

    /// Run one pass, logging instead of returning errors.
    pub async fn tick(&self) {
        match self.pipeline.reconcile_once().await {
            Ok(report) if report.finalized > 0 || report.expired > 0 => {
                info!(
                    reconciler = %self.id,
                    checked = report.checked,
                    finalized = report.finalized,
                    expired = report.expired,
                    "Reconciled deployments"
                );
            }
            Ok(report) => debug!(reconciler = %self.id, checked = report.checked, "Nothing to reconcile"),
            Err(e) => warn!(reconciler = %self.id, error = %e, "Reconcile pass failed"),
        }
    }

    /// Run the reconcile loop forever.
    pub async fn run(&self) {
        info!(reconciler = %self.id, interval = ?self.interval, "Starting reconciler");
        loop {
            self.tick().await;
            sleep(self.interval).await;
        }
    }
}
