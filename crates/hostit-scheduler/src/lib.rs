//! Deployment pipeline for Hostit.
//!
//! Drives deployments from creation through dispatch, completion and
//! publishing. The reconciler re-checks in-flight deployments on an interval
//! so missed callbacks still converge.

pub mod pipeline;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use pipeline::{
    CreatedSite, Pipeline, PipelineDeps, PipelineSettings, PublishReport, PushedDeployment,
    ReconcileReport,
};
pub use worker::Reconciler;
