//! Build job execution for hostit.
//!
//! Builds run as Kubernetes Jobs:
//! - static sites from a pre-provisioned job template
//! - server sites from a generated image build script

pub mod dispatcher;
pub mod env;
pub mod kubernetes;
pub mod script;
pub mod server_build;
pub mod static_build;

pub use dispatcher::{JobDispatcher, wait_for_completion};
pub use hostit_core::executor::{BuildRequest, BuildStrategy, JobHandle, JobStatus};
pub use kubernetes::KubeJobService;
pub use server_build::{ImageTarget, ServerBuildStrategy};
pub use static_build::StaticBuildStrategy;
