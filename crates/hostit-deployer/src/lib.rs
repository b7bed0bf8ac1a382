//! Live backend provisioning for hostit.
//!
//! Server-variant sites run as scale-to-zero Knative services. Images come
//! from an OCI registry that server builds push to.

pub mod knative;
pub mod registry;

pub use hostit_core::deployer::{
    ImageRef, ImageRegistry, LiveBackend, LiveBackendProvisioner, LiveBackendSpec,
};
pub use knative::KnativeProvisioner;
pub use registry::OciRegistry;
