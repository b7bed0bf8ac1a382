//! Repository traits and implementations.

pub mod deployment;
pub mod site;
pub mod subdomain;

pub use deployment::{DeploymentRepo, PgDeploymentRepo};
pub use site::{PgSiteRepo, SiteRepo};
pub use subdomain::{PgSubdomainRepo, SubdomainRepo};
