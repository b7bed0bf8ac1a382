//! Core domain types and traits for the hostit build-and-publish pipeline.
//!
//! This crate contains:
//! - Resource identifiers and the shared error type
//! - Site, subdomain binding and deployment records
//! - The deployment lifecycle transition rules
//! - Build strategy (job service) and live-backend traits
//! - Routing table entries and the routing table trait
//! - Source-control push event parsing

pub mod deployer;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod id;
pub mod repository;
pub mod routing;
pub mod site;

pub use error::{Error, Result};
pub use id::ResourceId;
