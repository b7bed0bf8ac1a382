//! Routing table entries.
//!
//! The routing table maps a subdomain to what should answer requests for it.
//! It is written only by the pipeline's publisher and read only by the
//! request router. Entries are stored under `sha:<subdomain>` as a UTF-8
//! string: either a raw artifact pointer or `url:<endpoint>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Prefix of every routing key.
pub const ROUTING_KEY_PREFIX: &str = "sha:";

/// Prefix marking a live-backend entry.
pub const BACKEND_PREFIX: &str = "url:";

/// Storage key for a subdomain's routing entry.
pub fn routing_key(subdomain: &str) -> String {
    format!("{}{}", ROUTING_KEY_PREFIX, subdomain)
}

/// Where a subdomain's traffic goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteTarget {
    /// Serve static files stored under this artifact pointer.
    Artifact(String),
    /// Reverse-proxy to this live backend endpoint.
    Backend(String),
}

impl RouteTarget {
    /// Parse a stored entry value.
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix(BACKEND_PREFIX) {
            Some(url) => RouteTarget::Backend(url.to_string()),
            None => RouteTarget::Artifact(value.to_string()),
        }
    }

    /// Value as stored in the routing table.
    pub fn encode(&self) -> String {
        match self {
            RouteTarget::Artifact(pointer) => pointer.clone(),
            RouteTarget::Backend(url) => format!("{}{}", BACKEND_PREFIX, url),
        }
    }
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Shared subdomain → target store.
///
/// Entries never expire. Each subdomain's entry is independent, so callers
/// may write different subdomains concurrently.
#[async_trait]
pub trait RoutingTable: Send + Sync {
    async fn get(&self, subdomain: &str) -> Result<Option<RouteTarget>>;

    async fn set(&self, subdomain: &str, target: &RouteTarget) -> Result<()>;

    async fn remove(&self, subdomain: &str) -> Result<()>;
}
