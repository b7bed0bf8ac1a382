//! Short-lived lookup cache in front of the routing table.
//!
//! Hits and misses are both cached for `ttl`, so a freshly published entry
//! becomes visible within one TTL. Store errors are never cached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hostit_core::Result;
use hostit_core::routing::{RouteTarget, RoutingTable};

#[derive(Debug, Clone)]
struct CacheEntry {
    target: Option<RouteTarget>,
    cached_at: Instant,
}

pub struct RouteCache {
    table: Arc<dyn RoutingTable>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl RouteCache {
    pub fn new(table: Arc<dyn RoutingTable>, ttl: Duration) -> Self {
        Self {
            table,
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Resolve a subdomain, consulting the table only when the cached value
    /// is missing or stale.
    pub async fn resolve(&self, subdomain: &str) -> Result<Option<RouteTarget>> {
        if let Some(target) = self.cached(subdomain) {
            return Ok(target);
        }

        let target = self.table.get(subdomain).await?;
        tracing::debug!(subdomain, found = target.is_some(), "routing table lookup");
        self.entries.insert(
            subdomain.to_string(),
            CacheEntry {
                target: target.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(target)
    }

    #[allow(clippy::option_option)]
    fn cached(&self, subdomain: &str) -> Option<Option<RouteTarget>> {
        let entry = self.entries.get(subdomain)?;
        if entry.cached_at.elapsed() < self.ttl {
            Some(entry.target.clone())
        } else {
            None
        }
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.cached_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
