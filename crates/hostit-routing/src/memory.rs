//! In-memory routing table for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use hostit_core::routing::{RouteTarget, RoutingTable, routing_key};
use hostit_core::{Error, Result};

#[derive(Debug, Default)]
pub struct MemoryRoutingTable {
    entries: RwLock<HashMap<String, String>>,
    failing: RwLock<HashSet<String>>,
}

fn poisoned<T>(_: T) -> Error {
    Error::Routing("lock poisoned".to_string())
}

impl MemoryRoutingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write for `subdomain` fail until cleared.
    pub fn fail_writes_for(&self, subdomain: &str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(subdomain.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.write() {
            failing.clear();
        }
    }

    /// Raw stored value for a subdomain.
    pub fn raw(&self, subdomain: &str) -> Option<String> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&routing_key(subdomain)).cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, subdomain: &str) -> Result<()> {
        if self.failing.read().map_err(poisoned)?.contains(subdomain) {
            return Err(Error::Routing(format!("write to {} rejected", subdomain)));
        }
        Ok(())
    }
}

#[async_trait]
impl RoutingTable for MemoryRoutingTable {
    async fn get(&self, subdomain: &str) -> Result<Option<RouteTarget>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .get(&routing_key(subdomain))
            .map(|v| RouteTarget::parse(v)))
    }

    async fn set(&self, subdomain: &str, target: &RouteTarget) -> Result<()> {
        self.check_writable(subdomain)?;
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(routing_key(subdomain), target.encode());
        Ok(())
    }

    async fn remove(&self, subdomain: &str) -> Result<()> {
        self.check_writable(subdomain)?;
        self.entries
            .write()
            .map_err(poisoned)?
            .remove(&routing_key(subdomain));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let table = MemoryRoutingTable::new();
        let target = RouteTarget::Backend("https://app.run.example".to_string());

        table.set("app", &target).await.unwrap();
        assert_eq!(table.get("app").await.unwrap(), Some(target));
        assert_eq!(table.raw("app").as_deref(), Some("url:https://app.run.example"));

        table.remove("app").await.unwrap();
        assert_eq!(table.get("app").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let table = MemoryRoutingTable::new();
        table.fail_writes_for("broken");
        let target = RouteTarget::Artifact("abc".to_string());

        assert!(table.set("broken", &target).await.is_err());
        assert!(table.set("fine", &target).await.is_ok());
        assert_eq!(table.len(), 1);
    }
}
