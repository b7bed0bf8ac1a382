//! Routing table storage for hostit.
//!
//! The publisher writes subdomain entries through a [`RoutingTable`]; the
//! request router reads them through a [`RouteCache`].

pub mod cache;
pub mod memory;
pub mod redis;

pub use cache::RouteCache;
pub use hostit_core::routing::{RouteTarget, RoutingTable, routing_key};
pub use memory::MemoryRoutingTable;
pub use redis::RedisRoutingTable;
