//! Redis-backed routing table.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use hostit_core::routing::{RouteTarget, RoutingTable, routing_key};
use hostit_core::{Error, Result};

/// Routing table stored as plain string keys (`sha:<subdomain>`) in Redis.
#[derive(Clone)]
pub struct RedisRoutingTable {
    pool: Pool,
}

impl RedisRoutingTable {
    /// Connect to Redis and verify the connection.
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let pool = Config::from_url(url)
            .builder()
            .map_err(|e| Error::Routing(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::Routing(e.to_string()))?;

        let table = Self { pool };
        let mut conn = table.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| Error::Routing(format!("ping failed: {}", e)))?;

        Ok(table)
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Routing(e.to_string()))
    }
}

#[async_trait]
impl RoutingTable for RedisRoutingTable {
    async fn get(&self, subdomain: &str) -> Result<Option<RouteTarget>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn
            .get(routing_key(subdomain))
            .await
            .map_err(|e| Error::Routing(e.to_string()))?;
        Ok(value.map(|v| RouteTarget::parse(&v)))
    }

    async fn set(&self, subdomain: &str, target: &RouteTarget) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(routing_key(subdomain), target.encode())
            .await
            .map_err(|e| Error::Routing(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, subdomain: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, i64>(routing_key(subdomain))
            .await
            .map_err(|e| Error::Routing(e.to_string()))?;
        Ok(())
    }
}
