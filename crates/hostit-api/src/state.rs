//! Application state.

use std::sync::Arc;

use hostit_scheduler::Pipeline;
use sqlx::PgPool;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Shared secret push webhooks are signed with.
    pub webhook_secret: Arc<str>,
    /// Database checked by the readiness probe, when backed by PostgreSQL.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, webhook_secret: impl Into<Arc<str>>) -> Self {
        Self {
            pipeline,
            webhook_secret: webhook_secret.into(),
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}
