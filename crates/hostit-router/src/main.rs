//! Hostit edge router.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hostit_config::load_config;
use hostit_router::{RouterState, proxy, router};
use hostit_routing::{RedisRoutingTable, RouteCache};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Hostit edge router.
#[derive(Parser, Debug)]
#[command(name = "hostit-router")]
#[command(about = "Serve hostit sites by subdomain")]
#[command(version)]
struct Cli {
    /// Path to the hostit.kdl configuration file.
    #[arg(short, long, value_name = "FILE", env = "HOSTIT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(cli.log_json || config.log.json);

    let table = RedisRoutingTable::connect(&config.redis.url, config.redis.pool_size).await?;
    info!("Routing table connected");

    let cache = Arc::new(RouteCache::new(Arc::new(table), config.router.cache_ttl));
    let purge = cache.clone();
    let purge_every = config.router.cache_ttl.max(std::time::Duration::from_secs(1)) * 10;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            purge.purge_expired();
        }
    });

    let state = RouterState {
        cache,
        artifact_root: Arc::new(config.router.artifact_root.clone()),
        client: proxy::upstream_client(config.router.proxy_timeout)?,
        max_body_bytes: config.router.max_body_bytes,
    };
    let app = router(state).layer(TraceLayer::new_for_http());

    info!(
        artifact_root = %config.router.artifact_root.display(),
        "Starting router on {}",
        config.router.listen
    );
    let listener = TcpListener::bind(config.router.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
