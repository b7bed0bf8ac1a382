//! Hostit control-plane server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use hostit_api::{AppState, routes};
use hostit_config::{SystemConfig, load_config};
use hostit_db::{PgDeploymentRepo, PgSiteRepo, PgSubdomainRepo, create_pool, run_migrations};
use hostit_deployer::{KnativeProvisioner, OciRegistry};
use hostit_executor::{
    ImageTarget, JobDispatcher, KubeJobService, ServerBuildStrategy, StaticBuildStrategy,
};
use hostit_routing::RedisRoutingTable;
use hostit_scheduler::{Pipeline, PipelineDeps, PipelineSettings, Reconciler};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Hostit control-plane server.
#[derive(Parser, Debug)]
#[command(name = "hostit-server")]
#[command(about = "Receive push webhooks and build callbacks, and manage sites")]
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

async fn build_pipeline(config: &SystemConfig, pool: sqlx::PgPool) -> anyhow::Result<Pipeline> {
    let routing = RedisRoutingTable::connect(&config.redis.url, config.redis.pool_size).await?;
    info!("Routing table connected");

    let client = kube::Client::try_default().await?;
    let jobs = Arc::new(KubeJobService::with_client(
        client.clone(),
        &config.jobs.namespace,
    ));
    let target = ImageTarget {
        registry: config.registry.image_host(),
        repository_prefix: config.registry.repository_prefix.clone(),
        token: config.registry.token.clone(),
    };
    let dispatcher = JobDispatcher::new()
        .with_strategy(Arc::new(StaticBuildStrategy::new(
            jobs.clone(),
            &config.jobs.static_template,
        )))
        .with_strategy(Arc::new(ServerBuildStrategy::new(
            jobs,
            &config.jobs.builder_image,
            target,
            config.jobs.max_run_duration,
        )));

    let deps = PipelineDeps {
        sites: Arc::new(PgSiteRepo::new(pool.clone())),
        deployments: Arc::new(PgDeploymentRepo::new(pool.clone())),
        subdomains: Arc::new(PgSubdomainRepo::new(pool)),
        routing: Arc::new(routing),
        dispatcher,
        registry: Arc::new(OciRegistry::new(
            &config.registry.url,
            config.registry.token.clone(),
        )),
        provisioner: Arc::new(KnativeProvisioner::new(
            client,
            &config.backends.namespace,
            config.backends.container_port,
            config.backends.ready_timeout,
        )),
    };
    let settings = PipelineSettings {
        callback_base_url: config.callback.base_url.clone(),
        completion_wait: config.jobs.completion_wait,
        poll_interval: config.jobs.poll_interval,
        image_registry: config.registry.image_host(),
        image_prefix: config.registry.repository_prefix.clone(),
        queued_timeout: config.reconcile.queued_timeout,
    };
    Ok(Pipeline::new(deps, settings))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(cli.log_json || config.log.json);

    let webhook_secret = config.require_webhook_secret()?.to_string();

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let pipeline = Arc::new(build_pipeline(&config, pool.clone()).await?);

    let reconciler = Reconciler::new("reconciler-0", pipeline.clone(), config.reconcile.interval);
    tokio::spawn(async move { reconciler.run().await });

    let state = AppState::new(pipeline, webhook_secret).with_pool(pool);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.listen);
    let listener = TcpListener::bind(config.server.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
