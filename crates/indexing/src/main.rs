//! SecondBrain indexing worker
//!
//! Claims pending indexing jobs from the job table and runs them:
//! 1. Lists the user's notes
//! 2. Splits each note into chunks
//! 3. Embeds the chunks via the configured provider
//! 4. Replaces the note's chunks in the store and records progress

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use secondbrain_common::{
    cancel_pair,
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, PgStore},
    embeddings::create_embedder,
    metrics,
    settings::LayeredSettingsSource,
    VERSION,
};
use secondbrain_indexing::{IndexingPipeline, IndexingWorker, PipelineOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.observability);
    info!("Starting SecondBrain indexing worker v{}", VERSION);
    init_metrics(&config.observability)?;

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.ensure_schema {
        db.ensure_schema(config.embedding.dimension).await?;
    }
    let store = Arc::new(PgStore::new(db));

    // Initialize embedder
    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    let global = config.rag.clone().validated()?;
    let settings = Arc::new(LayeredSettingsSource::new(global, store.clone()));

    let pipeline = IndexingPipeline::new(store.clone(), store.clone(), store.clone(), embedder, settings)
        .with_options(PipelineOptions::from_config(&config));
    let worker = IndexingWorker::new(Arc::new(pipeline), store.clone(), config.poll_interval())
        .with_recovery_lease(config.recovery_lease());
    worker.recover().await?;

    let (handle, shutdown) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            handle.cancel();
        }
    });

    worker.run(shutdown).await?;

    info!("Indexing worker shutting down");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    if config.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}

fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("failed to install Prometheus exporter")?;
    metrics::register_metrics();
    info!(port = config.metrics_port, "Metrics exporter listening");
    Ok(())
}
