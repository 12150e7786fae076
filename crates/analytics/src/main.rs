//! SecondBrain topic clusterer
//!
//! One-shot batch job: clusters logged query embeddings and writes the
//! topic back onto each log. Pass a user id to cluster a single user.
//!
//! Usage: topic-clusterer [user_id]

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use secondbrain_analytics::TopicClusterer;
use secondbrain_common::{
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, PgStore},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.observability);
    info!("Starting SecondBrain topic clusterer v{}", VERSION);

    let user_id = std::env::args().nth(1);

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store = Arc::new(PgStore::new(db));

    let clusterer = TopicClusterer::new(store, config.analytics.clone());
    let report = clusterer.run(user_id.as_deref()).await?;

    for topic in &report.topics {
        info!(cluster = topic.cluster, label = %topic.label, size = topic.size, "Topic");
    }
    info!(
        logs = report.logs_considered,
        clusters = report.topics.len(),
        "Topic clustering complete"
    );
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
