//! Configuration management for SecondBrain services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::settings::RagSettings;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generative providers (HyDE, multi-query, reranking, intent)
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Global RAG defaults, overridable per user
    #[serde(default)]
    pub rag: RagSettings,

    /// Indexing worker configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Topic clustering configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply the bundled schema on startup
    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, ollama, gemini, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub providers: Vec<GenerationProviderConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationProviderConfig {
    /// Registry id, e.g. "openai" or "local-llama"
    pub id: String,

    /// Backend kind: openai, grok, ollama, gemini
    pub kind: String,

    /// Override of the kind's default base URL
    pub base_url: Option<String>,

    pub api_key: Option<String>,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Client-side rate limit
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexingConfig {
    /// Poll interval for pending jobs in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Consecutive note failures before a job is failed outright
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Minimum chunk size in tokens; smaller trailing chunks are merged
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,

    /// Seconds without progress after which another worker may reclaim a job
    #[serde(default = "default_recovery_lease")]
    pub recovery_lease_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_min_clusters")]
    pub min_clusters: usize,

    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,

    /// Maximum logged queries considered per clustering run
    #[serde(default = "default_cluster_batch_limit")]
    pub batch_limit: usize,

    #[serde(default = "default_cluster_seed")]
    pub seed: u64,

    #[serde(default = "default_cluster_iterations")]
    pub max_iterations: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_generation_model() -> String { "gpt-4o-mini".to_string() }
fn default_generation_timeout() -> u64 { 30 }
fn default_requests_per_second() -> u32 { 10 }
fn default_poll_interval() -> u64 { 5 }
fn default_max_consecutive_failures() -> u32 { 5 }
fn default_min_chunk_tokens() -> usize { 20 }
fn default_recovery_lease() -> u64 { 900 }
fn default_min_clusters() -> usize { 2 }
fn default_max_clusters() -> usize { 20 }
fn default_cluster_batch_limit() -> usize { 5000 }
fn default_cluster_seed() -> u64 { 42 }
fn default_cluster_iterations() -> usize { 50 }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "secondbrain-rag".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "postgres://localhost/secondbrain")?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__RAG__TOP_K=8
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.indexing.poll_interval_secs)
    }

    pub fn recovery_lease(&self) -> Duration {
        Duration::from_secs(self.indexing.recovery_lease_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/secondbrain".to_string(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            ensure_schema: true,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for GenerationProviderConfig {
    fn default() -> Self {
        Self {
            id: "openai".to_string(),
            kind: "openai".to_string(),
            base_url: None,
            api_key: None,
            model: default_generation_model(),
            enabled: true,
            timeout_secs: default_generation_timeout(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
            min_chunk_tokens: default_min_chunk_tokens(),
            recovery_lease_secs: default_recovery_lease(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            min_clusters: default_min_clusters(),
            max_clusters: default_max_clusters(),
            batch_limit: default_cluster_batch_limit(),
            seed: default_cluster_seed(),
            max_iterations: default_cluster_iterations(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: true,
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            rag: RagSettings::default(),
            indexing: IndexingConfig::default(),
            analytics: AnalyticsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.rag.top_k, 5);
        assert_eq!(config.indexing.max_consecutive_failures, 5);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/secondbrain");
    }

    #[test]
    fn test_partial_rag_section_fills_defaults() {
        let config = Config::builder()
            .set_override("database.url", "postgres://db/test")
            .unwrap()
            .set_override("rag.top_k", 8)
            .unwrap()
            .set_override("rag.enable_hyde", false)
            .unwrap()
            .build()
            .unwrap();
        let app: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(app.rag.top_k, 8);
        assert!(!app.rag.enable_hyde);
        assert_eq!(app.rag.rrf_k, 60.0);
        assert!(app.generation.providers.is_empty());
    }
}
