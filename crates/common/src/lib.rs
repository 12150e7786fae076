//! SecondBrain RAG common library
//!
//! Shared code for the retrieval, indexing and analytics crates:
//! - Domain models and store capabilities (Postgres and in-memory)
//! - Embedding and generative provider abstractions
//! - Error types and handling
//! - Configuration and per-user RAG settings
//! - Cancellation signals
//! - Metrics and observability

pub mod cancel;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod settings;
pub mod store;

// Re-export commonly used types
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use settings::RagSettings;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
