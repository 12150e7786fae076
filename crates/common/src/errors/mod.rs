//! Error types for SecondBrain services
//!
//! Provides a single error taxonomy shared by the retrieval, indexing and
//! analytics crates:
//! - Provider failures (embedding and generative calls) that degrade a stage
//! - Store failures that abort a request
//! - Conflicts, validation failures and cancellation surfaced to callers
//! - Numeric error codes for machine handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Resource errors (4xxx)
    NoteNotFound,
    JobNotFound,
    QueryLogNotFound,

    // Conflict errors (5xxx)
    ActiveJobExists,
    FeedbackAlreadyRecorded,
    InvalidStateTransition,

    // Cancellation (6xxx)
    Cancelled,

    // Store errors (7xxx)
    StoreError,
    DatabaseError,
    ConnectionError,

    // Provider errors (8xxx)
    ProviderError,
    ProviderTimeout,
    ProviderNotConfigured,
    EmbeddingError,
    EmbeddingTimeout,
    RateLimited,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            // Resources (4xxx)
            ErrorCode::NoteNotFound => 4002,
            ErrorCode::JobNotFound => 4003,
            ErrorCode::QueryLogNotFound => 4004,

            // Conflicts (5xxx)
            ErrorCode::ActiveJobExists => 5002,
            ErrorCode::FeedbackAlreadyRecorded => 5003,
            ErrorCode::InvalidStateTransition => 5004,

            // Cancellation (6xxx)
            ErrorCode::Cancelled => 6001,

            // Store (7xxx)
            ErrorCode::StoreError => 7001,
            ErrorCode::DatabaseError => 7002,
            ErrorCode::ConnectionError => 7003,

            // Providers (8xxx)
            ErrorCode::ProviderError => 8001,
            ErrorCode::ProviderTimeout => 8002,
            ErrorCode::ProviderNotConfigured => 8003,
            ErrorCode::EmbeddingError => 8004,
            ErrorCode::EmbeddingTimeout => 8005,
            ErrorCode::RateLimited => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Note not found: {id}")]
    NoteNotFound { id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Query log not found: {id}")]
    QueryLogNotFound { id: String },

    // Conflict errors
    #[error("Indexing job {job_id} is already active for user {user_id}")]
    ActiveJobExists { user_id: String, job_id: String },

    #[error("Feedback already recorded for query log {id}")]
    FeedbackAlreadyRecorded { id: String },

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Cancellation
    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },

    // Store errors
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // Provider errors
    #[error("Provider {provider} error: {message}")]
    Provider { provider: String, message: String },

    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Provider not configured: {provider}")]
    ProviderNotConfigured { provider: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Rate limit exceeded for provider {provider}")]
    RateLimited { provider: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::NoteNotFound { .. } => ErrorCode::NoteNotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::QueryLogNotFound { .. } => ErrorCode::QueryLogNotFound,
            AppError::ActiveJobExists { .. } => ErrorCode::ActiveJobExists,
            AppError::FeedbackAlreadyRecorded { .. } => ErrorCode::FeedbackAlreadyRecorded,
            AppError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::Store { .. } => ErrorCode::StoreError,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Provider { .. } => ErrorCode::ProviderError,
            AppError::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            AppError::ProviderNotConfigured { .. } => ErrorCode::ProviderNotConfigured,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Provider-side failures a pipeline stage may absorb by degrading.
    pub fn is_stage_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Provider { .. }
                | AppError::ProviderTimeout { .. }
                | AppError::ProviderNotConfigured { .. }
                | AppError::EmbeddingError { .. }
                | AppError::EmbeddingTimeout { .. }
                | AppError::RateLimited { .. }
                | AppError::Serialization(_)
        )
    }

    /// Store or database failure; terminal for a retrieval request.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            AppError::Store { .. } | AppError::Database(_) | AppError::DatabaseConnection { .. }
        )
    }

    /// Conflict family (active job, repeated feedback, illegal transition)
    pub fn is_conflict(&self) -> bool {
        self.code().as_code() / 1000 == 5
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled { .. })
    }

    /// Worth retrying against the same upstream
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::ProviderTimeout { .. }
                | AppError::EmbeddingTimeout { .. }
                | AppError::RateLimited { .. }
                | AppError::DatabaseConnection { .. }
        )
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        AppError::Store {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::JobNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::JobNotFound);
        assert_eq!(err.code().as_code(), 4003);
    }

    #[test]
    fn test_provider_errors_are_recoverable() {
        let err = AppError::Provider {
            provider: "openai".into(),
            message: "bad gateway".into(),
        };
        assert!(err.is_stage_recoverable());
        assert!(!err.is_store_failure());

        let err = AppError::EmbeddingTimeout { timeout_ms: 30_000 };
        assert!(err.is_stage_recoverable());
        assert!(err.is_transient());
    }

    #[test]
    fn test_store_errors_propagate() {
        let err = AppError::store("connection reset");
        assert!(err.is_store_failure());
        assert!(!err.is_stage_recoverable());
    }

    #[test]
    fn test_conflict_family() {
        let err = AppError::ActiveJobExists {
            user_id: "u1".into(),
            job_id: "j1".into(),
        };
        assert!(err.is_conflict());
        assert!(AppError::FeedbackAlreadyRecorded { id: "l1".into() }.is_conflict());
        assert!(!AppError::Cancelled { message: "stop".into() }.is_conflict());
    }

    #[test]
    fn test_only_timeouts_and_limits_are_transient() {
        assert!(AppError::RateLimited { provider: "grok".into() }.is_transient());
        assert!(AppError::DatabaseConnection { message: "refused".into() }.is_transient());
        let err = AppError::Provider {
            provider: "openai".into(),
            message: "HTTP 400".into(),
        };
        assert!(!err.is_transient());
        assert!(!AppError::store("constraint").is_transient());

        let err: AppError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::SerializationError);
        assert!(err.is_stage_recoverable());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("top_k", "must be at least 1");
        assert_eq!(err.code(), ErrorCode::ValidationError);
        match err {
            AppError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("top_k")),
            _ => panic!("expected validation error"),
        }
    }
}
