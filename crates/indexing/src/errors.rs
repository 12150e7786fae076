//! Indexing error types

use secondbrain_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Embedding returned {got} vectors for {expected} chunks")]
    EmbeddingCountMismatch { expected: usize, got: usize },

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error(transparent)]
    App(#[from] AppError),
}

impl IndexingError {
    /// Second active job, repeated transition on a terminal job
    pub fn is_conflict(&self) -> bool {
        matches!(self, IndexingError::App(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IndexingError::App(AppError::JobNotFound { .. } | AppError::NoteNotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, IndexingError>;
