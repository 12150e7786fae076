//! Store capabilities consumed by the RAG core
//!
//! Two implementations ship with the crate: `db::PgStore` (Postgres with
//! pgvector and full-text search) and `memory::InMemoryStore`.

pub mod bm25;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
    ChunkHit, ChunkInput, FeedbackInput, IndexingJob, Note, NoteChunk, RagQueryLog,
};
use crate::settings::UserRagPreferences;

/// Note chunks with vector and lexical search
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace every chunk of a note atomically (delete then insert)
    async fn upsert_chunks(
        &self,
        note_id: Uuid,
        user_id: &str,
        embedding_model: &str,
        chunks: Vec<ChunkInput>,
    ) -> Result<()>;

    /// Cosine similarity search, best first; ties go to the newest chunk
    async fn vector_search(
        &self,
        user_id: &str,
        query_vector: &[f32],
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<ChunkHit>>;

    /// BM25-style relevance search, best first
    async fn lexical_search(&self, user_id: &str, query: &str, top_k: usize) -> Result<Vec<ChunkHit>>;

    /// Returns the number of chunks removed; 0 when there was nothing to delete
    async fn delete_by_note_id(&self, note_id: Uuid) -> Result<u64>;

    async fn delete_by_user_id(&self, user_id: &str) -> Result<u64>;

    /// Chunks of one note ordered by index
    async fn chunks_for_note(&self, note_id: Uuid) -> Result<Vec<NoteChunk>>;
}

/// Read access to the user's notes
#[async_trait]
pub trait NoteSource: Send + Sync {
    async fn list_note_ids(&self, user_id: &str) -> Result<Vec<Uuid>>;

    async fn get_note(&self, note_id: Uuid) -> Result<Option<Note>>;
}

/// Indexing job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a Pending job; `ActiveJobExists` if the user already has one active
    async fn create_job(&self, job: &IndexingJob) -> Result<()>;

    /// Persist progress and status; terminal rows are never overwritten
    async fn save_job(&self, job: &IndexingJob) -> Result<()>;

    async fn find_job(&self, job_id: Uuid) -> Result<Option<IndexingJob>>;

    async fn list_active_jobs(&self, user_id: &str) -> Result<Vec<IndexingJob>>;

    async fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<IndexingJob>>;

    /// Atomically hand the oldest unclaimed Pending job to one worker
    async fn claim_next_pending(&self) -> Result<Option<IndexingJob>>;

    /// Returns false when the job is missing or already terminal
    async fn request_cancel(&self, job_id: Uuid) -> Result<bool>;

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool>;

    /// Recover jobs whose worker has shown no progress for `lease`
    ///
    /// Stale Running jobs are failed with `reason` and stale claims on
    /// Pending jobs are released. Jobs touched within the lease belong to a
    /// live worker and are left alone. Returns how many jobs were failed.
    async fn abandon_stale_jobs(&self, reason: &str, lease: Duration) -> Result<u64>;
}

/// Retrieval analytics records
#[async_trait]
pub trait QueryLogStore: Send + Sync {
    async fn insert_log(&self, log: &RagQueryLog) -> Result<()>;

    async fn find_log(&self, log_id: Uuid) -> Result<Option<RagQueryLog>>;

    /// Attach feedback once; a second attachment is `FeedbackAlreadyRecorded`
    async fn attach_feedback(&self, log_id: Uuid, user_id: &str, feedback: &FeedbackInput) -> Result<RagQueryLog>;

    /// Newest first, optionally bounded below by `since`
    async fn list_logs(&self, user_id: &str, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<RagQueryLog>>;

    /// Thumbs-down logs, newest first
    async fn low_feedback_logs(&self, user_id: &str, limit: usize) -> Result<Vec<RagQueryLog>>;

    /// Logs carrying a query embedding, across users when `user_id` is None
    async fn logs_for_clustering(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<RagQueryLog>>;

    async fn assign_topic(&self, log_id: Uuid, cluster: i32, label: &str) -> Result<()>;
}

/// Per-user RAG overrides
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<UserRagPreferences>>;

    async fn save_preferences(&self, user_id: &str, prefs: &UserRagPreferences) -> Result<()>;
}
