//! In-memory implementation of every store capability
//!
//! Brute-force cosine search and Okapi BM25 over a single lock-guarded
//! state. Used by tests and local development; failure points can be
//! armed to exercise degradation paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{bm25, ChunkStore, JobStore, NoteSource, PreferencesStore, QueryLogStore};
use crate::embeddings::cosine_similarity;
use crate::errors::{AppError, Result};
use crate::models::{
    ChunkHit, ChunkInput, Feedback, FeedbackInput, IndexingJob, JobStatus, Note, NoteChunk,
    RagQueryLog,
};
use crate::settings::UserRagPreferences;

/// Operations that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    VectorSearch,
    LexicalSearch,
    Upsert,
    ListNotes,
    SaveJob,
    InsertLog,
}

#[derive(Default)]
struct State {
    notes: HashMap<Uuid, Note>,
    chunks: HashMap<Uuid, Vec<NoteChunk>>,
    jobs: HashMap<Uuid, IndexingJob>,
    /// Jobs held by a worker, with the time it last made progress
    claimed: HashMap<Uuid, DateTime<Utc>>,
    logs: HashMap<Uuid, RagQueryLog>,
    preferences: HashMap<String, UserRagPreferences>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    failures: Mutex<HashSet<FailurePoint>>,
    failing_notes: Mutex<HashSet<Uuid>>,
    vector_calls: AtomicUsize,
    lexical_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_failure(&self, point: FailurePoint) {
        if let Ok(mut f) = self.failures.lock() {
            f.insert(point);
        }
    }

    pub fn clear_failure(&self, point: FailurePoint) {
        if let Ok(mut f) = self.failures.lock() {
            f.remove(&point);
        }
    }

    /// Make `upsert_chunks` fail for one note only
    pub fn fail_upsert_for(&self, note_id: Uuid) {
        if let Ok(mut f) = self.failing_notes.lock() {
            f.insert(note_id);
        }
    }

    fn check(&self, point: FailurePoint) -> Result<()> {
        let armed = self.failures.lock().map(|f| f.contains(&point)).unwrap_or(false);
        if armed {
            return Err(AppError::store(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    pub fn vector_search_calls(&self) -> usize {
        self.vector_calls.load(Ordering::SeqCst)
    }

    pub fn lexical_search_calls(&self) -> usize {
        self.lexical_calls.load(Ordering::SeqCst)
    }

    pub async fn put_note(&self, note: Note) {
        self.state.write().await.notes.insert(note.id, note);
    }

    pub async fn delete_note_record(&self, note_id: Uuid) {
        self.state.write().await.notes.remove(&note_id);
    }

    fn hit(state: &State, chunk: &NoteChunk, score: f32) -> ChunkHit {
        let note = state.notes.get(&chunk.note_id);
        ChunkHit {
            chunk_id: chunk.id,
            note_id: chunk.note_id,
            note_title: note.map(|n| n.title.clone()).unwrap_or_default(),
            note_tags: note.map(|n| n.tags.clone()).unwrap_or_default(),
            content: chunk.content.clone(),
            chunk_index: chunk.chunk_index,
            score,
            created_at: chunk.created_at,
        }
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn upsert_chunks(
        &self,
        note_id: Uuid,
        user_id: &str,
        embedding_model: &str,
        chunks: Vec<ChunkInput>,
    ) -> Result<()> {
        self.check(FailurePoint::Upsert)?;
        let failing = self.failing_notes.lock().map(|f| f.contains(&note_id)).unwrap_or(false);
        if failing {
            return Err(AppError::store(format!("injected upsert failure for note {}", note_id)));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = chunks.iter().find(|c| !seen.insert(c.index)) {
            return Err(AppError::store(format!(
                "duplicate chunk index {} for note {}",
                dup.index, note_id
            )));
        }

        let now = Utc::now();
        let mut rows: Vec<NoteChunk> = chunks
            .into_iter()
            .map(|c| NoteChunk {
                id: Uuid::now_v7(),
                note_id,
                user_id: user_id.to_string(),
                chunk_index: c.index,
                content: c.content,
                embedding: c.embedding,
                embedding_model: embedding_model.to_string(),
                created_at: now,
            })
            .collect();
        rows.sort_by_key(|c| c.chunk_index);

        // single write lock: readers never see a mixed old/new set
        let mut state = self.state.write().await;
        if rows.is_empty() {
            state.chunks.remove(&note_id);
        } else {
            state.chunks.insert(note_id, rows);
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        user_id: &str,
        query_vector: &[f32],
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<ChunkHit>> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        self.check(FailurePoint::VectorSearch)?;
        let state = self.state.read().await;

        let mut scored: Vec<(&NoteChunk, f32)> = state
            .chunks
            .values()
            .flatten()
            .filter(|c| c.user_id == user_id)
            .map(|c| (c, cosine_similarity(&c.embedding, query_vector)))
            .filter(|(_, score)| *score >= similarity_threshold)
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(c, s)| Self::hit(&state, c, s)).collect())
    }

    async fn lexical_search(&self, user_id: &str, query: &str, top_k: usize) -> Result<Vec<ChunkHit>> {
        self.lexical_calls.fetch_add(1, Ordering::SeqCst);
        self.check(FailurePoint::LexicalSearch)?;
        let state = self.state.read().await;

        let corpus: Vec<&NoteChunk> = state
            .chunks
            .values()
            .flatten()
            .filter(|c| c.user_id == user_id)
            .collect();
        let texts: Vec<&str> = corpus.iter().map(|c| c.content.as_str()).collect();

        let mut scored: Vec<(&NoteChunk, f32)> = bm25::score_documents(query, &texts)
            .into_iter()
            .map(|(i, s)| (corpus[i], s))
            .collect();
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(c, s)| Self::hit(&state, c, s)).collect())
    }

    async fn delete_by_note_id(&self, note_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        Ok(state.chunks.remove(&note_id).map(|c| c.len() as u64).unwrap_or(0))
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut removed = 0u64;
        state.chunks.retain(|_, chunks| {
            if chunks.first().map(|c| c.user_id == user_id).unwrap_or(false) {
                removed += chunks.len() as u64;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn chunks_for_note(&self, note_id: Uuid) -> Result<Vec<NoteChunk>> {
        Ok(self
            .state
            .read()
            .await
            .chunks
            .get(&note_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl NoteSource for InMemoryStore {
    async fn list_note_ids(&self, user_id: &str) -> Result<Vec<Uuid>> {
        self.check(FailurePoint::ListNotes)?;
        let state = self.state.read().await;
        let mut ids: Vec<Uuid> = state
            .notes
            .values()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_note(&self, note_id: Uuid) -> Result<Option<Note>> {
        Ok(self.state.read().await.notes.get(&note_id).cloned())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create_job(&self, job: &IndexingJob) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(active) = state
            .jobs
            .values()
            .find(|j| j.user_id == job.user_id && j.is_active())
        {
            return Err(AppError::ActiveJobExists {
                user_id: job.user_id.clone(),
                job_id: active.id.to_string(),
            });
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn save_job(&self, job: &IndexingJob) -> Result<()> {
        self.check(FailurePoint::SaveJob)?;
        let mut state = self.state.write().await;
        let stored = state.jobs.get_mut(&job.id).ok_or_else(|| AppError::JobNotFound {
            id: job.id.to_string(),
        })?;
        if stored.is_terminal() {
            return Err(AppError::InvalidStateTransition {
                from: stored.status.to_string(),
                to: job.status.to_string(),
            });
        }
        let cancel_requested = stored.cancel_requested || job.cancel_requested;
        *stored = job.clone();
        stored.cancel_requested = cancel_requested;
        if job.status == JobStatus::Running || state.claimed.contains_key(&job.id) {
            state.claimed.insert(job.id, Utc::now());
        }
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<IndexingJob>> {
        Ok(self.state.read().await.jobs.get(&job_id).cloned())
    }

    async fn list_active_jobs(&self, user_id: &str) -> Result<Vec<IndexingJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<IndexingJob> = state
            .jobs
            .values()
            .filter(|j| j.user_id == user_id && j.is_active())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<IndexingJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<IndexingJob> = state
            .jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn claim_next_pending(&self) -> Result<Option<IndexingJob>> {
        let mut state = self.state.write().await;
        let next = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && !state.claimed.contains_key(&j.id))
            .min_by_key(|j| (j.created_at, j.id))
            .cloned();
        if let Some(job) = &next {
            state.claimed.insert(job.id, Utc::now());
        }
        Ok(next)
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let claimed = state.claimed.contains_key(&job_id);
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.is_terminal() {
            return Ok(false);
        }
        if job.status == JobStatus::Pending && !claimed {
            job.cancel()?;
        } else {
            job.cancel_requested = true;
        }
        Ok(true)
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .jobs
            .get(&job_id)
            .map(|j| j.cancel_requested || j.status == JobStatus::Cancelled)
            .unwrap_or(false))
    }

    async fn abandon_stale_jobs(&self, reason: &str, lease: Duration) -> Result<u64> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|_| AppError::validation("lease", "recovery lease is out of range"))?;
        let cutoff = Utc::now() - lease;

        let mut state = self.state.write().await;
        let State { jobs, claimed, .. } = &mut *state;
        let mut count = 0;
        for job in jobs.values_mut() {
            let last_seen = claimed
                .get(&job.id)
                .copied()
                .or(job.started_at)
                .unwrap_or(job.created_at);
            if last_seen > cutoff {
                continue;
            }
            match job.status {
                JobStatus::Running => {
                    job.fail(reason)?;
                    claimed.remove(&job.id);
                    count += 1;
                }
                JobStatus::Pending => {
                    claimed.remove(&job.id);
                }
                _ => {}
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl QueryLogStore for InMemoryStore {
    async fn insert_log(&self, log: &RagQueryLog) -> Result<()> {
        self.check(FailurePoint::InsertLog)?;
        self.state.write().await.logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn find_log(&self, log_id: Uuid) -> Result<Option<RagQueryLog>> {
        Ok(self.state.read().await.logs.get(&log_id).cloned())
    }

    async fn attach_feedback(&self, log_id: Uuid, user_id: &str, feedback: &FeedbackInput) -> Result<RagQueryLog> {
        let mut state = self.state.write().await;
        let log = state
            .logs
            .get_mut(&log_id)
            .filter(|l| l.user_id == user_id)
            .ok_or_else(|| AppError::QueryLogNotFound {
                id: log_id.to_string(),
            })?;
        if log.has_feedback() {
            return Err(AppError::FeedbackAlreadyRecorded {
                id: log_id.to_string(),
            });
        }
        log.user_feedback = Some(feedback.feedback);
        log.feedback_category = feedback.category.clone();
        log.feedback_comment = feedback.comment.clone();
        log.feedback_at = Some(Utc::now());
        Ok(log.clone())
    }

    async fn list_logs(&self, user_id: &str, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<RagQueryLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<RagQueryLog> = state
            .logs
            .values()
            .filter(|l| l.user_id == user_id && since.map(|s| l.created_at >= s).unwrap_or(true))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn low_feedback_logs(&self, user_id: &str, limit: usize) -> Result<Vec<RagQueryLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<RagQueryLog> = state
            .logs
            .values()
            .filter(|l| l.user_id == user_id && l.user_feedback == Some(Feedback::ThumbsDown))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn logs_for_clustering(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<RagQueryLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<RagQueryLog> = state
            .logs
            .values()
            .filter(|l| l.query_embedding.is_some())
            .filter(|l| user_id.map(|u| l.user_id == u).unwrap_or(true))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn assign_topic(&self, log_id: Uuid, cluster: i32, label: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let log = state.logs.get_mut(&log_id).ok_or_else(|| AppError::QueryLogNotFound {
            id: log_id.to_string(),
        })?;
        log.topic_cluster = Some(cluster);
        log.topic_label = Some(label.to_string());
        Ok(())
    }
}

#[async_trait]
impl PreferencesStore for InMemoryStore {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<UserRagPreferences>> {
        Ok(self.state.read().await.preferences.get(user_id).cloned())
    }

    async fn save_preferences(&self, user_id: &str, prefs: &UserRagPreferences) -> Result<()> {
        self.state
            .write()
            .await
            .preferences
            .insert(user_id.to_string(), prefs.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn input(index: i32, content: &str, embedding: Vec<f32>) -> ChunkInput {
        ChunkInput {
            index,
            content: content.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_all_chunks() {
        let store = InMemoryStore::new();
        let note_id = Uuid::now_v7();
        let three = vec![
            input(0, "a", vec![1.0, 0.0]),
            input(1, "b", vec![1.0, 0.0]),
            input(2, "c", vec![1.0, 0.0]),
        ];
        store.upsert_chunks(note_id, "u1", "m", three).await.unwrap();
        let two = vec![input(0, "x", vec![0.0, 1.0]), input(1, "y", vec![0.0, 1.0])];
        store.upsert_chunks(note_id, "u1", "m", two).await.unwrap();

        let chunks = store.chunks_for_note(note_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chunk_index < 2));
        assert_eq!(chunks[0].content, "x");
    }

    #[tokio::test]
    async fn test_duplicate_index_rejected_and_old_set_kept() {
        let store = InMemoryStore::new();
        let note_id = Uuid::now_v7();
        store
            .upsert_chunks(note_id, "u1", "m", vec![input(0, "a", vec![1.0])])
            .await
            .unwrap();
        let bad = vec![input(0, "x", vec![1.0]), input(0, "y", vec![1.0])];
        assert_err!(store.upsert_chunks(note_id, "u1", "m", bad).await);
        assert_eq!(store.chunks_for_note(note_id).await.unwrap()[0].content, "a");
    }

    #[tokio::test]
    async fn test_vector_search_threshold_and_user_isolation() {
        let store = InMemoryStore::new();
        let n1 = Uuid::now_v7();
        let n2 = Uuid::now_v7();
        store
            .upsert_chunks(n1, "u1", "m", vec![input(0, "close", vec![1.0, 0.1])])
            .await
            .unwrap();
        store
            .upsert_chunks(n2, "u2", "m", vec![input(0, "other user", vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = store.vector_search("u1", &[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_id, n1);

        let none = store.vector_search("u1", &[0.0, 1.0], 10, 0.5).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let store = InMemoryStore::new();
        let note_id = Uuid::now_v7();
        store
            .upsert_chunks(note_id, "u1", "m", vec![input(0, "a", vec![1.0]), input(1, "b", vec![1.0])])
            .await
            .unwrap();
        assert_eq!(store.delete_by_note_id(note_id).await.unwrap(), 2);
        assert_eq!(store.delete_by_note_id(note_id).await.unwrap(), 0);
        assert_eq!(store.delete_by_user_id("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_single_active_job_per_user() {
        let store = InMemoryStore::new();
        let mut first = IndexingJob::new("u1", "mock");
        store.create_job(&first).await.unwrap();

        let second = IndexingJob::new("u1", "mock");
        let err = store.create_job(&second).await.unwrap_err();
        assert!(matches!(err, AppError::ActiveJobExists { .. }));

        // other users are unaffected
        store.create_job(&IndexingJob::new("u2", "mock")).await.unwrap();

        first.start(0).unwrap();
        first.finish().unwrap();
        store.save_job(&first).await.unwrap();
        store.create_job(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_job_not_overwritten() {
        let store = InMemoryStore::new();
        let mut job = IndexingJob::new("u1", "mock");
        store.create_job(&job).await.unwrap();
        job.cancel().unwrap();
        store.save_job(&job).await.unwrap();

        let mut stale = store.find_job(job.id).await.unwrap().unwrap();
        stale.status = JobStatus::Running;
        assert_err!(store.save_job(&stale).await);
    }

    #[tokio::test]
    async fn test_cancel_unclaimed_pending_job_is_immediate() {
        let store = InMemoryStore::new();
        let job = IndexingJob::new("u1", "mock");
        store.create_job(&job).await.unwrap();
        assert!(store.request_cancel(job.id).await.unwrap());
        let stored = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(store.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recovery_spares_jobs_within_lease() {
        let store = InMemoryStore::new();
        let job = IndexingJob::new("u1", "mock");
        store.create_job(&job).await.unwrap();
        let mut running = store.claim_next_pending().await.unwrap().unwrap();
        running.start(2).unwrap();
        store.save_job(&running).await.unwrap();

        let lease = Duration::from_secs(600);
        assert_eq!(assert_ok!(store.abandon_stale_jobs("restart", lease).await), 0);
        assert_eq!(store.find_job(job.id).await.unwrap().unwrap().status, JobStatus::Running);

        running.record_note(1).unwrap();
        assert_ok!(store.save_job(&running).await);
    }

    #[tokio::test]
    async fn test_recovery_fails_stale_running_and_frees_stale_claims() {
        let store = InMemoryStore::new();
        let stuck = IndexingJob::new("u1", "mock");
        store.create_job(&stuck).await.unwrap();
        let mut running = store.claim_next_pending().await.unwrap().unwrap();
        running.start(2).unwrap();
        store.save_job(&running).await.unwrap();

        let queued = IndexingJob::new("u2", "mock");
        store.create_job(&queued).await.unwrap();
        assert_eq!(store.claim_next_pending().await.unwrap().unwrap().id, queued.id);
        assert!(store.claim_next_pending().await.unwrap().is_none());

        assert_eq!(store.abandon_stale_jobs("restart", Duration::ZERO).await.unwrap(), 1);
        let failed = store.find_job(stuck.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.errors, vec!["restart".to_string()]);
        assert_err!(store.save_job(&running).await);

        assert_eq!(store.claim_next_pending().await.unwrap().unwrap().id, queued.id);
    }

    #[tokio::test]
    async fn test_feedback_attached_once() {
        let store = InMemoryStore::new();
        let log = RagQueryLog::new("u1", "what did I write about rust?");
        store.insert_log(&log).await.unwrap();
        let feedback = FeedbackInput {
            feedback: Feedback::ThumbsDown,
            category: Some("irrelevant".into()),
            comment: None,
        };

        let updated = store.attach_feedback(log.id, "u1", &feedback).await.unwrap();
        assert_eq!(updated.user_feedback, Some(Feedback::ThumbsDown));

        let err = store.attach_feedback(log.id, "u1", &feedback).await.unwrap_err();
        assert!(matches!(err, AppError::FeedbackAlreadyRecorded { .. }));

        let err = store.attach_feedback(log.id, "u2", &feedback).await.unwrap_err();
        assert!(matches!(err, AppError::QueryLogNotFound { .. }));
    }
}
