//! Indexing pipeline
//!
//! Drives an `IndexingJob` through its state machine:
//! `Pending -> Running -> {Completed | PartiallyCompleted | Failed | Cancelled}`.
//!
//! Each note is chunked, embedded and written with the store's
//! replace-all-for-note upsert. A failing note is recorded on the job and
//! the run moves on; only a run of consecutive failures or a job store
//! failure aborts it. Cancellation is honored between notes, never mid-note.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use secondbrain_common::cancel::CancelSignal;
use secondbrain_common::config::AppConfig;
use secondbrain_common::embeddings::Embedder;
use secondbrain_common::errors::AppError;
use secondbrain_common::metrics;
use secondbrain_common::models::{ChunkInput, IndexingJob, Note};
use secondbrain_common::settings::SettingsSource;
use secondbrain_common::store::{ChunkStore, JobStore, NoteSource};

use crate::chunker::{chunk_text, ChunkingConfig, TextChunk};
use crate::errors::{IndexingError, Result};

/// Tunables that come from process configuration rather than user settings
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Consecutive note failures before the job is failed outright
    pub max_consecutive_failures: u32,
    pub min_chunk_tokens: usize,
    /// Chunks per embedding request
    pub batch_size: usize,
    /// Bound on one embedding request, retries included
    pub embed_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            min_chunk_tokens: 20,
            batch_size: 64,
            embed_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let attempts = u64::from(config.embedding.max_retries) + 1;
        Self {
            max_consecutive_failures: config.indexing.max_consecutive_failures.max(1),
            min_chunk_tokens: config.indexing.min_chunk_tokens,
            batch_size: config.embedding.batch_size.max(1),
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs * attempts),
        }
    }
}

pub struct IndexingPipeline {
    notes: Arc<dyn NoteSource>,
    chunks: Arc<dyn ChunkStore>,
    jobs: Arc<dyn JobStore>,
    embedder: Arc<dyn Embedder>,
    settings: Arc<dyn SettingsSource>,
    options: PipelineOptions,
}

impl IndexingPipeline {
    pub fn new(
        notes: Arc<dyn NoteSource>,
        chunks: Arc<dyn ChunkStore>,
        jobs: Arc<dyn JobStore>,
        embedder: Arc<dyn Embedder>,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        Self {
            notes,
            chunks,
            jobs,
            embedder,
            settings,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Create a Pending reindex job; a conflict if the user already has an active one
    #[instrument(skip(self))]
    pub async fn start_reindex(&self, user_id: &str) -> Result<IndexingJob> {
        let job = IndexingJob::new(user_id, self.embedder.model_name());
        self.jobs.create_job(&job).await?;
        info!(job_id = %job.id, "Indexing job created");
        Ok(job)
    }

    /// Run a Pending job to a terminal state
    ///
    /// Returns the terminal job. An error means the job record itself could
    /// not be updated.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, user_id = %job.user_id))]
    pub async fn run_job(&self, mut job: IndexingJob, cancel: &CancelSignal) -> Result<IndexingJob> {
        let started = Instant::now();

        if self.cancel_requested(&job, cancel).await {
            job.cancel()?;
            self.persist(&mut job).await?;
            return Ok(self.finished(job, started));
        }

        let prepared = async {
            let settings = self.settings.effective_rag_settings(&job.user_id).await?;
            let note_ids = self.notes.list_note_ids(&job.user_id).await?;
            Ok::<_, AppError>((settings, note_ids))
        }
        .await;

        let (settings, note_ids) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error = %e, "Indexing job could not be prepared");
                job.fail(format!("failed to prepare job: {}", e))?;
                self.persist(&mut job).await?;
                return Ok(self.finished(job, started));
            }
        };

        let chunking = ChunkingConfig::from_settings(&settings, self.options.min_chunk_tokens);
        job.start(note_ids.len() as u32)?;
        self.persist(&mut job).await?;
        info!(total_notes = note_ids.len(), "Indexing job started");

        let mut consecutive_failures = 0u32;
        for note_id in note_ids {
            if self.cancel_requested(&job, cancel).await {
                info!(processed = job.processed_notes, "Indexing job cancelled");
                job.cancel()?;
                self.persist(&mut job).await?;
                return Ok(self.finished(job, started));
            }

            let note_started = Instant::now();
            match self.process_note(&mut job, note_id, &chunking).await {
                Ok(chunks) => {
                    consecutive_failures = 0;
                    job.record_note(chunks)?;
                    metrics::record_note_indexed(note_started.elapsed(), chunks as usize, true);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(note_id = %note_id, error = %e, failures = consecutive_failures, "Note indexing failed");
                    job.record_note_error(note_id, &e)?;
                    metrics::record_note_indexed(note_started.elapsed(), 0, false);

                    if consecutive_failures >= self.options.max_consecutive_failures {
                        error!(failures = consecutive_failures, "Too many consecutive failures, aborting job");
                        job.fail(format!(
                            "aborted after {} consecutive note failures",
                            consecutive_failures
                        ))?;
                        self.persist(&mut job).await?;
                        return Ok(self.finished(job, started));
                    }
                }
            }

            self.persist(&mut job).await?;
        }

        job.finish()?;
        self.persist(&mut job).await?;
        Ok(self.finished(job, started))
    }

    /// Request cancellation; `false` once the job is already terminal
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool> {
        if self.jobs.find_job(job_id).await?.is_none() {
            return Err(AppError::JobNotFound { id: job_id.to_string() }.into());
        }
        let accepted = self.jobs.request_cancel(job_id).await?;
        info!(accepted, "Cancellation requested");
        Ok(accepted)
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<IndexingJob> {
        self.jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: job_id.to_string() }.into())
    }

    pub async fn active_jobs(&self, user_id: &str) -> Result<Vec<IndexingJob>> {
        Ok(self.jobs.list_active_jobs(user_id).await?)
    }

    /// Most recent jobs first
    pub async fn recent_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<IndexingJob>> {
        Ok(self.jobs.list_jobs(user_id, limit).await?)
    }

    // =========================================================================
    // Single notes
    // =========================================================================

    /// Re-chunk and re-embed one note, replacing its previous chunks
    #[instrument(skip(self, note), fields(note_id = %note.id, user_id = %note.user_id))]
    pub async fn index_note(&self, note: &Note) -> Result<u32> {
        let started = Instant::now();
        let result: Result<u32> = async {
            let settings = self.settings.effective_rag_settings(&note.user_id).await?;
            let chunking = ChunkingConfig::from_settings(&settings, self.options.min_chunk_tokens);
            let pieces = chunk_text(&note.indexable_text(), &chunking)?;
            self.embed_and_store(note, pieces).await
        }
        .await;

        match &result {
            Ok(chunks) => {
                info!(chunks, elapsed_ms = started.elapsed().as_millis() as u64, "Note indexed");
                metrics::record_note_indexed(started.elapsed(), *chunks as usize, true);
            }
            Err(e) => {
                warn!(error = %e, "Note indexing failed");
                metrics::record_note_indexed(started.elapsed(), 0, false);
            }
        }
        result
    }

    pub async fn index_note_by_id(&self, note_id: Uuid) -> Result<u32> {
        let note = self
            .notes
            .get_note(note_id)
            .await?
            .ok_or_else(|| AppError::NoteNotFound { id: note_id.to_string() })?;
        self.index_note(&note).await
    }

    /// Drop a note's chunks; 0 when it had none
    #[instrument(skip(self))]
    pub async fn remove_note(&self, note_id: Uuid) -> Result<u64> {
        let removed = self.chunks.delete_by_note_id(note_id).await?;
        debug!(removed, "Note chunks removed");
        Ok(removed)
    }

    /// Drop every chunk a user owns
    #[instrument(skip(self))]
    pub async fn purge_user(&self, user_id: &str) -> Result<u64> {
        let removed = self.chunks.delete_by_user_id(user_id).await?;
        info!(removed, "User chunks purged");
        Ok(removed)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn process_note(&self, job: &mut IndexingJob, note_id: Uuid, chunking: &ChunkingConfig) -> Result<u32> {
        // deleted since the job listed it
        let Some(note) = self.notes.get_note(note_id).await? else {
            debug!(note_id = %note_id, "Note vanished before indexing");
            return Ok(0);
        };
        let pieces = chunk_text(&note.indexable_text(), chunking)?;
        job.add_planned_chunks(pieces.len() as u32)?;
        self.embed_and_store(&note, pieces).await
    }

    async fn embed_and_store(&self, note: &Note, pieces: Vec<TextChunk>) -> Result<u32> {
        let texts: Vec<String> = pieces.iter().map(|c| c.content.clone()).collect();

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.batch_size.max(1)) {
            embeddings.extend(self.embed(batch).await?);
        }

        let inputs: Vec<ChunkInput> = pieces
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkInput {
                index: chunk.index,
                content: chunk.content,
                embedding,
            })
            .collect();
        let count = inputs.len() as u32;

        self.chunks
            .upsert_chunks(note.id, &note.user_id, self.embedder.model_name(), inputs)
            .await?;
        Ok(count)
    }

    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let timeout = self.options.embed_timeout;
        let vectors = tokio::time::timeout(timeout, self.embedder.embed_batch(batch))
            .await
            .map_err(|_| AppError::EmbeddingTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;

        if vectors.len() != batch.len() {
            return Err(IndexingError::EmbeddingCountMismatch {
                expected: batch.len(),
                got: vectors.len(),
            });
        }
        let dimension = self.embedder.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexingError::DimensionMismatch {
                expected: dimension,
                got: bad.len(),
            });
        }
        Ok(vectors)
    }

    async fn cancel_requested(&self, job: &IndexingJob, cancel: &CancelSignal) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        match self.jobs.is_cancel_requested(job.id).await {
            Ok(requested) => requested,
            Err(e) => {
                warn!(error = %e, "Could not read cancellation flag");
                false
            }
        }
    }

    /// Save progress; when that fails, try once more to leave the job Failed
    async fn persist(&self, job: &mut IndexingJob) -> Result<()> {
        let Err(e) = self.jobs.save_job(job).await else {
            return Ok(());
        };
        error!(error = %e, status = %job.status, "Failed to save indexing job");
        if !job.is_terminal() && job.fail(format!("failed to save progress: {}", e)).is_ok() {
            if let Err(retry) = self.jobs.save_job(job).await {
                warn!(error = %retry, "Could not mark job failed");
            }
        }
        Err(e.into())
    }

    fn finished(&self, job: IndexingJob, started: Instant) -> IndexingJob {
        metrics::record_job_finished(job.status.as_str());
        info!(
            status = %job.status,
            processed_notes = job.processed_notes,
            processed_chunks = job.processed_chunks,
            errors = job.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Indexing job finished"
        );
        job
    }
}
