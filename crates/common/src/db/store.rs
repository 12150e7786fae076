//! Postgres implementation of the store traits
//!
//! Entity queries go through SeaORM; pgvector similarity and full-text
//! ranking use raw statements.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QueryResult, QuerySelect, SqlErr, Statement,
    TransactionTrait,
};
use uuid::Uuid;

use super::entities::note_chunk::{parse_pgvector, to_pgvector};
use super::entities::*;
use super::DbPool;
use crate::errors::{AppError, Result};
use crate::models::{
    ChunkHit, ChunkInput, Feedback, FeedbackInput, IndexingJob, JobStatus, Note, NoteChunk,
    RagQueryLog,
};
use crate::settings::UserRagPreferences;
use crate::store::{bm25, ChunkStore, JobStore, NoteSource, PreferencesStore, QueryLogStore};

const ACTIVE_STATUSES: [&str; 2] = ["pending", "running"];

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

fn store_err(e: DbErr) -> AppError {
    AppError::store(e.to_string())
}

/// OR of the query's terms in `to_tsquery` syntax; `None` without terms
///
/// Any matching term qualifies a chunk and `ts_rank_cd` orders them, the
/// same way BM25 treats the in-memory corpus.
fn any_term_tsquery(query: &str) -> Option<String> {
    let mut terms = bm25::tokenize(query);
    terms.sort();
    terms.dedup();
    (!terms.is_empty()).then(|| terms.join(" | "))
}

fn hit_from_row(row: &QueryResult) -> Option<ChunkHit> {
    let tags: serde_json::Value = row.try_get_by_index(3).ok()?;
    Some(ChunkHit {
        chunk_id: row.try_get_by_index::<Uuid>(0).ok()?,
        note_id: row.try_get_by_index::<Uuid>(1).ok()?,
        note_title: row.try_get_by_index::<String>(2).ok()?,
        note_tags: serde_json::from_value(tags).unwrap_or_default(),
        content: row.try_get_by_index::<String>(4).ok()?,
        chunk_index: row.try_get_by_index::<i32>(5).ok()?,
        created_at: row.try_get_by_index::<DateTime<Utc>>(6).ok()?,
        score: row.try_get_by_index::<f64>(7).ok()? as f32,
    })
}

// ============================================================================
// Chunk Operations
// ============================================================================

#[async_trait]
impl ChunkStore for PgStore {
    async fn upsert_chunks(
        &self,
        note_id: Uuid,
        user_id: &str,
        embedding_model: &str,
        chunks: Vec<ChunkInput>,
    ) -> Result<()> {
        let txn = self.write_conn().begin().await.map_err(store_err)?;

        NoteChunkEntity::delete_many()
            .filter(NoteChunkColumn::NoteId.eq(note_id))
            .exec(&txn)
            .await
            .map_err(store_err)?;

        for chunk in chunks {
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO note_chunks (
                    id, note_id, user_id, chunk_index, content, embedding,
                    embedding_model, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6::vector, $7, NOW())
                "#,
                vec![
                    Uuid::now_v7().into(),
                    note_id.into(),
                    user_id.into(),
                    chunk.index.into(),
                    chunk.content.into(),
                    to_pgvector(&chunk.embedding).into(),
                    embedding_model.into(),
                ],
            );
            // dropping the transaction on error rolls it back
            txn.execute(stmt).await.map_err(store_err)?;
        }

        txn.commit().await.map_err(store_err)
    }

    async fn vector_search(
        &self,
        user_id: &str,
        query_vector: &[f32],
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<ChunkHit>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                c.id,
                c.note_id,
                COALESCE(n.title, '') AS note_title,
                COALESCE(n.tags, '[]'::jsonb) AS note_tags,
                c.content,
                c.chunk_index,
                c.created_at,
                (1 - (c.embedding <=> $1::vector))::float8 AS score
            FROM note_chunks c
            LEFT JOIN notes n ON n.id = c.note_id
            WHERE c.user_id = $2
              AND 1 - (c.embedding <=> $1::vector) >= $3
            ORDER BY c.embedding <=> $1::vector, c.created_at DESC, c.id DESC
            LIMIT $4
            "#,
            vec![
                to_pgvector(query_vector).into(),
                user_id.into(),
                (similarity_threshold as f64).into(),
                (top_k as i64).into(),
            ],
        );

        let rows = self.read_conn().query_all(stmt).await.map_err(store_err)?;
        Ok(rows.iter().filter_map(hit_from_row).collect())
    }

    async fn lexical_search(&self, user_id: &str, query: &str, top_k: usize) -> Result<Vec<ChunkHit>> {
        let Some(tsquery) = any_term_tsquery(query) else {
            return Ok(Vec::new());
        };
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT
                c.id,
                c.note_id,
                COALESCE(n.title, '') AS note_title,
                COALESCE(n.tags, '[]'::jsonb) AS note_tags,
                c.content,
                c.chunk_index,
                c.created_at,
                ts_rank_cd(c.search_vector, to_tsquery('english', $1))::float8 AS score
            FROM note_chunks c
            LEFT JOIN notes n ON n.id = c.note_id
            WHERE c.user_id = $2
              AND c.search_vector @@ to_tsquery('english', $1)
            ORDER BY score DESC, c.id ASC
            LIMIT $3
            "#,
            vec![tsquery.into(), user_id.into(), (top_k as i64).into()],
        );

        let rows = self.read_conn().query_all(stmt).await.map_err(store_err)?;
        Ok(rows.iter().filter_map(hit_from_row).collect())
    }

    async fn delete_by_note_id(&self, note_id: Uuid) -> Result<u64> {
        let result = NoteChunkEntity::delete_many()
            .filter(NoteChunkColumn::NoteId.eq(note_id))
            .exec(self.write_conn())
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected)
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<u64> {
        let result = NoteChunkEntity::delete_many()
            .filter(NoteChunkColumn::UserId.eq(user_id))
            .exec(self.write_conn())
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected)
    }

    async fn chunks_for_note(&self, note_id: Uuid) -> Result<Vec<NoteChunk>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT id, note_id, user_id, chunk_index, content, embedding::text,
                   embedding_model, created_at
            FROM note_chunks
            WHERE note_id = $1
            ORDER BY chunk_index
            "#,
            vec![note_id.into()],
        );

        let rows = self.read_conn().query_all(stmt).await.map_err(store_err)?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let embedding: String = row.try_get_by_index(5).ok()?;
                Some(NoteChunk {
                    id: row.try_get_by_index(0).ok()?,
                    note_id: row.try_get_by_index(1).ok()?,
                    user_id: row.try_get_by_index(2).ok()?,
                    chunk_index: row.try_get_by_index(3).ok()?,
                    content: row.try_get_by_index(4).ok()?,
                    embedding: parse_pgvector(&embedding)?,
                    embedding_model: row.try_get_by_index(6).ok()?,
                    created_at: row.try_get_by_index(7).ok()?,
                })
            })
            .collect())
    }
}

// ============================================================================
// Note Operations
// ============================================================================

#[async_trait]
impl NoteSource for PgStore {
    async fn list_note_ids(&self, user_id: &str) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = NoteEntity::find()
            .select_only()
            .column(NoteColumn::Id)
            .filter(NoteColumn::UserId.eq(user_id))
            .filter(NoteColumn::IsDeleted.eq(false))
            .order_by_asc(NoteColumn::Id)
            .into_tuple()
            .all(self.read_conn())
            .await
            .map_err(store_err)?;
        Ok(ids)
    }

    async fn get_note(&self, note_id: Uuid) -> Result<Option<Note>> {
        let row = NoteEntity::find_by_id(note_id)
            .filter(NoteColumn::IsDeleted.eq(false))
            .one(self.read_conn())
            .await
            .map_err(store_err)?;
        Ok(row.map(Note::from))
    }
}

// ============================================================================
// Job Operations
// ============================================================================

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(&self, job: &IndexingJob) -> Result<()> {
        let active = IndexingJobActiveModel::from(job);
        match active.insert(self.write_conn()).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                let existing = self.list_active_jobs(&job.user_id).await?;
                Err(AppError::ActiveJobExists {
                    user_id: job.user_id.clone(),
                    job_id: existing
                        .first()
                        .map(|j| j.id.to_string())
                        .unwrap_or_default(),
                })
            }
            Err(e) => Err(store_err(e)),
        }
    }

    async fn save_job(&self, job: &IndexingJob) -> Result<()> {
        let result = IndexingJobEntity::update_many()
            .col_expr(IndexingJobColumn::Status, Expr::value(job.status.as_str()))
            .col_expr(IndexingJobColumn::TotalNotes, Expr::value(job.total_notes as i32))
            .col_expr(IndexingJobColumn::ProcessedNotes, Expr::value(job.processed_notes as i32))
            .col_expr(IndexingJobColumn::TotalChunks, Expr::value(job.total_chunks as i32))
            .col_expr(IndexingJobColumn::ProcessedChunks, Expr::value(job.processed_chunks as i32))
            .col_expr(IndexingJobColumn::Errors, Expr::value(serde_json::json!(job.errors)))
            .col_expr(
                IndexingJobColumn::StartedAt,
                Expr::value(job.started_at.map(sea_orm::prelude::DateTimeWithTimeZone::from)),
            )
            .col_expr(
                IndexingJobColumn::CompletedAt,
                Expr::value(job.completed_at.map(sea_orm::prelude::DateTimeWithTimeZone::from)),
            )
            .col_expr(
                IndexingJobColumn::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(IndexingJobColumn::Id.eq(job.id))
            .filter(IndexingJobColumn::Status.is_in(ACTIVE_STATUSES))
            .exec(self.write_conn())
            .await
            .map_err(store_err)?;

        if result.rows_affected == 0 {
            return match self.find_job(job.id).await? {
                None => Err(AppError::JobNotFound { id: job.id.to_string() }),
                Some(stored) => Err(AppError::InvalidStateTransition {
                    from: stored.status.to_string(),
                    to: job.status.to_string(),
                }),
            };
        }
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<IndexingJob>> {
        IndexingJobEntity::find_by_id(job_id)
            .one(self.read_conn())
            .await
            .map_err(store_err)?
            .map(IndexingJob::try_from)
            .transpose()
    }

    async fn list_active_jobs(&self, user_id: &str) -> Result<Vec<IndexingJob>> {
        IndexingJobEntity::find()
            .filter(IndexingJobColumn::UserId.eq(user_id))
            .filter(IndexingJobColumn::Status.is_in(ACTIVE_STATUSES))
            .order_by_asc(IndexingJobColumn::CreatedAt)
            .all(self.write_conn())
            .await
            .map_err(store_err)?
            .into_iter()
            .map(IndexingJob::try_from)
            .collect()
    }

    async fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<IndexingJob>> {
        IndexingJobEntity::find()
            .filter(IndexingJobColumn::UserId.eq(user_id))
            .order_by_desc(IndexingJobColumn::CreatedAt)
            .order_by_desc(IndexingJobColumn::Id)
            .limit(limit as u64)
            .all(self.read_conn())
            .await
            .map_err(store_err)?
            .into_iter()
            .map(IndexingJob::try_from)
            .collect()
    }

    async fn claim_next_pending(&self) -> Result<Option<IndexingJob>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            r#"
            UPDATE indexing_jobs SET claimed_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM indexing_jobs
                WHERE status = 'pending' AND claimed_at IS NULL
                ORDER BY created_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id
            "#,
        );
        let row = self.write_conn().query_one(stmt).await.map_err(store_err)?;
        match row.and_then(|r| r.try_get_by_index::<Uuid>(0).ok()) {
            Some(id) => self.find_job(id).await,
            None => Ok(None),
        }
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<bool> {
        // unclaimed pending jobs are cancelled outright; others get the flag
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE indexing_jobs SET
                status = CASE WHEN status = 'pending' AND claimed_at IS NULL
                              THEN 'cancelled' ELSE status END,
                completed_at = CASE WHEN status = 'pending' AND claimed_at IS NULL
                                    THEN NOW() ELSE completed_at END,
                cancel_requested = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
            vec![job_id.into()],
        );
        let result = self.write_conn().execute(stmt).await.map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool> {
        let job = IndexingJobEntity::find_by_id(job_id)
            .one(self.write_conn())
            .await
            .map_err(store_err)?;
        Ok(job
            .map(|j| j.cancel_requested || j.status == JobStatus::Cancelled.as_str())
            .unwrap_or(false))
    }

    async fn abandon_stale_jobs(&self, reason: &str, lease: Duration) -> Result<u64> {
        // updated_at is bumped by every claim and progress save
        let lease_secs = lease.as_secs_f64();
        let txn = self.write_conn().begin().await.map_err(store_err)?;
        let failed = txn
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                UPDATE indexing_jobs SET
                    status = 'failed',
                    errors = errors || jsonb_build_array($1::text),
                    completed_at = NOW(),
                    updated_at = NOW()
                WHERE status = 'running'
                  AND updated_at <= NOW() - make_interval(secs => $2)
                "#,
                vec![reason.into(), lease_secs.into()],
            ))
            .await
            .map_err(store_err)?;
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE indexing_jobs SET claimed_at = NULL
            WHERE status = 'pending'
              AND claimed_at IS NOT NULL
              AND updated_at <= NOW() - make_interval(secs => $1)
            "#,
            vec![lease_secs.into()],
        ))
        .await
        .map_err(store_err)?;
        txn.commit().await.map_err(store_err)?;
        Ok(failed.rows_affected())
    }
}

// ============================================================================
// Query Log Operations
// ============================================================================

#[async_trait]
impl QueryLogStore for PgStore {
    async fn insert_log(&self, log: &RagQueryLog) -> Result<()> {
        RagQueryLogActiveModel::from(log)
            .insert(self.write_conn())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn find_log(&self, log_id: Uuid) -> Result<Option<RagQueryLog>> {
        Ok(RagQueryLogEntity::find_by_id(log_id)
            .one(self.read_conn())
            .await
            .map_err(store_err)?
            .map(RagQueryLog::from))
    }

    async fn attach_feedback(&self, log_id: Uuid, user_id: &str, feedback: &FeedbackInput) -> Result<RagQueryLog> {
        let result = RagQueryLogEntity::update_many()
            .col_expr(RagQueryLogColumn::UserFeedback, Expr::value(feedback.feedback.as_str()))
            .col_expr(RagQueryLogColumn::FeedbackCategory, Expr::value(feedback.category.clone()))
            .col_expr(RagQueryLogColumn::FeedbackComment, Expr::value(feedback.comment.clone()))
            .col_expr(
                RagQueryLogColumn::FeedbackAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(RagQueryLogColumn::Id.eq(log_id))
            .filter(RagQueryLogColumn::UserId.eq(user_id))
            .filter(RagQueryLogColumn::UserFeedback.is_null())
            .exec(self.write_conn())
            .await
            .map_err(store_err)?;

        let log = RagQueryLogEntity::find_by_id(log_id)
            .filter(RagQueryLogColumn::UserId.eq(user_id))
            .one(self.write_conn())
            .await
            .map_err(store_err)?
            .map(RagQueryLog::from)
            .ok_or_else(|| AppError::QueryLogNotFound { id: log_id.to_string() })?;

        if result.rows_affected == 0 {
            return Err(AppError::FeedbackAlreadyRecorded { id: log_id.to_string() });
        }
        Ok(log)
    }

    async fn list_logs(&self, user_id: &str, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<RagQueryLog>> {
        let mut query = RagQueryLogEntity::find().filter(RagQueryLogColumn::UserId.eq(user_id));
        if let Some(since) = since {
            query = query.filter(
                RagQueryLogColumn::CreatedAt.gte(sea_orm::prelude::DateTimeWithTimeZone::from(since)),
            );
        }
        Ok(query
            .order_by_desc(RagQueryLogColumn::CreatedAt)
            .order_by_desc(RagQueryLogColumn::Id)
            .limit(limit as u64)
            .all(self.read_conn())
            .await
            .map_err(store_err)?
            .into_iter()
            .map(RagQueryLog::from)
            .collect())
    }

    async fn low_feedback_logs(&self, user_id: &str, limit: usize) -> Result<Vec<RagQueryLog>> {
        Ok(RagQueryLogEntity::find()
            .filter(RagQueryLogColumn::UserId.eq(user_id))
            .filter(RagQueryLogColumn::UserFeedback.eq(Feedback::ThumbsDown.as_str()))
            .order_by_desc(RagQueryLogColumn::CreatedAt)
            .order_by_desc(RagQueryLogColumn::Id)
            .limit(limit as u64)
            .all(self.read_conn())
            .await
            .map_err(store_err)?
            .into_iter()
            .map(RagQueryLog::from)
            .collect())
    }

    async fn logs_for_clustering(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<RagQueryLog>> {
        let mut query = RagQueryLogEntity::find().filter(RagQueryLogColumn::QueryEmbedding.is_not_null());
        if let Some(user_id) = user_id {
            query = query.filter(RagQueryLogColumn::UserId.eq(user_id));
        }
        Ok(query
            .order_by_desc(RagQueryLogColumn::CreatedAt)
            .order_by_desc(RagQueryLogColumn::Id)
            .limit(limit as u64)
            .all(self.read_conn())
            .await
            .map_err(store_err)?
            .into_iter()
            .map(RagQueryLog::from)
            .collect())
    }

    async fn assign_topic(&self, log_id: Uuid, cluster: i32, label: &str) -> Result<()> {
        let result = RagQueryLogEntity::update_many()
            .col_expr(RagQueryLogColumn::TopicCluster, Expr::value(cluster))
            .col_expr(RagQueryLogColumn::TopicLabel, Expr::value(label))
            .filter(RagQueryLogColumn::Id.eq(log_id))
            .exec(self.write_conn())
            .await
            .map_err(store_err)?;
        if result.rows_affected == 0 {
            return Err(AppError::QueryLogNotFound { id: log_id.to_string() });
        }
        Ok(())
    }
}

// ============================================================================
// Preference Operations
// ============================================================================

#[async_trait]
impl PreferencesStore for PgStore {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<UserRagPreferences>> {
        let row = UserRagPreferencesEntity::find_by_id(user_id.to_string())
            .one(self.read_conn())
            .await
            .map_err(store_err)?;
        row.map(|r| serde_json::from_value(r.preferences).map_err(AppError::from))
            .transpose()
    }

    async fn save_preferences(&self, user_id: &str, prefs: &UserRagPreferences) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO user_rag_preferences (user_id, preferences, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET preferences = EXCLUDED.preferences, updated_at = NOW()
            "#,
            vec![user_id.into(), serde_json::to_value(prefs)?.into()],
        );
        self.write_conn().execute(stmt).await.map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_query_matches_any_term() {
        assert_eq!(
            any_term_tsquery("What's my sourdough hydration? sourdough!").as_deref(),
            Some("hydration | my | s | sourdough | what")
        );
        assert_eq!(any_term_tsquery("  ?! "), None);
    }
}
