//! Indexing job entity

use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{IndexingJob, JobStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "indexing_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub total_notes: i32,

    pub processed_notes: i32,

    pub total_chunks: i32,

    pub processed_chunks: i32,

    /// JSON array of per-note error strings
    pub errors: Json,

    #[sea_orm(column_type = "Text")]
    pub embedding_provider: String,

    pub cancel_requested: bool,

    /// Set when a worker picks the job up
    pub claimed_at: Option<DateTimeWithTimeZone>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Get the job status as an enum
    pub fn job_status(&self) -> crate::errors::Result<JobStatus> {
        JobStatus::try_from(self.status.as_str())
    }
}

impl TryFrom<Model> for IndexingJob {
    type Error = AppError;

    fn try_from(row: Model) -> crate::errors::Result<Self> {
        let status = row.job_status()?;
        Ok(IndexingJob {
            id: row.id,
            user_id: row.user_id,
            status,
            total_notes: row.total_notes.max(0) as u32,
            processed_notes: row.processed_notes.max(0) as u32,
            total_chunks: row.total_chunks.max(0) as u32,
            processed_chunks: row.processed_chunks.max(0) as u32,
            errors: serde_json::from_value(row.errors).unwrap_or_default(),
            embedding_provider: row.embedding_provider,
            cancel_requested: row.cancel_requested,
            started_at: row.started_at.map(|t| t.with_timezone(&chrono::Utc)),
            completed_at: row.completed_at.map(|t| t.with_timezone(&chrono::Utc)),
            created_at: row.created_at.with_timezone(&chrono::Utc),
        })
    }
}

impl From<&IndexingJob> for ActiveModel {
    fn from(job: &IndexingJob) -> Self {
        let now = chrono::Utc::now();
        ActiveModel {
            id: Set(job.id),
            user_id: Set(job.user_id.clone()),
            status: Set(job.status.as_str().to_string()),
            total_notes: Set(job.total_notes as i32),
            processed_notes: Set(job.processed_notes as i32),
            total_chunks: Set(job.total_chunks as i32),
            processed_chunks: Set(job.processed_chunks as i32),
            errors: Set(serde_json::json!(job.errors)),
            embedding_provider: Set(job.embedding_provider.clone()),
            cancel_requested: Set(job.cancel_requested),
            claimed_at: Set(None),
            started_at: Set(job.started_at.map(Into::into)),
            completed_at: Set(job.completed_at.map(Into::into)),
            created_at: Set(job.created_at.into()),
            updated_at: Set(now.into()),
        }
    }
}
