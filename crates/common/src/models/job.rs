//! Indexing job state machine
//!
//! ```text
//! Pending ──> Running ──> Completed
//!    │           ├──────> PartiallyCompleted
//!    │           ├──────> Failed
//!    │           └──────> Cancelled
//!    ├──────────────────> Failed
//!    └──────────────────> Cancelled
//! ```
//!
//! Transitions only move forward and a terminal job is immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Job status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyCompleted => "partially_completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Pending or Running
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, PartiallyCompleted)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = AppError;

    fn try_from(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "partially_completed" => Ok(JobStatus::PartiallyCompleted),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown job status '{}'", other),
            }),
        }
    }
}

/// A bulk (re)embedding run for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    pub total_notes: u32,
    pub processed_notes: u32,
    pub total_chunks: u32,
    pub processed_chunks: u32,
    pub errors: Vec<String>,
    pub embedding_provider: String,
    pub cancel_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl IndexingJob {
    pub fn new(user_id: impl Into<String>, embedding_provider: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            status: JobStatus::Pending,
            total_notes: 0,
            processed_notes: 0,
            total_chunks: 0,
            processed_chunks: 0,
            errors: Vec::new(),
            embedding_provider: embedding_provider.into(),
            cancel_requested: false,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Share of notes attempted so far
    pub fn progress_percent(&self) -> f64 {
        if self.total_notes == 0 {
            if self.is_terminal() { 100.0 } else { 0.0 }
        } else {
            (self.processed_notes as f64 / self.total_notes as f64) * 100.0
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(AppError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "progress update".to_string(),
            });
        }
        Ok(())
    }

    /// Pending -> Running with the number of notes to process
    pub fn start(&mut self, total_notes: u32) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.total_notes = total_notes;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Chunks are only known once a note has been split
    pub fn add_planned_chunks(&mut self, chunks: u32) -> Result<()> {
        self.ensure_running()?;
        self.total_chunks = self.total_chunks.saturating_add(chunks);
        Ok(())
    }

    pub fn record_note(&mut self, chunks: u32) -> Result<()> {
        self.ensure_running()?;
        self.processed_notes = self.processed_notes.saturating_add(1);
        self.processed_chunks = self.processed_chunks.saturating_add(chunks);
        Ok(())
    }

    /// The note counts as attempted; the run continues
    pub fn record_note_error(&mut self, note_id: Uuid, message: impl fmt::Display) -> Result<()> {
        self.ensure_running()?;
        self.processed_notes = self.processed_notes.saturating_add(1);
        self.errors.push(format!("note {}: {}", note_id, message));
        Ok(())
    }

    /// Running -> Completed, or PartiallyCompleted when any note failed
    pub fn finish(&mut self) -> Result<()> {
        if self.errors.is_empty() {
            self.transition(JobStatus::Completed)
        } else {
            self.transition(JobStatus::PartiallyCompleted)
        }
    }

    pub fn fail(&mut self, message: impl fmt::Display) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.errors.push(message.to_string());
        Ok(())
    }

    /// Progress made so far is kept
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Cancelled)
    }
}
