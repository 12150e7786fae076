//! Domain models shared by the retrieval, indexing and analytics crates

mod job;
mod note;
mod query_log;

pub use job::{IndexingJob, JobStatus};
pub use note::{ChunkHit, ChunkInput, Note, NoteChunk};
pub use query_log::{Feedback, FeedbackInput, RagQueryLog, ScoreSummary, StageTimings};
