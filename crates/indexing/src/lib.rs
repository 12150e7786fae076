//! SecondBrain indexing
//!
//! Turns notes into embedded, searchable chunks:
//! - `chunker`: Markdown-aware splitting with overlap
//! - `pipeline`: per-note indexing and the job state machine
//! - `worker`: claims persisted jobs and runs them

pub mod chunker;
pub mod errors;
pub mod pipeline;
pub mod worker;

pub use chunker::{chunk_text, ChunkingConfig, TextChunk};
pub use errors::{IndexingError, Result};
pub use pipeline::{IndexingPipeline, PipelineOptions};
pub use worker::IndexingWorker;
