//! SecondBrain retrieval analytics
//!
//! Everything here reads or annotates `RagQueryLog` rows written by the
//! retrieval pipeline:
//! - `feedback`: thumbs up/down attached after the fact
//! - `summary`: latency, score and degradation aggregates
//! - `clustering`: offline topic clustering of past queries

pub mod clustering;
pub mod feedback;
pub mod summary;

pub use clustering::{ClusteringReport, TopicClusterer, TopicSummary};
pub use feedback::{FeedbackService, LowFeedbackQuery};
pub use summary::{PerformanceSummary, QueryInsights, TopicCount};
