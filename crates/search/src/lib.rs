//! SecondBrain retrieval
//!
//! Turns a user query into a ranked, deduplicated context of notes:
//! - Intent gate (skip retrieval for commands and greetings)
//! - Query expansion (HyDE, multi-query)
//! - Hybrid search (vector + lexical, fused with RRF)
//! - LLM reranking with a score floor
//! - Context assembly bounded by `max_context_length`
//! - Analytics logging of every invocation

pub mod context;
pub mod expansion;
pub mod intent;
pub mod orchestrator;
pub mod rerank;
pub mod retrieval;
mod types;

pub use orchestrator::{RagService, RetrievalOptions};
pub use types::{HybridSearchResult, RagContext, RetrievedNote};
