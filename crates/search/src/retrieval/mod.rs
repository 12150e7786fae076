//! Hybrid retrieval
//!
//! - Vector search (cosine similarity via embeddings)
//! - Lexical search (BM25-style full text)
//! - RRF fusion of both, plus the cross-representation merge

mod fusion;
mod hybrid;

pub use fusion::{compare_fused, merge_pools, sort_fused, RRFusion};
pub use hybrid::{HybridOutcome, HybridSearchEngine};
