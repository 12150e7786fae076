//! Retrieval result types

use chrono::{DateTime, Utc};
use secondbrain_common::models::ChunkHit;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scored candidate chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchResult {
    /// Chunk ID
    pub id: Uuid,

    pub note_id: Uuid,

    pub note_title: String,

    pub note_tags: Vec<String>,

    pub content: String,

    /// Chunk index within the note
    pub chunk_index: i32,

    /// Cosine similarity (0.0 - 1.0); 0 when only the lexical list found it
    pub vector_score: f32,

    /// Lexical relevance divided by the best lexical score of the list
    pub bm25_score: f32,

    /// Fused rank score
    pub rrf_score: f32,

    /// LLM relevance (0 - 10) when reranked
    pub relevance_score: Option<f32>,

    pub was_reranked: bool,

    pub created_at: DateTime<Utc>,
}

impl HybridSearchResult {
    pub(crate) fn from_hit(hit: ChunkHit) -> Self {
        Self {
            id: hit.chunk_id,
            note_id: hit.note_id,
            note_title: hit.note_title,
            note_tags: hit.note_tags,
            content: hit.content,
            chunk_index: hit.chunk_index,
            vector_score: 0.0,
            bm25_score: 0.0,
            rrf_score: 0.0,
            relevance_score: None,
            was_reranked: false,
            created_at: hit.created_at,
        }
    }

    /// Score of the last stage that ran: rerank if applied, fused otherwise
    pub fn final_score(&self) -> f32 {
        match (self.was_reranked, self.relevance_score) {
            (true, Some(score)) => score,
            _ => self.rrf_score,
        }
    }
}

/// One note in the assembled context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedNote {
    pub note_id: Uuid,

    pub title: String,

    pub tags: Vec<String>,

    /// Highest-scoring chunk of the note
    pub best_chunk_id: Uuid,

    /// `final_score` of the best chunk
    pub score: f32,

    pub vector_score: f32,

    pub relevance_score: Option<f32>,

    pub was_reranked: bool,

    /// Contents of every retrieved chunk of the note, best first
    pub chunks: Vec<String>,
}

impl RetrievedNote {
    /// Chunk contents joined in score order
    pub fn content(&self) -> String {
        self.chunks.join("\n\n")
    }
}

/// Output of `RagService::retrieve_context`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagContext {
    /// Notes ordered by final score, one entry per note
    pub retrieved_notes: Vec<RetrievedNote>,

    /// Analytics record for this invocation; `None` if logging was off or failed
    pub rag_log_id: Option<Uuid>,

    /// True when the intent gate decided the query needs no retrieval
    pub retrieval_skipped: bool,

    /// Stages that failed and fell back
    pub degraded_stages: Vec<String>,

    /// Formatted context block, at most `max_context_length` characters
    pub formatted: String,
}

impl RagContext {
    pub fn is_empty(&self) -> bool {
        self.retrieved_notes.is_empty()
    }
}
