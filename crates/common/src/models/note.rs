//! Notes and their embedded chunks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user note as read from the note store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Text that gets chunked and embedded; the title anchors short notes
    pub fn indexable_text(&self) -> String {
        if self.title.trim().is_empty() {
            self.content.clone()
        } else {
            format!("# {}\n\n{}", self.title.trim(), self.content)
        }
    }
}

/// A persisted chunk of a note with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteChunk {
    pub id: Uuid,
    pub note_id: Uuid,
    pub user_id: String,
    /// Position within the note, 0-based
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
}

/// Chunk payload handed to `ChunkStore::upsert_chunks`
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInput {
    pub index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A ranked match from vector or lexical search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk_id: Uuid,
    pub note_id: Uuid,
    pub note_title: String,
    pub note_tags: Vec<String>,
    pub content: String,
    pub chunk_index: i32,
    /// Cosine similarity for vector hits, BM25 relevance for lexical hits
    pub score: f32,
    pub created_at: DateTime<Utc>,
}
