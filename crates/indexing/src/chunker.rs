//! Note chunking
//!
//! Splits note text into overlapping chunks along Markdown structure:
//! headings first, then paragraphs, sentences and words. Sizes are given
//! in tokens and approximated as four characters per token.

use secondbrain_common::settings::RagSettings;
use text_splitter::{ChunkConfig, MarkdownSplitter};
use tracing::debug;

use crate::errors::{IndexingError, Result};

/// Rough characters-per-token ratio for English prose
pub const CHARS_PER_TOKEN: usize = 4;

/// Configuration for note chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub chunk_tokens: usize,
    /// Overlap between consecutive chunks in tokens
    pub overlap_tokens: usize,
    /// Chunks below this size are folded into the previous chunk
    pub min_chunk_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: 500,
            overlap_tokens: 100,
            min_chunk_tokens: 20,
        }
    }
}

impl ChunkingConfig {
    pub fn from_settings(settings: &RagSettings, min_chunk_tokens: usize) -> Self {
        Self {
            chunk_tokens: settings.chunk_size,
            overlap_tokens: settings.chunk_overlap,
            min_chunk_tokens,
        }
    }

    fn splitter(&self) -> Result<MarkdownSplitter<text_splitter::Characters>> {
        let config = ChunkConfig::new(self.chunk_tokens * CHARS_PER_TOKEN)
            .with_overlap(self.overlap_tokens * CHARS_PER_TOKEN)
            .map_err(|e| IndexingError::Chunking(e.to_string()))?;
        Ok(MarkdownSplitter::new(config))
    }
}

/// A chunk ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position within the note, 0-based and contiguous
    pub index: i32,
    pub content: String,
    /// Approximate token count
    pub token_count: usize,
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split text into chunks; blank text yields no chunks
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let splitter = config.splitter()?;
    let mut pieces: Vec<String> = Vec::new();

    for piece in splitter.chunks(text) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match pieces.last_mut() {
            Some(last) if estimate_tokens(piece) < config.min_chunk_tokens => {
                // a short tail is usually covered by the overlap already
                if !last.contains(piece) {
                    last.push_str("\n\n");
                    last.push_str(piece);
                }
            }
            _ => pieces.push(piece.to_string()),
        }
    }

    debug!(
        input_chars = text.chars().count(),
        chunk_count = pieces.len(),
        chunk_tokens = config.chunk_tokens,
        "Note chunked"
    );

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| TextChunk {
            index: index as i32,
            token_count: estimate_tokens(&content),
            content,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ChunkingConfig {
        ChunkingConfig {
            chunk_tokens: 40,
            overlap_tokens: 8,
            min_chunk_tokens: 5,
        }
    }

    fn paragraphs(count: usize) -> String {
        (0..count)
            .map(|i| format!("Paragraph {} talks about sourdough starters and how long they proof.", i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_text("   \n\n ", &small()).unwrap().is_empty());
    }

    #[test]
    fn test_short_note_is_one_chunk() {
        let chunks = chunk_text("Buy flour.", &small()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "Buy flour.");
    }

    #[test]
    fn test_chunks_respect_size_and_are_indexed_in_order() {
        let config = small();
        let chunks = chunk_text(&paragraphs(12), &config).unwrap();
        assert!(chunks.len() > 1);

        // folding a short tail may exceed the target by at most the minimum
        let max_chars = (config.chunk_tokens + config.min_chunk_tokens) * CHARS_PER_TOKEN + 2;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as i32);
            assert!(chunk.content.chars().count() <= max_chars);
            assert_eq!(chunk.token_count, estimate_tokens(&chunk.content));
        }
    }

    #[test]
    fn test_every_paragraph_is_covered() {
        let text = paragraphs(8);
        let chunks = chunk_text(&text, &small()).unwrap();
        for i in 0..8 {
            let marker = format!("Paragraph {} ", i);
            assert!(chunks.iter().any(|c| c.content.contains(&marker)), "missing {}", marker);
        }
    }

    #[test]
    fn test_overlap_not_smaller_than_chunk_rejected() {
        let config = ChunkingConfig {
            chunk_tokens: 10,
            overlap_tokens: 10,
            min_chunk_tokens: 1,
        };
        let err = chunk_text(&paragraphs(3), &config).unwrap_err();
        assert!(matches!(err, IndexingError::Chunking(_)));
    }

    #[test]
    fn test_from_settings_uses_chunk_fields() {
        let settings = RagSettings::default();
        let config = ChunkingConfig::from_settings(&settings, 20);
        assert_eq!(config.chunk_tokens, settings.chunk_size);
        assert_eq!(config.overlap_tokens, settings.chunk_overlap);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }
}
