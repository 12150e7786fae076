//! Context assembly
//!
//! Collapses ranked chunks into one entry per note and renders the
//! LLM-readable context block within a character budget. Over budget,
//! note content is truncated; notes are dropped only when even their
//! headers no longer fit.

use std::collections::HashMap;

use uuid::Uuid;

use crate::retrieval::compare_fused;
use crate::types::{HybridSearchResult, RetrievedNote};

const TRUNCATION_MARK: &str = "…";
const NOTE_SEPARATOR: &str = "\n---\n";

fn by_final_score(a: &HybridSearchResult, b: &HybridSearchResult) -> std::cmp::Ordering {
    b.final_score()
        .partial_cmp(&a.final_score())
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| compare_fused(a, b))
}

/// Keep the highest-scoring chunk of each note, best first
pub fn dedupe_by_note(results: &[HybridSearchResult]) -> Vec<HybridSearchResult> {
    let mut sorted = results.to_vec();
    sorted.sort_by(by_final_score);

    let mut seen = std::collections::HashSet::new();
    sorted.retain(|r| seen.insert(r.note_id));
    sorted
}

/// One entry per note; every retrieved chunk's content is kept, best first
pub fn group_by_note(results: &[HybridSearchResult]) -> Vec<RetrievedNote> {
    let mut sorted = results.to_vec();
    sorted.sort_by(by_final_score);

    let mut chunks: HashMap<Uuid, Vec<String>> = HashMap::new();
    for r in &sorted {
        chunks.entry(r.note_id).or_default().push(r.content.clone());
    }

    dedupe_by_note(&sorted)
        .into_iter()
        .map(|best| RetrievedNote {
            note_id: best.note_id,
            title: best.note_title.clone(),
            tags: best.note_tags.clone(),
            best_chunk_id: best.id,
            score: best.final_score(),
            vector_score: best.vector_score,
            relevance_score: best.relevance_score,
            was_reranked: best.was_reranked,
            chunks: chunks.remove(&best.note_id).unwrap_or_default(),
        })
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let keep = max - char_len(TRUNCATION_MARK).min(max);
    let mut out: String = s.chars().take(keep).collect();
    if keep < max {
        out.push_str(TRUNCATION_MARK);
    }
    out
}

fn header(position: usize, note: &RetrievedNote) -> String {
    let relevance = match (note.was_reranked, note.relevance_score) {
        (true, Some(score)) => format!("{:.1}/10", score),
        _ => format!("{:.0}% match", (note.vector_score * 100.0).clamp(0.0, 100.0)),
    };
    let tags = if note.tags.is_empty() {
        "none".to_string()
    } else {
        note.tags.join(", ")
    };
    format!(
        "[{}] {} (id: {})\nTags: {}\nRelevance: {}\n",
        position, note.title, note.note_id, tags, relevance
    )
}

/// Split `budget` across contents so short ones keep their full text
fn allocate(lengths: &[usize], budget: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lengths.len()).collect();
    order.sort_by_key(|&i| lengths[i]);

    let mut shares = vec![0; lengths.len()];
    let mut remaining = budget;
    for (n, &i) in order.iter().enumerate() {
        let fair = remaining / (lengths.len() - n);
        let share = lengths[i].min(fair);
        shares[i] = share;
        remaining -= share;
    }
    shares
}

/// Render notes as a context block of at most `max_length` characters
pub fn format_context(notes: &[RetrievedNote], max_length: usize) -> String {
    let headers: Vec<String> = notes
        .iter()
        .enumerate()
        .map(|(i, n)| header(i + 1, n))
        .collect();

    // drop trailing notes whose headers alone would blow the budget
    let mut kept = 0;
    let mut fixed = 0;
    for h in &headers {
        let cost = char_len(h) + if kept > 0 { char_len(NOTE_SEPARATOR) } else { 0 };
        if fixed + cost > max_length {
            break;
        }
        fixed += cost;
        kept += 1;
    }

    let contents: Vec<String> = notes[..kept].iter().map(RetrievedNote::content).collect();
    let lengths: Vec<usize> = contents.iter().map(|c| char_len(c)).collect();
    let shares = allocate(&lengths, max_length - fixed);

    let mut out = String::new();
    for i in 0..kept {
        if i > 0 {
            out.push_str(NOTE_SEPARATOR);
        }
        out.push_str(&headers[i]);
        out.push_str(&truncate_chars(&contents[i], shares[i]));
    }
    truncate_chars(&out, max_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(chunk: u128, note: u128, rrf: f32, content: &str) -> HybridSearchResult {
        HybridSearchResult {
            id: Uuid::from_u128(chunk),
            note_id: Uuid::from_u128(note),
            note_title: format!("Note {}", note),
            note_tags: vec!["tag".into()],
            content: content.to_string(),
            chunk_index: chunk as i32,
            vector_score: rrf,
            bm25_score: 0.0,
            rrf_score: rrf,
            relevance_score: None,
            was_reranked: false,
            created_at: Utc::now(),
        }
    }

    fn sample() -> Vec<HybridSearchResult> {
        vec![
            result(1, 10, 0.02, "first chunk of ten"),
            result(2, 20, 0.05, "only chunk of twenty"),
            result(3, 10, 0.04, "second chunk of ten"),
        ]
    }

    #[test]
    fn test_dedupe_keeps_best_chunk() {
        let deduped = dedupe_by_note(&sample());
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, Uuid::from_u128(2));
        assert_eq!(deduped[1].id, Uuid::from_u128(3));
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let once = dedupe_by_note(&sample());
        assert_eq!(dedupe_by_note(&once), once);
    }

    #[test]
    fn test_group_retains_all_chunk_content() {
        let notes = group_by_note(&sample());
        assert_eq!(notes[1].note_id, Uuid::from_u128(10));
        assert_eq!(notes[1].best_chunk_id, Uuid::from_u128(3));
        assert_eq!(notes[1].chunks, vec!["second chunk of ten", "first chunk of ten"]);
    }

    #[test]
    fn test_format_includes_note_fields() {
        let notes = group_by_note(&sample());
        let text = format_context(&notes, 4000);
        assert!(text.contains("Note 20"));
        assert!(text.contains(&Uuid::from_u128(20).to_string()));
        assert!(text.contains("Tags: tag"));
        assert!(text.contains("only chunk of twenty"));
    }

    #[test]
    fn test_format_respects_bound_for_any_size() {
        let long = "lorem ipsum dolor sit amet ".repeat(200);
        for count in [1usize, 3, 10, 50] {
            let results: Vec<HybridSearchResult> = (0..count)
                .map(|i| result(i as u128, i as u128, 1.0 / (i as f32 + 1.0), &long))
                .collect();
            let notes = group_by_note(&results);
            for max in [0usize, 50, 200, 1000, 4000] {
                assert!(char_len(&format_context(&notes, max)) <= max);
            }
        }
    }

    #[test]
    fn test_truncates_content_before_dropping_notes() {
        let long = "x".repeat(5000);
        let results = vec![result(1, 1, 0.9, &long), result(2, 2, 0.8, &long)];
        let text = format_context(&group_by_note(&results), 1000);
        assert!(text.contains("Note 1"));
        assert!(text.contains("Note 2"));
        assert!(text.contains(TRUNCATION_MARK));
    }

    #[test]
    fn test_allocate_gives_short_content_full_share() {
        assert_eq!(allocate(&[10, 1000, 1000], 310), vec![10, 150, 150]);
    }
}
