//! LLM reranking
//!
//! Each candidate is scored independently (0 - 10) with bounded
//! concurrency. A candidate whose scoring call fails is dropped; if every
//! call fails, or the stage exceeds its timeout, the fused order is kept.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use secondbrain_common::llm::{generate_structured, schemas, GenerationOptions, ProviderRegistry};
use secondbrain_common::metrics;
use secondbrain_common::settings::RagSettings;

use crate::retrieval::compare_fused;
use crate::types::HybridSearchResult;

/// Passage characters sent to the judge per candidate
const MAX_PASSAGE_CHARS: usize = 2000;

const RERANK_SYSTEM_PROMPT: &str = "You judge how well a passage from a user's notes answers \
their query. 0 means unrelated, 10 means it answers the query directly.";

#[derive(Debug, Deserialize)]
struct RerankScore {
    score: f32,
}

/// Result of a rerank pass
#[derive(Debug, Clone, Default)]
pub struct RerankOutcome {
    /// At most `top_k`, ordered by the last score applied
    pub results: Vec<HybridSearchResult>,

    pub was_reranked: bool,

    /// The stage ran but fell back to fused order
    pub degraded: bool,

    /// Candidates removed for scoring below `min_rerank_score`
    pub below_threshold: usize,

    /// Candidates whose scoring call failed
    pub failed: usize,

    pub elapsed_ms: Option<u64>,
}

impl RerankOutcome {
    fn pass_through(mut candidates: Vec<HybridSearchResult>, top_k: usize) -> Self {
        candidates.truncate(top_k);
        Self {
            results: candidates,
            ..Self::default()
        }
    }
}

fn rerank_prompt(query: &str, candidate: &HybridSearchResult) -> String {
    let passage: String = candidate.content.chars().take(MAX_PASSAGE_CHARS).collect();
    format!(
        "Query: {}\n\nNote title: {}\n\nPassage:\n{}\n\nRate the passage's relevance to the query.",
        query, candidate.note_title, passage
    )
}

fn by_relevance(a: &HybridSearchResult, b: &HybridSearchResult) -> Ordering {
    b.relevance_score
        .partial_cmp(&a.relevance_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| compare_fused(a, b))
}

/// LLM-judged reranker
#[derive(Clone)]
pub struct Reranker {
    providers: Arc<ProviderRegistry>,
}

impl Reranker {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// Rescore `candidates` (fused order) and keep the best `top_k`
    #[instrument(skip(self, candidates, settings), fields(candidates = candidates.len()))]
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<HybridSearchResult>,
        top_k: usize,
        settings: &RagSettings,
    ) -> RerankOutcome {
        if !settings.enable_reranking || candidates.is_empty() {
            return RerankOutcome::pass_through(candidates, top_k);
        }
        let Some(provider) = self.providers.resolve(settings.reranking_provider.as_deref()) else {
            debug!("No generative provider enabled, skipping rerank");
            return RerankOutcome::pass_through(candidates, top_k);
        };

        let start = Instant::now();
        let options = GenerationOptions::default()
            .with_timeout(settings.stage_timeout())
            .with_model(settings.reranking_model.clone())
            .with_system_prompt(RERANK_SYSTEM_PROMPT)
            .with_temperature(0.0)
            .with_max_tokens(128);

        let scoring = stream::iter(candidates.iter().enumerate())
            .map(|(i, candidate)| {
                let provider = provider.clone();
                let options = &options;
                async move {
                    let prompt = rerank_prompt(query, candidate);
                    let score: Option<RerankScore> =
                        generate_structured(provider.as_ref(), &prompt, &schemas().rerank_score, options).await;
                    (i, score.map(|s| s.score.clamp(0.0, 10.0)))
                }
            })
            .buffer_unordered(settings.rerank_concurrency.max(1))
            .collect::<Vec<_>>();

        let scored = tokio::time::timeout(settings.stage_timeout(), scoring).await;
        let scores = match scored {
            Ok(scores) => scores,
            Err(_) => {
                warn!(
                    timeout_secs = settings.stage_timeout_secs,
                    "Rerank timed out, keeping fused order"
                );
                let mut outcome = RerankOutcome::pass_through(candidates, top_k);
                outcome.degraded = true;
                outcome.elapsed_ms = Some(start.elapsed().as_millis() as u64);
                return outcome;
            }
        };

        let failed = scores.iter().filter(|(_, s)| s.is_none()).count();
        if failed == candidates.len() {
            warn!(failed, "Every rerank call failed, keeping fused order");
            metrics::record_rerank(0, 0, failed);
            let mut outcome = RerankOutcome::pass_through(candidates, top_k);
            outcome.degraded = true;
            outcome.failed = failed;
            outcome.elapsed_ms = Some(start.elapsed().as_millis() as u64);
            return outcome;
        }

        let mut slots: Vec<Option<f32>> = vec![None; candidates.len()];
        for (i, score) in scores {
            slots[i] = score;
        }

        let mut below_threshold = 0;
        let mut results: Vec<HybridSearchResult> = candidates
            .into_iter()
            .zip(slots)
            .filter_map(|(mut candidate, score)| {
                let score = score?;
                if score < settings.min_rerank_score {
                    below_threshold += 1;
                    return None;
                }
                candidate.relevance_score = Some(score);
                candidate.was_reranked = true;
                Some(candidate)
            })
            .collect();

        results.sort_by(by_relevance);
        results.truncate(top_k);

        metrics::record_rerank(results.len(), below_threshold, failed);
        debug!(kept = results.len(), below_threshold, failed, "Rerank complete");

        RerankOutcome {
            results,
            was_reranked: true,
            degraded: false,
            below_threshold,
            failed,
            elapsed_ms: Some(start.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use secondbrain_common::llm::MockProvider;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn candidate(id: u128, content: &str, rrf: f32) -> HybridSearchResult {
        HybridSearchResult {
            id: Uuid::from_u128(id),
            note_id: Uuid::from_u128(id),
            note_title: format!("Note {}", id),
            note_tags: vec![],
            content: content.to_string(),
            chunk_index: 0,
            vector_score: rrf,
            bm25_score: 0.0,
            rrf_score: rrf,
            relevance_score: None,
            was_reranked: false,
            created_at: Utc::now(),
        }
    }

    fn pool() -> Vec<HybridSearchResult> {
        vec![
            candidate(1, "score:2", 0.05),
            candidate(2, "score:9", 0.04),
            candidate(3, "score:6", 0.03),
            candidate(4, "score:8", 0.02),
        ]
    }

    /// Scores are read back from the passage text
    fn scripted() -> MockProvider {
        MockProvider::new("judge").respond_when("rerank_score", |prompt| {
            let score: f32 = prompt
                .split("score:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            json!({ "score": score })
        })
    }

    fn reranker(provider: MockProvider) -> Reranker {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider), true);
        Reranker::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_rerank_orders_and_filters() {
        let reranker = reranker(scripted());
        let outcome = reranker.rerank("q", pool(), 3, &RagSettings::default()).await;

        assert!(outcome.was_reranked);
        let ids: Vec<u128> = outcome.results.iter().map(|r| r.id.as_u128()).collect();
        assert_eq!(ids, vec![2, 4, 3]);
        assert_eq!(outcome.below_threshold, 1);
        assert!(outcome
            .results
            .iter()
            .all(|r| r.relevance_score.unwrap() >= RagSettings::default().min_rerank_score));
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let reranker = reranker(scripted());
        let settings = RagSettings {
            enable_reranking: false,
            ..RagSettings::default()
        };
        let outcome = reranker.rerank("q", pool(), 2, &settings).await;

        assert!(!outcome.was_reranked);
        let ids: Vec<u128> = outcome.results.iter().map(|r| r.id.as_u128()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(outcome.results.iter().all(|r| !r.was_reranked));
    }

    #[tokio::test]
    async fn test_single_failure_drops_candidate() {
        let reranker = reranker(scripted().fail_when("rerank_score", |p| p.contains("score:9")));
        let outcome = reranker.rerank("q", pool(), 5, &RagSettings::default()).await;

        assert!(outcome.was_reranked);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.results.iter().all(|r| r.id != Uuid::from_u128(2)));
    }

    #[tokio::test]
    async fn test_total_failure_keeps_fused_order() {
        let reranker = reranker(MockProvider::new("judge").fail_when("rerank_score", |_| true));
        let outcome = reranker.rerank("q", pool(), 3, &RagSettings::default()).await;

        assert!(!outcome.was_reranked);
        assert!(outcome.degraded);
        let ids: Vec<u128> = outcome.results.iter().map(|r| r.id.as_u128()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_fused_order() {
        let reranker = reranker(scripted().with_delay(Duration::from_secs(120)));
        let settings = RagSettings {
            stage_timeout_secs: 1,
            ..RagSettings::default()
        };
        let outcome = reranker.rerank("q", pool(), 2, &settings).await;

        assert!(outcome.degraded);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].id, Uuid::from_u128(1));
    }
}
