//! Hybrid retrieval combining vector and lexical search
//!
//! Both searches run concurrently; results are fused with RRF. A failed
//! lexical search degrades to vector-only results, a failed vector search
//! fails the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use secondbrain_common::errors::{AppError, Result};
use secondbrain_common::models::ChunkHit;
use secondbrain_common::settings::RagSettings;
use secondbrain_common::store::ChunkStore;
use tracing::{debug, instrument, warn};

use super::fusion::RRFusion;
use crate::types::HybridSearchResult;

/// Candidates from one hybrid search
#[derive(Debug, Clone, Default)]
pub struct HybridOutcome {
    /// Fused candidates, best first, at most `initial_retrieval_count`
    pub results: Vec<HybridSearchResult>,

    pub vector_ms: u64,

    /// `None` when lexical search did not run
    pub lexical_ms: Option<u64>,

    /// Lexical search failed or timed out and was left out of fusion
    pub lexical_degraded: bool,
}

/// Hybrid search engine over a chunk store
pub struct HybridSearchEngine {
    store: Arc<dyn ChunkStore>,
}

async fn timed<F>(stage: &'static str, limit: Duration, fut: F) -> (Result<Vec<ChunkHit>>, u64)
where
    F: std::future::Future<Output = Result<Vec<ChunkHit>>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::store(format!(
            "{} timed out after {}ms",
            stage,
            limit.as_millis()
        ))),
    };
    (result, start.elapsed().as_millis() as u64)
}

impl HybridSearchEngine {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// Search one query representation.
    ///
    /// `query_text` feeds lexical search and `query_vector` feeds vector
    /// search; they may differ when HyDE replaced the embedding.
    #[instrument(skip(self, query_vector, settings))]
    pub async fn search(
        &self,
        user_id: &str,
        query_text: &str,
        query_vector: &[f32],
        settings: &RagSettings,
    ) -> Result<HybridOutcome> {
        let fusion = RRFusion::from_settings(settings);
        let limit = settings.initial_retrieval_count;
        // Fetch more results from each list for better fusion
        let expanded_limit = limit * 2;
        let timeout = settings.stage_timeout();

        if !settings.enable_hybrid_search {
            let (vector, vector_ms) = timed(
                "vector search",
                timeout,
                self.store
                    .vector_search(user_id, query_vector, expanded_limit, settings.similarity_threshold),
            )
            .await;
            let results = fusion.vector_only(vector?, limit);
            debug!(count = results.len(), "Vector-only search complete");
            return Ok(HybridOutcome {
                results,
                vector_ms,
                lexical_ms: None,
                lexical_degraded: false,
            });
        }

        let ((vector, vector_ms), (lexical, lexical_ms)) = tokio::join!(
            timed(
                "vector search",
                timeout,
                self.store
                    .vector_search(user_id, query_vector, expanded_limit, settings.similarity_threshold),
            ),
            timed(
                "lexical search",
                timeout,
                self.store.lexical_search(user_id, query_text, expanded_limit),
            ),
        );

        let vector = vector?;
        let (lexical, lexical_degraded) = match lexical {
            Ok(hits) => (hits, false),
            Err(e) => {
                warn!(error = %e, "Lexical search failed, using vector results only");
                (Vec::new(), true)
            }
        };

        let vector_count = vector.len();
        let lexical_count = lexical.len();
        let results = fusion.fuse(vector, lexical, limit);

        debug!(
            vector_count,
            lexical_count,
            fused_count = results.len(),
            "Hybrid search complete"
        );

        Ok(HybridOutcome {
            results,
            vector_ms,
            lexical_ms: Some(lexical_ms),
            lexical_degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secondbrain_common::embeddings::{Embedder, MockEmbedder};
    use secondbrain_common::models::{ChunkInput, Note};
    use secondbrain_common::store::memory::{FailurePoint, InMemoryStore};

    async fn seeded() -> (Arc<InMemoryStore>, MockEmbedder) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = MockEmbedder::new(64);
        for (title, body) in [
            ("Rust", "ownership borrowing lifetimes in rust"),
            ("Bread", "sourdough starter hydration and baking"),
        ] {
            let note = Note::new("u1", title, body);
            let embedding = embedder.embed(body).await.unwrap();
            store.put_note(note.clone()).await;
            store
                .upsert_chunks(
                    note.id,
                    "u1",
                    "mock",
                    vec![ChunkInput { index: 0, content: body.to_string(), embedding }],
                )
                .await
                .unwrap();
        }
        (store, embedder)
    }

    #[tokio::test]
    async fn test_hybrid_search_finds_relevant_chunk() {
        let (store, embedder) = seeded().await;
        let engine = HybridSearchEngine::new(store);
        let vector = embedder.embed("rust ownership").await.unwrap();

        let outcome = engine
            .search("u1", "rust ownership", &vector, &RagSettings::default())
            .await
            .unwrap();

        assert_eq!(outcome.results[0].note_title, "Rust");
        assert!(outcome.lexical_ms.is_some());
        assert!(!outcome.lexical_degraded);
    }

    #[tokio::test]
    async fn test_lexical_failure_degrades() {
        let (store, embedder) = seeded().await;
        store.inject_failure(FailurePoint::LexicalSearch);
        let engine = HybridSearchEngine::new(store);
        let vector = embedder.embed("sourdough").await.unwrap();

        let outcome = engine
            .search("u1", "sourdough", &vector, &RagSettings::default())
            .await
            .unwrap();

        assert!(outcome.lexical_degraded);
        assert_eq!(outcome.results[0].note_title, "Bread");
    }

    #[tokio::test]
    async fn test_vector_failure_propagates() {
        let (store, embedder) = seeded().await;
        store.inject_failure(FailurePoint::VectorSearch);
        let engine = HybridSearchEngine::new(store);
        let vector = embedder.embed("sourdough").await.unwrap();

        let err = engine
            .search("u1", "sourdough", &vector, &RagSettings::default())
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_hybrid_disabled_skips_lexical() {
        let (store, embedder) = seeded().await;
        let engine = HybridSearchEngine::new(store.clone());
        let vector = embedder.embed("rust").await.unwrap();
        let settings = RagSettings {
            enable_hybrid_search: false,
            ..RagSettings::default()
        };

        let outcome = engine.search("u1", "rust", &vector, &settings).await.unwrap();
        assert!(outcome.lexical_ms.is_none());
        assert_eq!(store.lexical_search_calls(), 0);
    }

    #[tokio::test]
    async fn test_threshold_filtered_vector_still_surfaces_lexical() {
        let (store, embedder) = seeded().await;
        let engine = HybridSearchEngine::new(store);
        let vector = embedder.embed("hydration").await.unwrap();
        let settings = RagSettings {
            similarity_threshold: 1.0,
            ..RagSettings::default()
        };

        let outcome = engine.search("u1", "hydration", &vector, &settings).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].vector_score, 0.0);
        assert_eq!(outcome.results[0].note_title, "Bread");
    }
}
