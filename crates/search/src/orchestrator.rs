//! RAG orchestrator
//!
//! `RagService::retrieve_context` runs the whole retrieval pipeline:
//! settings, intent gate, expansion, embedding, hybrid search per query
//! representation, merge, rerank, per-note dedupe, context assembly and
//! the analytics log. Provider-backed stages degrade instead of failing;
//! store failures and invalid settings propagate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use secondbrain_common::cancel::CancelSignal;
use secondbrain_common::embeddings::{blend, Embedder};
use secondbrain_common::errors::{AppError, Result};
use secondbrain_common::llm::ProviderRegistry;
use secondbrain_common::metrics::{self, StageTimer};
use secondbrain_common::models::{RagQueryLog, ScoreSummary, StageTimings};
use secondbrain_common::settings::{RagSettings, SettingsSource};
use secondbrain_common::store::{ChunkStore, QueryLogStore};

use crate::context::{format_context, group_by_note};
use crate::expansion::{HydeExpansion, MultiQueryExpansion, QueryExpander};
use crate::intent::IntentDetector;
use crate::rerank::Reranker;
use crate::retrieval::{merge_pools, HybridSearchEngine};
use crate::types::{HybridSearchResult, RagContext};

/// Per-call overrides for `retrieve_context`
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    pub top_k: Option<usize>,

    pub similarity_threshold: Option<f32>,

    /// Named chunk store registered with `RagService::with_store`
    pub vector_store: Option<String>,

    pub conversation_id: Option<String>,

    /// Retrieve even if the intent gate would skip
    pub force_retrieval: bool,

    pub cancel: Option<CancelSignal>,

    /// Overall budget; exceeding it is reported as a cancellation
    pub deadline: Option<Duration>,
}

/// One query formulation searched independently
struct Representation {
    /// Text for lexical search
    text: String,
    vector: Vec<f32>,
}

/// Everything the analytics log needs from a pipeline run
#[derive(Default)]
struct RunReport {
    timings: StageTimings,
    degraded: Vec<String>,
    key_concepts: Vec<String>,
    query_embedding: Option<Vec<f32>>,
    retrieved_count: usize,
}

impl RunReport {
    fn degrade(&mut self, stage: &str) {
        metrics::record_degradation(stage);
        if !self.degraded.iter().any(|s| s == stage) {
            self.degraded.push(stage.to_string());
        }
    }
}

pub struct RagService {
    settings: Arc<dyn SettingsSource>,
    embedder: Arc<dyn Embedder>,
    default_store: Arc<dyn ChunkStore>,
    stores: HashMap<String, Arc<dyn ChunkStore>>,
    logs: Arc<dyn QueryLogStore>,
    expander: QueryExpander,
    reranker: Reranker,
    intent: IntentDetector,
}

impl RagService {
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ChunkStore>,
        logs: Arc<dyn QueryLogStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            settings,
            embedder,
            default_store: store,
            stores: HashMap::new(),
            logs,
            expander: QueryExpander::new(providers.clone()),
            reranker: Reranker::new(providers.clone()),
            intent: IntentDetector::new(Some(providers))?,
        })
    }

    /// Register an alternative chunk store selectable per call
    pub fn with_store(mut self, name: impl Into<String>, store: Arc<dyn ChunkStore>) -> Self {
        self.stores.insert(name.into(), store);
        self
    }

    fn store_for(&self, name: Option<&str>) -> Result<Arc<dyn ChunkStore>> {
        match name {
            None => Ok(self.default_store.clone()),
            Some(name) => self.stores.get(name).cloned().ok_or_else(|| {
                AppError::validation("vector_store", format!("unknown vector store '{}'", name))
            }),
        }
    }

    /// Retrieve a ranked, deduplicated context for `query`.
    ///
    /// Returns `AppError::Cancelled` if the cancel signal fires or the
    /// deadline passes before the context is complete.
    #[instrument(skip(self, options), fields(conversation_id = ?options.conversation_id))]
    pub async fn retrieve_context(
        &self,
        user_id: &str,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<RagContext> {
        let cancel = options.cancel.clone().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled {
                message: "retrieval cancelled before start".to_string(),
            });
        }

        let pipeline = self.run(user_id, query, &options);
        let bounded = async {
            match options.deadline {
                Some(limit) => tokio::time::timeout(limit, pipeline).await.map_err(|_| {
                    AppError::Cancelled {
                        message: format!("retrieval deadline of {}ms exceeded", limit.as_millis()),
                    }
                })?,
                None => pipeline.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Retrieval cancelled");
                Err(AppError::Cancelled { message: "retrieval cancelled".to_string() })
            }
            result = bounded => result,
        }
    }

    async fn effective_settings(&self, user_id: &str, options: &RetrievalOptions) -> Result<RagSettings> {
        let mut settings = self.settings.effective_rag_settings(user_id).await?;
        if let Some(top_k) = options.top_k {
            settings.top_k = top_k;
            settings.initial_retrieval_count = settings.initial_retrieval_count.max(top_k);
        }
        if let Some(threshold) = options.similarity_threshold {
            settings.similarity_threshold = threshold;
        }
        settings.validated()
    }

    async fn run(&self, user_id: &str, query: &str, options: &RetrievalOptions) -> Result<RagContext> {
        let start = Instant::now();
        let settings = self.effective_settings(user_id, options).await?;
        let store = self.store_for(options.vector_store.as_deref())?;

        if settings.enable_intent_detection && !options.force_retrieval {
            let decision = self.intent.detect(query, &settings).await;
            if !decision.needs_retrieval {
                debug!(reason = %decision.reason, "Intent gate skipped retrieval");
                metrics::record_retrieval(start.elapsed(), 0, true);
                return Ok(RagContext {
                    retrieval_skipped: true,
                    ..RagContext::default()
                });
            }
        }

        let mut report = RunReport::default();
        let results = self.search(&store, user_id, query, &settings, &mut report).await?;

        let notes = group_by_note(&results);
        let formatted = format_context(&notes, settings.max_context_length);
        report.timings.total_ms = start.elapsed().as_millis() as u64;

        let rag_log_id = if settings.enable_analytics {
            let log = self.build_log(user_id, query, options, &settings, &results, notes.len(), &mut report);
            match self.logs.insert_log(&log).await {
                Ok(()) => Some(log.id),
                Err(e) => {
                    warn!(error = %e, "Failed to write RAG query log");
                    metrics::record_degradation("analytics");
                    None
                }
            }
        } else {
            None
        };

        metrics::record_retrieval(start.elapsed(), notes.len(), false);
        info!(
            notes = notes.len(),
            retrieved = report.retrieved_count,
            degraded = ?report.degraded,
            latency_ms = start.elapsed().as_millis() as u64,
            "Context retrieved"
        );

        Ok(RagContext {
            retrieved_notes: notes,
            rag_log_id,
            retrieval_skipped: false,
            degraded_stages: report.degraded,
            formatted,
        })
    }

    /// Expansion through rerank; returns final candidates in final order
    async fn search(
        &self,
        store: &Arc<dyn ChunkStore>,
        user_id: &str,
        query: &str,
        settings: &RagSettings,
        report: &mut RunReport,
    ) -> Result<Vec<HybridSearchResult>> {
        // Expansion
        let timer = StageTimer::start("expansion");
        let (hyde, multi) = tokio::join!(
            self.expander.expand_with_hyde(query, settings),
            self.expander.expand_multi_query(query, settings),
        );
        if settings.enable_hyde || settings.enable_query_expansion {
            report.timings.expansion_ms = Some(timer.finish());
        }
        if self.expander.is_available(settings) {
            if settings.enable_hyde && !hyde.success {
                report.degrade("hyde");
            }
            if settings.enable_query_expansion && !multi.success {
                report.degrade("multi_query");
            }
        }
        report.key_concepts = hyde.key_concepts.clone();

        // Embedding
        let timer = StageTimer::start("embedding");
        let representations = match self.embed(query, &hyde, &multi, settings).await {
            Ok((reps, query_vector)) => {
                report.query_embedding = Some(query_vector);
                reps
            }
            Err(e) if e.is_stage_recoverable() => {
                warn!(error = %e, "Embedding failed, no retrieval possible");
                report.degrade("embedding");
                report.timings.embedding_ms = Some(timer.finish());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        report.timings.embedding_ms = Some(timer.finish());

        // Hybrid search per representation
        let engine = HybridSearchEngine::new(store.clone());
        let outcomes = try_join_all(
            representations
                .iter()
                .map(|r| engine.search(user_id, &r.text, &r.vector, settings)),
        )
        .await?;

        report.timings.vector_search_ms = outcomes.iter().map(|o| o.vector_ms).max();
        report.timings.lexical_search_ms = outcomes.iter().filter_map(|o| o.lexical_ms).max();
        if outcomes.iter().any(|o| o.lexical_degraded) {
            report.degrade("lexical_search");
        }

        let merged = merge_pools(
            outcomes.into_iter().map(|o| o.results).collect(),
            settings.initial_retrieval_count,
        );
        report.retrieved_count = merged.len();
        if merged.is_empty() {
            return Ok(merged);
        }

        // Rerank
        let outcome = self.reranker.rerank(query, merged, settings.top_k, settings).await;
        report.timings.rerank_ms = outcome.elapsed_ms;
        if outcome.degraded {
            report.degrade("rerank");
        }
        Ok(outcome.results)
    }

    /// Embed the raw query, the HyDE passage and every variant in one batch
    async fn embed(
        &self,
        query: &str,
        hyde: &HydeExpansion,
        multi: &MultiQueryExpansion,
        settings: &RagSettings,
    ) -> Result<(Vec<Representation>, Vec<f32>)> {
        let mut texts = vec![query.to_string()];
        if let Some(document) = hyde.document.as_ref().filter(|_| hyde.success) {
            texts.push(document.clone());
        }
        let variants: Vec<&String> = multi.queries.iter().skip(1).collect();
        texts.extend(variants.iter().map(|v| (*v).clone()));

        let timeout = settings.stage_timeout();
        let vectors = tokio::time::timeout(timeout, self.embedder.embed_batch(&texts))
            .await
            .map_err(|_| AppError::EmbeddingTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;
        if vectors.len() != texts.len() {
            return Err(AppError::EmbeddingError {
                message: format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            });
        }

        let mut vectors = vectors.into_iter();
        let query_vector = vectors.next().unwrap_or_default();
        let primary = if hyde.success {
            let hyde_vector = vectors.next().unwrap_or_default();
            blend(&hyde_vector, &query_vector, settings.hyde_blend_weight)
        } else {
            query_vector.clone()
        };

        let mut representations = vec![Representation {
            text: query.to_string(),
            vector: primary,
        }];
        representations.extend(variants.into_iter().zip(vectors).map(|(text, vector)| Representation {
            text: text.clone(),
            vector,
        }));
        Ok((representations, query_vector))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_log(
        &self,
        user_id: &str,
        query: &str,
        options: &RetrievalOptions,
        settings: &RagSettings,
        results: &[HybridSearchResult],
        note_count: usize,
        report: &mut RunReport,
    ) -> RagQueryLog {
        let cosine: Vec<f32> = results
            .iter()
            .map(|r| r.vector_score)
            .filter(|s| *s > 0.0)
            .collect();
        let rerank: Vec<f32> = results.iter().filter_map(|r| r.relevance_score).collect();

        let mut log = RagQueryLog::new(user_id, query);
        log.conversation_id = options.conversation_id.clone();
        log.timings = report.timings.clone();
        log.retrieved_count = report.retrieved_count as u32;
        log.final_count = note_count as u32;
        log.scores = ScoreSummary::from_scores(&cosine, &rerank);
        log.features = settings.active_features();
        log.degraded_stages = report.degraded.clone();
        log.hyde_key_concepts = std::mem::take(&mut report.key_concepts);
        log.query_embedding = report.query_embedding.take();
        log
    }
}
