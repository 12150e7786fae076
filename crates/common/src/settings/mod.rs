//! RAG settings and per-user overrides
//!
//! `RagSettings` holds the process-wide defaults loaded from configuration.
//! `UserRagPreferences` carries optional per-user overrides. The effective
//! settings for a request are produced by [`merge`], a pure function; the
//! global defaults are never mutated at runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::errors::Result;
use crate::store::PreferencesStore;

/// Effective retrieval and indexing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_cross_fields"))]
pub struct RagSettings {
    /// Target chunk size in tokens
    #[serde(default = "default_chunk_size")]
    #[validate(range(min = 32, max = 8192))]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in tokens
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Final number of results returned to the caller
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, max = 100))]
    pub top_k: usize,

    /// Minimum cosine similarity for vector candidates
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,

    /// RRF weight of the vector list
    #[serde(default = "default_vector_weight")]
    #[validate(range(min = 0.0))]
    pub vector_weight: f32,

    /// RRF weight of the lexical list
    #[serde(default = "default_bm25_weight")]
    #[validate(range(min = 0.0))]
    pub bm25_weight: f32,

    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    #[validate(range(min = 1.0))]
    pub rrf_k: f32,

    #[serde(default = "default_true")]
    pub enable_hyde: bool,

    #[serde(default = "default_true")]
    pub enable_query_expansion: bool,

    /// Alternative phrasings requested from the provider (original excluded)
    #[serde(default = "default_multi_query_count")]
    #[validate(range(min = 1, max = 10))]
    pub multi_query_count: usize,

    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,

    #[serde(default = "default_true")]
    pub enable_reranking: bool,

    #[serde(default = "default_true")]
    pub enable_analytics: bool,

    #[serde(default = "default_true")]
    pub enable_intent_detection: bool,

    /// Generative provider used for reranking (registry id)
    #[serde(default)]
    pub reranking_provider: Option<String>,

    /// Model override for reranking calls
    #[serde(default)]
    pub reranking_model: Option<String>,

    /// Generative provider used for HyDE and multi-query
    #[serde(default)]
    pub expansion_provider: Option<String>,

    /// Candidates kept after fusion, before reranking
    #[serde(default = "default_initial_retrieval_count")]
    #[validate(range(min = 1, max = 200))]
    pub initial_retrieval_count: usize,

    /// Reranked candidates scoring below this are discarded (0-10 scale)
    #[serde(default = "default_min_rerank_score")]
    #[validate(range(min = 0.0, max = 10.0))]
    pub min_rerank_score: f32,

    /// Upper bound on the assembled context, in characters
    #[serde(default = "default_max_context_length")]
    #[validate(range(min = 200))]
    pub max_context_length: usize,

    /// 1.0 uses the hypothetical document only, 0.0 the raw query only
    #[serde(default = "default_hyde_blend_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub hyde_blend_weight: f32,

    /// Timeout applied to every provider-backed stage
    #[serde(default = "default_stage_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub stage_timeout_secs: u64,

    /// Concurrent rerank scoring calls
    #[serde(default = "default_rerank_concurrency")]
    #[validate(range(min = 1, max = 32))]
    pub rerank_concurrency: usize,
}

fn default_chunk_size() -> usize { 500 }
fn default_chunk_overlap() -> usize { 100 }
fn default_top_k() -> usize { 5 }
fn default_similarity_threshold() -> f32 { 0.3 }
fn default_vector_weight() -> f32 { 0.7 }
fn default_bm25_weight() -> f32 { 0.3 }
fn default_rrf_k() -> f32 { 60.0 }
fn default_true() -> bool { true }
fn default_multi_query_count() -> usize { 3 }
fn default_initial_retrieval_count() -> usize { 20 }
fn default_min_rerank_score() -> f32 { 3.0 }
fn default_max_context_length() -> usize { 4000 }
fn default_hyde_blend_weight() -> f32 { 1.0 }
fn default_stage_timeout() -> u64 { 30 }
fn default_rerank_concurrency() -> usize { 4 }

fn validate_cross_fields(settings: &RagSettings) -> std::result::Result<(), ValidationError> {
    if settings.chunk_overlap >= settings.chunk_size {
        let mut err = ValidationError::new("chunk_overlap");
        err.message = Some("chunk_overlap must be smaller than chunk_size".into());
        return Err(err);
    }
    if settings.initial_retrieval_count < settings.top_k {
        let mut err = ValidationError::new("initial_retrieval_count");
        err.message = Some("initial_retrieval_count must be at least top_k".into());
        return Err(err);
    }
    if settings.vector_weight + settings.bm25_weight <= 0.0 {
        let mut err = ValidationError::new("weights");
        err.message = Some("vector_weight and bm25_weight cannot both be zero".into());
        return Err(err);
    }
    Ok(())
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            rrf_k: default_rrf_k(),
            enable_hyde: true,
            enable_query_expansion: true,
            multi_query_count: default_multi_query_count(),
            enable_hybrid_search: true,
            enable_reranking: true,
            enable_analytics: true,
            enable_intent_detection: true,
            reranking_provider: None,
            reranking_model: None,
            expansion_provider: None,
            initial_retrieval_count: default_initial_retrieval_count(),
            min_rerank_score: default_min_rerank_score(),
            max_context_length: default_max_context_length(),
            hyde_blend_weight: default_hyde_blend_weight(),
            stage_timeout_secs: default_stage_timeout(),
            rerank_concurrency: default_rerank_concurrency(),
        }
    }
}

impl RagSettings {
    /// Validate, mapping failures into `AppError::Validation`
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Feature flags active for a request, as recorded in query logs
    pub fn active_features(&self) -> Vec<String> {
        [
            ("hyde", self.enable_hyde),
            ("multi_query", self.enable_query_expansion),
            ("hybrid_search", self.enable_hybrid_search),
            ("reranking", self.enable_reranking),
            ("intent_detection", self.enable_intent_detection),
        ]
        .into_iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Per-user overrides; `None` inherits the global value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRagPreferences {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub vector_weight: Option<f32>,
    pub bm25_weight: Option<f32>,
    pub rrf_k: Option<f32>,
    pub enable_hyde: Option<bool>,
    pub enable_query_expansion: Option<bool>,
    pub multi_query_count: Option<usize>,
    pub enable_hybrid_search: Option<bool>,
    pub enable_reranking: Option<bool>,
    pub enable_analytics: Option<bool>,
    pub enable_intent_detection: Option<bool>,
    pub reranking_provider: Option<String>,
    pub reranking_model: Option<String>,
    pub expansion_provider: Option<String>,
    pub initial_retrieval_count: Option<usize>,
    pub min_rerank_score: Option<f32>,
    pub max_context_length: Option<usize>,
}

/// Overlay user overrides on the global defaults.
pub fn merge(global: &RagSettings, overrides: &UserRagPreferences) -> RagSettings {
    let mut s = global.clone();
    macro_rules! overlay {
        ($($field:ident),* $(,)?) => {
            $(if let Some(v) = overrides.$field.clone() { s.$field = v; })*
        };
    }
    overlay!(
        chunk_size,
        chunk_overlap,
        top_k,
        similarity_threshold,
        vector_weight,
        bm25_weight,
        rrf_k,
        enable_hyde,
        enable_query_expansion,
        multi_query_count,
        enable_hybrid_search,
        enable_reranking,
        enable_analytics,
        enable_intent_detection,
        initial_retrieval_count,
        min_rerank_score,
        max_context_length,
    );
    if overrides.reranking_provider.is_some() {
        s.reranking_provider = overrides.reranking_provider.clone();
    }
    if overrides.reranking_model.is_some() {
        s.reranking_model = overrides.reranking_model.clone();
    }
    if overrides.expansion_provider.is_some() {
        s.expansion_provider = overrides.expansion_provider.clone();
    }
    s
}

/// Read-only source of effective settings
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn effective_rag_settings(&self, user_id: &str) -> Result<RagSettings>;
}

/// Global defaults overlaid with stored user preferences
pub struct LayeredSettingsSource {
    global: RagSettings,
    preferences: Arc<dyn PreferencesStore>,
}

impl LayeredSettingsSource {
    pub fn new(global: RagSettings, preferences: Arc<dyn PreferencesStore>) -> Self {
        Self { global, preferences }
    }

    pub fn global(&self) -> &RagSettings {
        &self.global
    }
}

#[async_trait]
impl SettingsSource for LayeredSettingsSource {
    async fn effective_rag_settings(&self, user_id: &str) -> Result<RagSettings> {
        let merged = match self.preferences.get_preferences(user_id).await? {
            Some(prefs) => merge(&self.global, &prefs),
            None => self.global.clone(),
        };
        merged.validated()
    }
}

/// Fixed settings for every user
pub struct StaticSettingsSource(pub RagSettings);

#[async_trait]
impl SettingsSource for StaticSettingsSource {
    async fn effective_rag_settings(&self, _user_id: &str) -> Result<RagSettings> {
        self.0.clone().validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::store::memory::InMemoryStore;

    #[test]
    fn test_defaults_are_valid() {
        let settings = RagSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.rrf_k, 60.0);
        assert_eq!(settings.vector_weight, 0.7);
        assert_eq!(settings.bm25_weight, 0.3);
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let settings = RagSettings { top_k: 0, ..Default::default() };
        assert!(matches!(settings.validated(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let settings = RagSettings {
            chunk_size: 200,
            chunk_overlap: 200,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_initial_count_below_top_k_rejected() {
        let settings = RagSettings {
            top_k: 10,
            initial_retrieval_count: 5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_merge_overlays_only_set_fields() {
        let global = RagSettings::default();
        let prefs = UserRagPreferences {
            top_k: Some(8),
            enable_hyde: Some(false),
            reranking_provider: Some("ollama".into()),
            ..Default::default()
        };
        let merged = merge(&global, &prefs);
        assert_eq!(merged.top_k, 8);
        assert!(!merged.enable_hyde);
        assert_eq!(merged.reranking_provider.as_deref(), Some("ollama"));
        assert_eq!(merged.chunk_size, global.chunk_size);
        // global untouched
        assert!(global.enable_hyde);
    }

    #[test]
    fn test_merge_with_empty_overrides_is_identity() {
        let global = RagSettings::default();
        assert_eq!(merge(&global, &UserRagPreferences::default()), global);
    }

    #[tokio::test]
    async fn test_layered_source_uses_stored_preferences() {
        let store = Arc::new(InMemoryStore::new());
        store
            .save_preferences(
                "u1",
                &UserRagPreferences {
                    top_k: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let source = LayeredSettingsSource::new(RagSettings::default(), store);

        assert_eq!(source.effective_rag_settings("u1").await.unwrap().top_k, 3);
        assert_eq!(source.effective_rag_settings("u2").await.unwrap().top_k, 5);
    }

    #[tokio::test]
    async fn test_layered_source_rejects_invalid_override() {
        let store = Arc::new(InMemoryStore::new());
        store
            .save_preferences(
                "u1",
                &UserRagPreferences {
                    top_k: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let source = LayeredSettingsSource::new(RagSettings::default(), store);
        assert!(source.effective_rag_settings("u1").await.is_err());
    }
}
