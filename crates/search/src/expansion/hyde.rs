//! Hypothetical Document Embeddings

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use secondbrain_common::llm::{generate_structured, schemas};
use secondbrain_common::settings::RagSettings;

use super::QueryExpander;

const HYDE_SYSTEM_PROMPT: &str = "You write short passages in the style of a personal note. \
Answer as if quoting the user's own notes; do not mention that the passage is hypothetical.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HydeResponse {
    document: String,
    #[serde(default)]
    key_concepts: Vec<String>,
}

/// Outcome of a HyDE expansion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydeExpansion {
    pub success: bool,

    /// Hypothetical passage to embed in place of the query
    pub document: Option<String>,

    pub key_concepts: Vec<String>,
}

impl HydeExpansion {
    fn failed() -> Self {
        Self::default()
    }
}

fn hyde_prompt(query: &str) -> String {
    format!(
        "Write a passage of 3 to 6 sentences that would appear in a note answering \
         the question below. Be concrete and use the vocabulary such a note would use.\n\n\
         Question: {}",
        query
    )
}

impl QueryExpander {
    /// Generate a hypothetical answer document for `query`
    #[instrument(skip(self, settings))]
    pub async fn expand_with_hyde(&self, query: &str, settings: &RagSettings) -> HydeExpansion {
        if !settings.enable_hyde {
            return HydeExpansion::failed();
        }
        let Some(provider) = self.provider(settings) else {
            debug!("No generative provider enabled, skipping HyDE");
            return HydeExpansion::failed();
        };

        let options = Self::options(settings)
            .with_system_prompt(HYDE_SYSTEM_PROMPT)
            .with_temperature(0.7);

        let response: Option<HydeResponse> =
            generate_structured(provider.as_ref(), &hyde_prompt(query), &schemas().hyde, &options).await;

        match response {
            Some(r) if !r.document.trim().is_empty() => {
                debug!(concepts = r.key_concepts.len(), "HyDE document generated");
                HydeExpansion {
                    success: true,
                    document: Some(r.document),
                    key_concepts: r.key_concepts,
                }
            }
            Some(_) => {
                warn!("HyDE returned an empty document");
                HydeExpansion::failed()
            }
            None => HydeExpansion::failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secondbrain_common::llm::{MockProvider, ProviderRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn expander(provider: MockProvider) -> QueryExpander {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider), true);
        QueryExpander::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_hyde_success() {
        let expander = expander(MockProvider::new("mock").respond_when("hyde", |_| {
            json!({ "document": "Borrowing lets you reference data without owning it.", "keyConcepts": ["borrowing"] })
        }));

        let result = expander.expand_with_hyde("what is borrowing", &RagSettings::default()).await;
        assert!(result.success);
        assert_eq!(result.key_concepts, vec!["borrowing"]);
    }

    #[tokio::test]
    async fn test_hyde_failure_is_soft() {
        let expander = expander(MockProvider::new("mock").fail_when("hyde", |_| true));
        let result = expander.expand_with_hyde("what is borrowing", &RagSettings::default()).await;
        assert!(!result.success);
        assert!(result.document.is_none());
    }

    #[tokio::test]
    async fn test_hyde_disabled_makes_no_call() {
        let provider = Arc::new(MockProvider::new("mock"));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone(), true);
        let expander = QueryExpander::new(Arc::new(registry));
        let settings = RagSettings {
            enable_hyde: false,
            ..RagSettings::default()
        };

        assert!(!expander.expand_with_hyde("q", &settings).await.success);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_hyde_without_provider() {
        let expander = QueryExpander::new(Arc::new(ProviderRegistry::new()));
        assert!(!expander.expand_with_hyde("q", &RagSettings::default()).await.success);
    }
}
