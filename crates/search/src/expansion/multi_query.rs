//! Multi-query expansion

use serde::Deserialize;
use tracing::{debug, instrument};

use secondbrain_common::llm::{generate_structured, schemas};
use secondbrain_common::settings::RagSettings;

use super::QueryExpander;

#[derive(Debug, Deserialize)]
struct MultiQueryResponse {
    queries: Vec<String>,
    #[serde(default)]
    explanation: Option<String>,
}

/// Query variants to search; the original query is always first
#[derive(Debug, Clone, PartialEq)]
pub struct MultiQueryExpansion {
    pub queries: Vec<String>,

    pub success: bool,

    pub explanation: Option<String>,
}

impl MultiQueryExpansion {
    fn original_only(query: &str) -> Self {
        Self {
            queries: vec![query.to_string()],
            success: false,
            explanation: None,
        }
    }
}

fn multi_query_prompt(query: &str, count: usize) -> String {
    format!(
        "Rewrite the search query below in {} different ways to find related notes. \
         Vary vocabulary and specificity; keep the meaning. Do not repeat the original.\n\n\
         Query: {}",
        count, query
    )
}

/// Original first, then distinct non-empty variants, capped at `count` extras
fn assemble(query: &str, variants: Vec<String>, count: usize) -> Vec<String> {
    let mut queries = vec![query.to_string()];
    let mut seen = vec![query.trim().to_lowercase()];
    for variant in variants {
        let variant = variant.trim();
        if variant.is_empty() {
            continue;
        }
        let key = variant.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        queries.push(variant.to_string());
        if queries.len() > count {
            break;
        }
    }
    queries
}

impl QueryExpander {
    /// Ask for `multi_query_count` alternative phrasings of `query`
    #[instrument(skip(self, settings))]
    pub async fn expand_multi_query(&self, query: &str, settings: &RagSettings) -> MultiQueryExpansion {
        if !settings.enable_query_expansion {
            return MultiQueryExpansion::original_only(query);
        }
        let Some(provider) = self.provider(settings) else {
            debug!("No generative provider enabled, skipping multi-query");
            return MultiQueryExpansion::original_only(query);
        };

        let count = settings.multi_query_count;
        let response: Option<MultiQueryResponse> = generate_structured(
            provider.as_ref(),
            &multi_query_prompt(query, count),
            &schemas().multi_query,
            &Self::options(settings).with_temperature(0.5),
        )
        .await;

        match response {
            Some(r) => {
                let queries = assemble(query, r.queries, count);
                debug!(variants = queries.len() - 1, "Multi-query expansion complete");
                MultiQueryExpansion {
                    success: queries.len() > 1,
                    queries,
                    explanation: r.explanation,
                }
            }
            None => MultiQueryExpansion::original_only(query),
        }
    }
}
