//! Query expansion
//!
//! Two independent techniques widen recall before search:
//! - HyDE: embed a generated passage that answers the query
//! - Multi-query: search several phrasings of the same question
//!
//! Both fail soft. A disabled flag, missing provider or bad response
//! yields a "not successful" result and the caller keeps the raw query.

mod hyde;
mod multi_query;

pub use hyde::HydeExpansion;
pub use multi_query::MultiQueryExpansion;

use std::sync::Arc;

use secondbrain_common::llm::{GenerationOptions, GenerativeProvider, ProviderRegistry};
use secondbrain_common::settings::RagSettings;

/// Expansion engine over the generative provider registry
#[derive(Clone)]
pub struct QueryExpander {
    providers: Arc<ProviderRegistry>,
}

impl QueryExpander {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// A provider is enabled for expansion; a failed expansion then counts as degraded
    pub fn is_available(&self, settings: &RagSettings) -> bool {
        self.provider(settings).is_some()
    }

    fn provider(&self, settings: &RagSettings) -> Option<Arc<dyn GenerativeProvider>> {
        self.providers.resolve(settings.expansion_provider.as_deref())
    }

    fn options(settings: &RagSettings) -> GenerationOptions {
        GenerationOptions::default().with_timeout(settings.stage_timeout())
    }
}
