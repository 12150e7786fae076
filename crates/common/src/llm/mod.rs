//! Generative provider abstraction
//!
//! The pipeline only ever asks providers for schema-constrained JSON.
//! `generate_structured` is the soft entry point: any failure (transport,
//! timeout, malformed output) is logged and turned into `None`.

mod mock;
mod openai;
mod registry;
pub mod schema;

pub use mock::MockProvider;
pub use openai::OpenAICompatibleProvider;
pub use registry::{ProviderId, ProviderKind, ProviderRegistry};
pub use schema::{schemas, ResponseSchema, SchemaKind, SchemaProperty};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

use crate::errors::{AppError, Result};
use crate::metrics;

/// Per-call generation options
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Overrides the provider's configured model
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: None,
            system_prompt: None,
            temperature: 0.2,
            max_tokens: 512,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GenerationOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A chat-style model able to answer with JSON matching a schema
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    async fn complete_json(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
        options: &GenerationOptions,
    ) -> Result<serde_json::Value>;
}

/// Time-bounded, schema-checked structured generation.
pub async fn try_generate_structured<T: DeserializeOwned>(
    provider: &dyn GenerativeProvider,
    prompt: &str,
    schema: &ResponseSchema,
    options: &GenerationOptions,
) -> Result<T> {
    let start = Instant::now();
    let result = match tokio::time::timeout(
        options.timeout,
        provider.complete_json(prompt, schema, options),
    )
    .await
    {
        Ok(Ok(value)) => schema
            .check(&value)
            .and_then(|_| serde_json::from_value::<T>(value).map_err(AppError::from)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AppError::ProviderTimeout {
            provider: provider.id().to_string(),
            timeout_ms: options.timeout.as_millis() as u64,
        }),
    };
    metrics::record_generation(provider.id().as_str(), schema.name, start.elapsed(), result.is_ok());
    result
}

/// Like [`try_generate_structured`] but never fails: errors become `None`.
pub async fn generate_structured<T: DeserializeOwned>(
    provider: &dyn GenerativeProvider,
    prompt: &str,
    schema: &ResponseSchema,
    options: &GenerationOptions,
) -> Option<T> {
    match try_generate_structured(provider, prompt, schema, options).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                provider = %provider.id(),
                schema = schema.name,
                error = %e,
                "Structured generation failed"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Score {
        score: f32,
    }

    #[tokio::test]
    async fn test_generate_structured_parses_response() {
        let provider = MockProvider::new("mock").respond_when("rerank_score", |_| json!({ "score": 7.5 }));
        let out: Option<Score> = generate_structured(
            &provider,
            "q",
            &schemas().rerank_score,
            &GenerationOptions::default(),
        )
        .await;
        assert_eq!(out.map(|s| s.score), Some(7.5));
    }

    #[tokio::test]
    async fn test_schema_violation_becomes_none() {
        let provider = MockProvider::new("mock").respond_when("rerank_score", |_| json!({ "reasoning": "n/a" }));
        let out: Option<Score> = generate_structured(
            &provider,
            "q",
            &schemas().rerank_score,
            &GenerationOptions::default(),
        )
        .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let provider = MockProvider::new("slow")
            .respond_when("rerank_score", |_| json!({ "score": 1.0 }))
            .with_delay(Duration::from_millis(200));
        let options = GenerationOptions::default().with_timeout(Duration::from_millis(20));
        let err = try_generate_structured::<Score>(&provider, "q", &schemas().rerank_score, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProviderTimeout { .. }));
    }
}
