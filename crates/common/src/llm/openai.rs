//! OpenAI-compatible chat completions adapter
//!
//! Serves OpenAI, Grok, Ollama and Gemini's compatibility endpoint. The
//! neutral `ResponseSchema` is sent as a `json_schema` response format.

use async_trait::async_trait;
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{GenerationOptions, GenerativeProvider, ProviderId, ProviderKind, ResponseSchema};
use crate::config::GenerationProviderConfig;
use crate::errors::{AppError, Result};

/// Client-side limiter shared by all calls to one provider
pub type ProviderRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<ProviderRateLimiter> {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rps);
    Arc::new(RateLimiter::direct(Quota::per_second(rps).allow_burst(burst)))
}

pub struct OpenAICompatibleProvider {
    id: ProviderId,
    kind: ProviderKind,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    limiter: Arc<ProviderRateLimiter>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(kind: ProviderKind, config: &GenerationProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            id: ProviderId::new(&config.id),
            kind,
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| kind.default_base_url().to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            limiter: create_rate_limiter(
                config.requests_per_second,
                config.requests_per_second.saturating_mul(2),
            ),
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn provider_error(&self, message: impl Into<String>) -> AppError {
        AppError::Provider {
            provider: self.id.to_string(),
            message: message.into(),
        }
    }
}

/// Strip a markdown code fence some models wrap around JSON
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl GenerativeProvider for OpenAICompatibleProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn complete_json(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
        options: &GenerationOptions,
    ) -> Result<Value> {
        self.limiter.until_ready().await;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = options.system_prompt.as_deref() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: prompt });

        let request = ChatRequest {
            model: options.model.as_deref().unwrap_or(self.model.as_str()),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.to_json_schema(),
                    "strict": false,
                }
            }),
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::ProviderTimeout {
                    provider: self.id.to_string(),
                    timeout_ms: options.timeout.as_millis() as u64,
                }
            } else {
                self.provider_error(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimited {
                provider: self.id.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.provider_error(format!("API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.provider_error(format!("Failed to parse response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| self.provider_error("Empty completion"))?;

        serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| self.provider_error(format!("Completion is not valid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_rate_limiter(0, 0);
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_default_base_url_per_kind() {
        let config = GenerationProviderConfig {
            id: "grok".into(),
            kind: "grok".into(),
            ..GenerationProviderConfig::default()
        };
        let provider = OpenAICompatibleProvider::new(ProviderKind::Grok, &config).unwrap();
        assert_eq!(provider.base_url, "https://api.x.ai/v1");
        assert_eq!(provider.kind(), ProviderKind::Grok);
    }
}
