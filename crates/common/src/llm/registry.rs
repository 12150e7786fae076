//! Provider registry
//!
//! Built once at startup from configuration. Lookups are by `ProviderId`;
//! nothing is resolved by type at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{GenerativeProvider, OpenAICompatibleProvider};
use crate::config::GenerationProviderConfig;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backends reachable through an OpenAI-compatible chat completions API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Grok,
    Ollama,
    Gemini,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "grok" | "xai" => Ok(ProviderKind::Grok),
            "ollama" => Ok(ProviderKind::Ollama),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(AppError::Configuration {
                message: format!("unsupported generative provider kind '{}'", other),
            }),
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::Grok => "https://api.x.ai/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    /// Local backends run without credentials
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

struct Entry {
    provider: Arc<dyn GenerativeProvider>,
    enabled: bool,
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<ProviderId, Entry>,
    order: Vec<ProviderId>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured provider
    pub fn from_config(configs: &[GenerationProviderConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let kind = ProviderKind::parse(&config.kind)?;
            let enabled = config.enabled && (!kind.requires_api_key() || config.api_key.is_some());
            if config.enabled && !enabled {
                tracing::warn!(provider = %config.id, "Provider enabled without API key, disabling");
            }
            let provider = OpenAICompatibleProvider::new(kind, config)?;
            registry.register(Arc::new(provider), enabled);
        }
        tracing::info!(
            providers = ?registry.enabled_providers(),
            "Generative provider registry built"
        );
        Ok(registry)
    }

    /// Register a provider; re-registering an id replaces it in place
    pub fn register(&mut self, provider: Arc<dyn GenerativeProvider>, enabled: bool) {
        let id = provider.id().clone();
        if !self.entries.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.entries.insert(id, Entry { provider, enabled });
    }

    /// Enabled providers in registration order
    pub fn enabled_providers(&self) -> Vec<ProviderId> {
        self.order
            .iter()
            .filter(|id| self.entries.get(*id).map(|e| e.enabled).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn GenerativeProvider>> {
        self.entries
            .get(&ProviderId::new(id))
            .filter(|e| e.enabled)
            .map(|e| e.provider.clone())
    }

    /// The preferred provider if enabled, else the first enabled one
    pub fn resolve(&self, preferred: Option<&str>) -> Option<Arc<dyn GenerativeProvider>> {
        if let Some(id) = preferred {
            if let Some(provider) = self.get(id) {
                return Some(provider);
            }
            tracing::debug!(preferred = id, "Preferred provider unavailable, falling back");
        }
        self.enabled_providers()
            .first()
            .and_then(|id| self.entries.get(id))
            .map(|e| e.provider.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_providers().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProvider::new("openai")), true);
        registry.register(Arc::new(MockProvider::new("ollama")), true);
        registry.register(Arc::new(MockProvider::new("gemini")), false);
        registry
    }

    #[test]
    fn test_enabled_providers_keep_registration_order() {
        let ids: Vec<String> = registry()
            .enabled_providers()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["openai", "ollama"]);
    }

    #[test]
    fn test_resolve_prefers_named_provider() {
        let registry = registry();
        assert_eq!(registry.resolve(Some("Ollama")).unwrap().id().as_str(), "ollama");
        // disabled falls back to first enabled
        assert_eq!(registry.resolve(Some("gemini")).unwrap().id().as_str(), "openai");
        assert_eq!(registry.resolve(None).unwrap().id().as_str(), "openai");
    }

    #[test]
    fn test_empty_registry_resolves_nothing() {
        assert!(ProviderRegistry::new().resolve(None).is_none());
    }

    #[test]
    fn test_from_config_disables_keyless_cloud_provider() {
        let configs = vec![
            GenerationProviderConfig {
                id: "openai".into(),
                kind: "openai".into(),
                api_key: None,
                ..GenerationProviderConfig::default()
            },
            GenerationProviderConfig {
                id: "local".into(),
                kind: "ollama".into(),
                api_key: None,
                ..GenerationProviderConfig::default()
            },
        ];
        let registry = ProviderRegistry::from_config(&configs).unwrap();
        let ids: Vec<String> = registry.enabled_providers().iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["local"]);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(ProviderKind::parse("anthropic").is_err());
    }
}
