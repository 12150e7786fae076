//! Query intent gate
//!
//! Decides cheaply whether a chat message needs the user's notes at all.
//! Commands ("create a note about X") and small talk skip retrieval;
//! questions and recall requests retrieve. Ambiguous messages are sent to
//! a generative provider when one is available, otherwise they retrieve.

use std::sync::Arc;

use regex_lite::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use secondbrain_common::errors::{AppError, Result};
use secondbrain_common::llm::{generate_structured, schemas, GenerationOptions, ProviderRegistry};
use secondbrain_common::settings::RagSettings;

const RECALL_PATTERN: &str = r"(?i)\b(my notes?|in my|i (wrote|noted|saved|mentioned|said)|remind me|what did i|did i|have i|search|look up|find|recall|remember)\b";

const QUESTION_PATTERN: &str = r"(?i)^(what|who|whom|whose|when|where|why|how|which|is|are|was|were|do|does|did|can|could|should|would|tell me|explain|summari[sz]e|list|compare|describe)\b";

const ACTION_PATTERN: &str = r"(?i)^(please\s+)?(create|make|add|write|draft|delete|remove|rename|update|edit|schedule|set|translate|generate|compose|send|start|open|close|move|tag|archive)\b";

const SMALL_TALK_PATTERN: &str = r"(?i)^(hi|hello|hey|yo|thanks|thank you|thx|ok|okay|cool|great|bye|goodbye|good (morning|afternoon|evening|night))[\s!.]*$";

/// How the decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentSource {
    Heuristic,
    Model,
    /// Ambiguous and no model answer; retrieval is the safe default
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentDecision {
    pub needs_retrieval: bool,
    pub reason: String,
    pub source: IntentSource,
}

impl IntentDecision {
    fn heuristic(needs_retrieval: bool, reason: &str) -> Self {
        Self {
            needs_retrieval,
            reason: reason.to_string(),
            source: IntentSource::Heuristic,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentResponse {
    needs_retrieval: bool,
    #[serde(default)]
    reason: Option<String>,
}

pub struct IntentDetector {
    recall: Regex,
    question: Regex,
    action: Regex,
    small_talk: Regex,
    providers: Option<Arc<ProviderRegistry>>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Internal {
        message: format!("invalid intent pattern: {}", e),
    })
}

impl IntentDetector {
    /// `providers` enables model confirmation of ambiguous messages
    pub fn new(providers: Option<Arc<ProviderRegistry>>) -> Result<Self> {
        Ok(Self {
            recall: compile(RECALL_PATTERN)?,
            question: compile(QUESTION_PATTERN)?,
            action: compile(ACTION_PATTERN)?,
            small_talk: compile(SMALL_TALK_PATTERN)?,
            providers,
        })
    }

    /// Heuristic classification; `None` when the message is ambiguous
    pub fn classify(&self, query: &str) -> Option<IntentDecision> {
        let query = query.trim();
        if query.is_empty() {
            return Some(IntentDecision::heuristic(false, "empty message"));
        }
        if self.small_talk.is_match(query) {
            return Some(IntentDecision::heuristic(false, "small talk"));
        }
        // a leading command verb wins over recall phrasing later in the message
        if self.action.is_match(query) {
            return Some(IntentDecision::heuristic(false, "action command"));
        }
        if self.recall.is_match(query) {
            return Some(IntentDecision::heuristic(true, "recall request"));
        }
        if query.ends_with('?') || self.question.is_match(query) {
            return Some(IntentDecision::heuristic(true, "question"));
        }
        None
    }

    /// Full decision, consulting a model for ambiguous messages
    #[instrument(skip(self, settings))]
    pub async fn detect(&self, query: &str, settings: &RagSettings) -> IntentDecision {
        if let Some(decision) = self.classify(query) {
            debug!(needs_retrieval = decision.needs_retrieval, reason = %decision.reason, "Intent classified");
            return decision;
        }

        let provider = self
            .providers
            .as_ref()
            .and_then(|p| p.resolve(settings.expansion_provider.as_deref()));
        if let Some(provider) = provider {
            let prompt = format!(
                "Does answering this message require searching the user's personal notes? \
                 Commands that create or change content do not.\n\nMessage: {}",
                query
            );
            let options = GenerationOptions::default()
                .with_timeout(settings.stage_timeout())
                .with_temperature(0.0)
                .with_max_tokens(64);
            let response: Option<IntentResponse> =
                generate_structured(provider.as_ref(), &prompt, &schemas().intent, &options).await;
            if let Some(r) = response {
                return IntentDecision {
                    needs_retrieval: r.needs_retrieval,
                    reason: r.reason.unwrap_or_else(|| "model decision".to_string()),
                    source: IntentSource::Model,
                };
            }
        }

        IntentDecision {
            needs_retrieval: true,
            reason: "ambiguous".to_string(),
            source: IntentSource::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secondbrain_common::llm::MockProvider;
    use serde_json::json;

    fn detector() -> IntentDetector {
        IntentDetector::new(None).unwrap()
    }

    #[test]
    fn test_recall_question_retrieves() {
        let d = detector().classify("What is in my notes about sourdough?").unwrap();
        assert!(d.needs_retrieval);
    }

    #[test]
    fn test_action_command_skips() {
        let d = detector().classify("Create a note about sourdough").unwrap();
        assert!(!d.needs_retrieval);
        assert_eq!(d.reason, "action command");
    }

    #[test]
    fn test_command_on_my_notes_skips() {
        for query in ["Delete my notes about sourdough", "please remove what I wrote about taxes"] {
            let d = detector().classify(query).unwrap();
            assert!(!d.needs_retrieval, "{}", query);
            assert_eq!(d.reason, "action command");
        }
        // recall verbs are not commands
        assert!(detector().classify("Find my notes about sourdough").unwrap().needs_retrieval);
    }

    #[test]
    fn test_action_with_recall_retrieves() {
        let d = detector()
            .classify("Summarize what I wrote about Rust lifetimes")
            .unwrap();
        assert!(d.needs_retrieval);
    }

    #[test]
    fn test_small_talk_skips() {
        assert!(!detector().classify("thanks!").unwrap().needs_retrieval);
        assert!(!detector().classify("Good morning").unwrap().needs_retrieval);
    }

    #[test]
    fn test_plain_questions_retrieve() {
        assert!(detector().classify("how does RRF work").unwrap().needs_retrieval);
        assert!(detector().classify("sourdough hydration?").unwrap().needs_retrieval);
    }

    #[tokio::test]
    async fn test_ambiguous_defaults_to_retrieval() {
        let d = detector().detect("sourdough hydration ratios", &RagSettings::default()).await;
        assert!(d.needs_retrieval);
        assert_eq!(d.source, IntentSource::Default);
    }

    #[tokio::test]
    async fn test_ambiguous_asks_model() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            Arc::new(MockProvider::new("mock").respond_when("intent", |_| json!({ "needsRetrieval": false }))),
            true,
        );
        let detector = IntentDetector::new(Some(Arc::new(registry))).unwrap();

        let d = detector.detect("sourdough hydration ratios", &RagSettings::default()).await;
        assert!(!d.needs_retrieval);
        assert_eq!(d.source, IntentSource::Model);
    }
}
