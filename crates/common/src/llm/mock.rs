//! Scripted provider for tests

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{GenerationOptions, GenerativeProvider, ProviderId, ResponseSchema};
use crate::errors::{AppError, Result};

type Responder = Box<dyn Fn(&str) -> Value + Send + Sync>;
type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Answers by schema name with scripted closures over the prompt
pub struct MockProvider {
    id: ProviderId,
    responders: Vec<(&'static str, Responder)>,
    failures: Vec<(&'static str, Predicate)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<(String, String)>>,
}

impl MockProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: ProviderId::new(id),
            responders: Vec::new(),
            failures: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Respond to requests for `schema` with `f(prompt)`
    pub fn respond_when<F>(mut self, schema: &'static str, f: F) -> Self
    where
        F: Fn(&str) -> Value + Send + Sync + 'static,
    {
        self.responders.push((schema, Box::new(f)));
        self
    }

    /// Fail requests for `schema` whose prompt satisfies `pred`
    pub fn fail_when<F>(mut self, schema: &'static str, pred: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.failures.push((schema, Box::new(pred)));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls made for one schema
    pub fn calls_for(&self, schema: &str) -> usize {
        self.prompts
            .lock()
            .map(|p| p.iter().filter(|(s, _)| s == schema).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl GenerativeProvider for MockProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn complete_json(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
        _options: &GenerationOptions,
    ) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((schema.name.to_string(), prompt.to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .failures
            .iter()
            .any(|(name, pred)| *name == schema.name && pred(prompt))
        {
            return Err(AppError::Provider {
                provider: self.id.to_string(),
                message: "scripted failure".to_string(),
            });
        }

        self.responders
            .iter()
            .find(|(name, _)| *name == schema.name)
            .map(|(_, f)| f(prompt))
            .ok_or_else(|| AppError::Provider {
                provider: self.id.to_string(),
                message: format!("no scripted response for {}", schema.name),
            })
    }
}
