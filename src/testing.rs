//! Test doubles for the external capabilities.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::PromptBundle;
use crate::gateway::{GatewayError, GenerateOptions, LanguageModel};
use crate::retrieval::{KnowledgeRetrieval, RetrievalError, Snippet};

/// Language model that answers `response from <role>` and records every call.
#[derive(Default)]
pub struct ScriptedModel {
    failures: Mutex<HashMap<String, (usize, GatewayError)>>,
    replies: HashMap<String, String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(PromptBundle, GenerateOptions)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls for `role` fail with `err`.
    pub fn fail(self, role: &str, times: usize, err: GatewayError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(role.to_string(), (times, err));
        self
    }

    pub fn reply(mut self, role: &str, text: &str) -> Self {
        self.replies.insert(role.to_string(), text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(PromptBundle, GenerateOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prompts_for(&self, role: &str) -> Vec<PromptBundle> {
        self.calls()
            .into_iter()
            .filter(|(p, _)| p.role == role)
            .map(|(p, _)| p)
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        prompt: &PromptBundle,
        options: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.clone(), *options));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&prompt.role) {
                Some((remaining, err)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(err.clone())
                }
                _ => None,
            }
        };
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(self
            .replies
            .get(&prompt.role)
            .cloned()
            .unwrap_or_else(|| format!("response from {}", prompt.role)))
    }
}

/// Knowledge backend returning a fixed snippet list, or always failing.
pub struct FixedKnowledge {
    pub snippets: Vec<Snippet>,
    pub unavailable: bool,
}

impl FixedKnowledge {
    pub fn with(source: &str, text: &str) -> Self {
        Self {
            snippets: vec![Snippet {
                source: source.to_string(),
                text: text.to_string(),
                score: 0.9,
                scope: None,
            }],
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            snippets: Vec::new(),
            unavailable: true,
        }
    }
}

#[async_trait]
impl KnowledgeRetrieval for FixedKnowledge {
    async fn search(
        &self,
        _query: &str,
        _scope: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<Snippet>, RetrievalError> {
        if self.unavailable {
            return Err(RetrievalError::Unavailable("index offline".to_string()));
        }
        Ok(self.snippets.iter().take(top_k).cloned().collect())
    }
}
