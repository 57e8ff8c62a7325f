use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::context::PromptBundle;
use crate::gateway::{GatewayError, GenerateOptions, LanguageModel};
use crate::retrieval::{KnowledgeRetrieval, RetrievalError, Snippet};

/// Model capability tier an agent unit is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Standard,
    Premium,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Fast => write!(f, "fast"),
            ModelTier::Standard => write!(f, "standard"),
            ModelTier::Premium => write!(f, "premium"),
        }
    }
}

/// What backs an agent unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Answers through the language model gateway.
    Model,
    /// Answers with ranked snippets from knowledge retrieval.
    Retrieval,
}

/// A routing keyword and the weight it contributes when matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub term: String,
    pub weight: u32,
}

/// A registered capability: a role instruction, a routing signature and a model tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUnit {
    pub role: String,
    pub instruction: String,
    pub keywords: Vec<Keyword>,
    pub tier: ModelTier,
    pub kind: AgentKind,
}

impl AgentUnit {
    pub fn model(role: &str, instruction: &str, tier: ModelTier, keywords: &[(&str, u32)]) -> Self {
        Self {
            role: role.to_string(),
            instruction: instruction.to_string(),
            keywords: keywords
                .iter()
                .map(|&(term, weight)| Keyword {
                    term: term.to_string(),
                    weight,
                })
                .collect(),
            tier,
            kind: AgentKind::Model,
        }
    }

    pub fn retrieval(role: &str, instruction: &str, keywords: &[(&str, u32)]) -> Self {
        Self {
            kind: AgentKind::Retrieval,
            ..Self::model(role, instruction, ModelTier::Fast, keywords)
        }
    }

    pub fn is_retrieval(&self) -> bool {
        self.kind == AgentKind::Retrieval
    }
}

/// Distinguishes failures worth a second attempt from those that are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Rate limits, timeouts, overloaded or unreachable backends.
    Transient,
    /// Rejected requests, misconfiguration.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// A capability failure, classified at the agent boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("agent '{role}' failed ({kind}): {message}")]
pub struct AgentError {
    pub role: String,
    pub kind: FailureKind,
    pub message: String,
}

impl AgentError {
    fn from_gateway(role: &str, err: GatewayError) -> Self {
        let kind = if err.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };
        Self {
            role: role.to_string(),
            kind,
            message: err.to_string(),
        }
    }

    fn from_retrieval(role: &str, err: RetrievalError) -> Self {
        Self {
            role: role.to_string(),
            kind: FailureKind::Transient,
            message: err.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// External capabilities agent units call into.
#[derive(Clone)]
pub struct Backends {
    pub model: Arc<dyn LanguageModel>,
    pub knowledge: Option<Arc<dyn KnowledgeRetrieval>>,
}

/// Everything one invocation needs besides the unit itself.
#[derive(Debug, Clone)]
pub struct UnitInput<'a> {
    pub request: &'a str,
    /// Rendered context bundle; kept apart from `request`.
    pub context: String,
    pub scope: &'a [String],
    pub top_k: usize,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// What a unit produced.
#[derive(Debug, Clone, Default)]
pub struct UnitOutput {
    pub text: String,
    /// Only populated by retrieval units.
    pub snippets: Vec<Snippet>,
}

impl AgentUnit {
    /// Runs the unit once. Every backend error comes back classified.
    pub async fn invoke(
        &self,
        backends: &Backends,
        input: UnitInput<'_>,
    ) -> Result<UnitOutput, AgentError> {
        debug!(role = %self.role, kind = ?self.kind, "invoking agent unit");
        match self.kind {
            AgentKind::Model => self.generate(backends.model.as_ref(), input).await,
            AgentKind::Retrieval => match &backends.knowledge {
                Some(knowledge) => self.retrieve(knowledge.as_ref(), input).await,
                None => Err(AgentError {
                    role: self.role.clone(),
                    kind: FailureKind::Permanent,
                    message: "no knowledge retrieval backend configured".to_string(),
                }),
            },
        }
    }

    async fn generate(
        &self,
        model: &dyn LanguageModel,
        input: UnitInput<'_>,
    ) -> Result<UnitOutput, AgentError> {
        let prompt = PromptBundle {
            role: self.role.clone(),
            instruction: self.instruction.clone(),
            context: input.context,
            request: input.request.to_string(),
        };
        let options = GenerateOptions {
            tier: self.tier,
            max_tokens: input.max_tokens,
        };

        let text = tokio::time::timeout(input.timeout, model.generate(&prompt, &options))
            .await
            .map_err(|_| GatewayError::Timeout)
            .and_then(|r| r)
            .map_err(|e| AgentError::from_gateway(&self.role, e))?;

        Ok(UnitOutput {
            text,
            snippets: Vec::new(),
        })
    }

    async fn retrieve(
        &self,
        knowledge: &dyn KnowledgeRetrieval,
        input: UnitInput<'_>,
    ) -> Result<UnitOutput, AgentError> {
        let scopes: Vec<Option<&str>> = if input.scope.is_empty() {
            vec![None]
        } else {
            input.scope.iter().map(|s| Some(s.as_str())).collect()
        };

        let mut snippets = Vec::new();
        for scope in scopes {
            let found = tokio::time::timeout(
                input.timeout,
                knowledge.search(input.request, scope, input.top_k),
            )
            .await
            .map_err(|_| RetrievalError::Unavailable("search timed out".to_string()))
            .and_then(|r| r)
            .map_err(|e| AgentError::from_retrieval(&self.role, e))?;
            snippets.extend(found);
        }
        snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
        snippets.truncate(input.top_k);

        Ok(UnitOutput {
            text: format_snippets(&snippets),
            snippets,
        })
    }
}

fn format_snippets(snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return "No relevant background knowledge found.".to_string();
    }
    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{}] {} (score {:.2}): {}", i + 1, s.source, s.score, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}
