use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ConversationTurn;

/// Strategy for combining agent invocations into one answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationMode {
    /// Units run in order, each seeing every earlier output.
    #[default]
    Sequential,
    /// Units run concurrently against one snapshot; all must succeed.
    Parallel,
    /// The first unit consults the others, then answers once.
    Collaborative,
    /// Two rounds of positions, reconciled by the synthesizer.
    Debate,
}

impl fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationMode::Sequential => write!(f, "sequential"),
            CoordinationMode::Parallel => write!(f, "parallel"),
            CoordinationMode::Collaborative => write!(f, "collaborative"),
            CoordinationMode::Debate => write!(f, "debate"),
        }
    }
}

/// Output of an earlier workflow phase, fed in as prior context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorOutput {
    pub label: String,
    pub text: String,
}

/// What a client asks the coordinator to do. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationRequest {
    pub query: String,
    #[serde(default)]
    pub mode: CoordinationMode,
    /// Explicit roles, in run order. `None` routes by confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<String>>,
    /// Knowledge scope identifiers passed to retrieval.
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub prior_outputs: Vec<PriorOutput>,
}

impl CoordinationRequest {
    pub fn new(query: impl Into<String>, mode: CoordinationMode) -> Self {
        Self {
            query: query.into(),
            mode,
            agents: None,
            scope: Vec::new(),
            history: Vec::new(),
            prior_outputs: Vec::new(),
        }
    }

    pub fn with_agents(mut self, roles: &[&str]) -> Self {
        self.agents = Some(roles.iter().map(|r| r.to_string()).collect());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Request,
    Response,
    Consultation,
    Delegation,
}

/// Audit record of one agent addressing another. Never read back by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInteraction {
    pub source_role: String,
    pub target_role: String,
    pub kind: InteractionKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// One unit's answer within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub role: String,
    /// Where in the run it was produced, e.g. `sequential`, `round 2`, `synthesis`.
    pub phase: String,
    pub text: String,
    pub duration_ms: u64,
}

/// Result of a coordination run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationOutcome {
    pub mode: CoordinationMode,
    /// Roles resolved for the run, in resolution order.
    pub agents: Vec<String>,
    pub final_text: String,
    pub responses: Vec<AgentResponse>,
    #[serde(default)]
    pub interactions: Vec<AgentInteraction>,
    /// Set when the run stopped early but kept what it had produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_failure: Option<String>,
}

impl CoordinationOutcome {
    pub fn is_complete(&self) -> bool {
        self.partial_failure.is_none()
    }
}

/// Receives progress while a run executes.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, percent: u8, message: &str);
}

/// Discards progress.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _percent: u8, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_from_minimal_json() {
        let req: CoordinationRequest = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        assert_eq!(req.mode, CoordinationMode::Sequential);
        assert!(req.agents.is_none());
        assert!(req.scope.is_empty());
        assert!(req.history.is_empty());
    }

    #[test]
    fn mode_uses_lowercase_names() {
        let req: CoordinationRequest =
            serde_json::from_str(r#"{"query": "hi", "mode": "debate", "agents": ["draft"]}"#)
                .unwrap();
        assert_eq!(req.mode, CoordinationMode::Debate);
        assert_eq!(req.agents, Some(vec!["draft".to_string()]));
        assert_eq!(CoordinationMode::Collaborative.to_string(), "collaborative");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let res: Result<CoordinationRequest, _> =
            serde_json::from_str(r#"{"query": "hi", "mode": "roundrobin"}"#);
        assert!(res.is_err());
    }
}
