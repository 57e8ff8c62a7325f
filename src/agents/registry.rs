use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::unit::{AgentUnit, ModelTier};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent role already registered: {0}")]
    DuplicateRole(String),

    #[error("agent role not registered: {0}")]
    UnknownRole(String),

    #[error("agent role '{0}' is retrieval-backed and cannot answer on its own")]
    NotModelBacked(String),
}

/// Process-wide set of agent units, populated at startup and read-only afterwards.
///
/// Registration order is significant: routing breaks confidence ties by it.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    units: Vec<Arc<AgentUnit>>,
    index: HashMap<String, usize>,
    default_idx: usize,
    synthesizer_idx: usize,
}

impl AgentRegistry {
    /// Creates a registry whose default and synthesizer is `default_unit`.
    pub fn new(default_unit: AgentUnit) -> Self {
        let mut index = HashMap::new();
        index.insert(default_unit.role.clone(), 0);
        Self {
            units: vec![Arc::new(default_unit)],
            index,
            default_idx: 0,
            synthesizer_idx: 0,
        }
    }

    pub fn register(&mut self, unit: AgentUnit) -> Result<(), RegistryError> {
        if self.index.contains_key(&unit.role) {
            return Err(RegistryError::DuplicateRole(unit.role));
        }
        self.index.insert(unit.role.clone(), self.units.len());
        self.units.push(Arc::new(unit));
        Ok(())
    }

    pub fn get(&self, role: &str) -> Option<&Arc<AgentUnit>> {
        self.index.get(role).map(|&i| &self.units[i])
    }

    pub fn units(&self) -> &[Arc<AgentUnit>] {
        &self.units
    }

    /// Fallback unit when routing finds no confident match.
    pub fn default_unit(&self) -> &Arc<AgentUnit> {
        &self.units[self.default_idx]
    }

    /// Unit that reconciles debate turns into one answer.
    pub fn synthesizer(&self) -> &Arc<AgentUnit> {
        &self.units[self.synthesizer_idx]
    }

    pub fn set_default_role(&mut self, role: &str) -> Result<(), RegistryError> {
        self.default_idx = self.model_position(role)?;
        Ok(())
    }

    pub fn set_synthesizer_role(&mut self, role: &str) -> Result<(), RegistryError> {
        self.synthesizer_idx = self.model_position(role)?;
        Ok(())
    }

    /// Default and synthesizer must produce text from the model.
    fn model_position(&self, role: &str) -> Result<usize, RegistryError> {
        let idx = self.position(role)?;
        if self.units[idx].is_retrieval() {
            return Err(RegistryError::NotModelBacked(role.to_string()));
        }
        Ok(idx)
    }

    fn position(&self, role: &str) -> Result<usize, RegistryError> {
        self.index
            .get(role)
            .copied()
            .ok_or_else(|| RegistryError::UnknownRole(role.to_string()))
    }

    /// The built-in unit set shipped with colmeia.
    pub fn builtin() -> Self {
        let mut registry = Self::new(AgentUnit::model(
            "general",
            "You are a general-purpose assistant. Answer the request directly and completely, \
             using the background and prior outputs when they are relevant.",
            ModelTier::Standard,
            &[],
        ));

        let units = [
            AgentUnit::retrieval(
                "retrieval",
                "Retrieve background knowledge relevant to the request.",
                &[
                    ("research", 10),
                    ("knowledge", 8),
                    ("source", 6),
                    ("reference", 6),
                    ("cite", 8),
                    ("evidence", 8),
                    ("look up", 8),
                    ("document", 5),
                ],
            ),
            AgentUnit::model(
                "draft",
                "You write first drafts. Produce a complete, well-structured draft that \
                 addresses the request.",
                ModelTier::Standard,
                &[
                    ("draft", 10),
                    ("write", 10),
                    ("compose", 8),
                    ("outline", 6),
                    ("create", 5),
                    ("generate", 5),
                ],
            ),
            AgentUnit::model(
                "refine",
                "You are an editor. Improve the latest draft for clarity, accuracy and \
                 concision without changing its intent.",
                ModelTier::Standard,
                &[
                    ("refine", 10),
                    ("polish", 10),
                    ("improve", 8),
                    ("edit", 8),
                    ("rewrite", 8),
                    ("clarify", 6),
                ],
            ),
            AgentUnit::model(
                "analysis",
                "You are an analyst. Break the problem down, weigh the evidence and state \
                 conclusions with their assumptions.",
                ModelTier::Premium,
                &[
                    ("analy", 10),
                    ("compare", 8),
                    ("evaluate", 8),
                    ("assess", 8),
                    ("trade-off", 8),
                    ("metric", 6),
                    ("data", 5),
                ],
            ),
            AgentUnit::model(
                "planning",
                "You are a planner. Turn the request into ordered, concrete steps with owners \
                 and milestones where possible.",
                ModelTier::Standard,
                &[
                    ("plan", 10),
                    ("roadmap", 10),
                    ("milestone", 8),
                    ("schedule", 8),
                    ("prioriti", 8),
                    ("strategy", 8),
                ],
            ),
            AgentUnit::model(
                "review",
                "You are a critical reviewer. Identify risks, gaps and errors and propose \
                 specific fixes.",
                ModelTier::Fast,
                &[
                    ("review", 10),
                    ("critique", 10),
                    ("risk", 8),
                    ("validate", 6),
                    ("feedback", 6),
                    ("check", 5),
                ],
            ),
        ];

        for unit in units {
            // Built-in roles are distinct.
            let _ = registry.register(unit);
        }
        registry
    }
}
