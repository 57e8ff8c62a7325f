use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::registry::AgentRegistry;
use super::unit::AgentUnit;

/// Keyword weight at which a unit is fully confident.
const CONFIDENCE_SATURATION: f32 = 20.0;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("unknown agent role: {0}")]
    UnknownRole(String),

    #[error("agent role listed more than once: {0}")]
    DuplicateRole(String),

    #[error("explicit agent list must not be empty")]
    EmptySelection,

    #[error("agent role '{0}' needs a knowledge retrieval backend, and none is configured")]
    RetrievalUnavailable(String),
}

/// How confident `unit` is that it should handle `query`, in `[0, 1]`.
///
/// Single-word keywords match any query word starting with the term, so
/// `analy` covers both "analyze" and "analysis". Multi-word keywords match
/// as a phrase. Each keyword counts once.
pub fn confidence(unit: &AgentUnit, query: &str) -> f32 {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|w| !w.is_empty())
        .collect();

    let score: u32 = unit
        .keywords
        .iter()
        .filter(|k| {
            if k.term.contains(' ') {
                lower.contains(k.term.as_str())
            } else {
                words.iter().any(|w| w.starts_with(k.term.as_str()))
            }
        })
        .map(|k| k.weight)
        .sum();

    (score as f32 / CONFIDENCE_SATURATION).min(1.0)
}

/// Resolves the agent units a request runs with.
#[derive(Debug, Clone)]
pub struct AgentRouter {
    registry: Arc<AgentRegistry>,
    max_units: usize,
    min_confidence: f32,
    retrieval_available: bool,
}

impl AgentRouter {
    pub fn new(registry: Arc<AgentRegistry>, max_units: usize, min_confidence: f32) -> Self {
        Self {
            registry,
            max_units,
            min_confidence,
            retrieval_available: true,
        }
    }

    /// Whether retrieval units can run. When they cannot, routing never
    /// picks them and explicit requests for them are rejected.
    pub fn with_retrieval(mut self, available: bool) -> Self {
        self.retrieval_available = available;
        self
    }

    pub fn retrieval_available(&self) -> bool {
        self.retrieval_available
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Every unit with its confidence for `query`, best first. Ties keep registry order.
    pub fn ranked(&self, query: &str) -> Vec<(Arc<AgentUnit>, f32)> {
        let mut ranked: Vec<_> = self
            .registry
            .units()
            .iter()
            .map(|u| (u.clone(), confidence(u, query)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Explicit roles win and keep their order. Otherwise the top confident
    /// units are chosen, falling back to the registry default.
    pub fn resolve(
        &self,
        explicit: Option<&[String]>,
        query: &str,
    ) -> Result<Vec<Arc<AgentUnit>>, RoutingError> {
        if let Some(roles) = explicit {
            return self.lookup(roles);
        }

        let selected: Vec<_> = self
            .ranked(query)
            .into_iter()
            .filter(|(unit, score)| *score >= self.min_confidence && self.can_run(unit))
            .take(self.max_units)
            .map(|(unit, _)| unit)
            .collect();

        if selected.is_empty() {
            Ok(vec![self.registry.default_unit().clone()])
        } else {
            Ok(selected)
        }
    }

    fn lookup(&self, roles: &[String]) -> Result<Vec<Arc<AgentUnit>>, RoutingError> {
        if roles.is_empty() {
            return Err(RoutingError::EmptySelection);
        }
        let mut seen = HashSet::new();
        roles
            .iter()
            .map(|role| {
                if !seen.insert(role.as_str()) {
                    return Err(RoutingError::DuplicateRole(role.clone()));
                }
                let unit = self
                    .registry
                    .get(role)
                    .ok_or_else(|| RoutingError::UnknownRole(role.clone()))?;
                if !self.can_run(unit) {
                    return Err(RoutingError::RetrievalUnavailable(role.clone()));
                }
                Ok(unit.clone())
            })
            .collect()
    }

    fn can_run(&self, unit: &AgentUnit) -> bool {
        self.retrieval_available || !unit.is_retrieval()
    }
}
