//! Knowledge retrieval capability.
//!
//! Production deployments point [`KnowledgeRetrieval`] at a vector search
//! service. [`InMemoryKnowledge`] ranks a small snippet set by term overlap
//! and is what the CLI loads from `knowledge_path`.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ColmeiaError;

/// One ranked piece of background knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub source: String,
    pub text: String,
    #[serde(default)]
    pub score: f32,
    /// Scope the snippet belongs to; unscoped snippets match every scope.
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("knowledge retrieval unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KnowledgeRetrieval: Send + Sync {
    /// Returns at most `top_k` snippets, best first.
    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<Snippet>, RetrievalError>;
}

/// Snippet set held in memory, ranked by the fraction of query terms it contains.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledge {
    snippets: Vec<Snippet>,
}

impl InMemoryKnowledge {
    pub fn new(snippets: Vec<Snippet>) -> Self {
        Self { snippets }
    }

    /// Loads a JSON array of snippets.
    pub fn from_json_file(path: &Path) -> Result<Self, ColmeiaError> {
        let contents = std::fs::read_to_string(path)?;
        let snippets: Vec<Snippet> = serde_json::from_str(&contents)?;
        Ok(Self::new(snippets))
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl KnowledgeRetrieval for InMemoryKnowledge {
    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<Snippet>, RetrievalError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<Snippet> = self
            .snippets
            .iter()
            .filter(|s| match (scope, s.scope.as_deref()) {
                (Some(wanted), Some(own)) => wanted == own,
                _ => true,
            })
            .filter_map(|s| {
                let haystack = terms(&s.text);
                let hits = query_terms.iter().filter(|t| haystack.contains(t)).count();
                (hits > 0).then(|| Snippet {
                    score: hits as f32 / query_terms.len() as f32,
                    ..s.clone()
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(source: &str, text: &str, scope: Option<&str>) -> Snippet {
        Snippet {
            source: source.into(),
            text: text.into(),
            score: 0.0,
            scope: scope.map(String::from),
        }
    }

    fn knowledge() -> InMemoryKnowledge {
        InMemoryKnowledge::new(vec![
            snippet("pricing.md", "Pricing tiers for the mobile product", Some("acme")),
            snippet("churn.md", "Churn analysis of mobile subscribers", Some("acme")),
            snippet("hiring.md", "Hiring plan for the platform team", Some("globex")),
            snippet("glossary.md", "Product glossary and mobile terms", None),
        ])
    }

    #[tokio::test]
    async fn ranks_by_term_overlap() {
        let hits = knowledge()
            .search("mobile pricing", None, 10)
            .await
            .unwrap();
        assert_eq!(hits[0].source, "pricing.md");
        assert_eq!(hits[0].score, 1.0);
        assert!(hits.iter().all(|h| h.source != "hiring.md"));
    }

    #[tokio::test]
    async fn scope_filter_keeps_unscoped_snippets() {
        let hits = knowledge().search("mobile", Some("globex"), 10).await.unwrap();
        let sources: Vec<_> = hits.iter().map(|h| h.source.as_str()).collect();
        assert_eq!(sources, vec!["glossary.md"]);
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let hits = knowledge().search("mobile", None, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn short_query_returns_nothing() {
        let hits = knowledge().search("a b", None, 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(
            &path,
            r#"[{"source": "a.md", "text": "alpha beta"}, {"source": "b.md", "text": "gamma", "scope": "x"}]"#,
        )
        .unwrap();
        let kb = InMemoryKnowledge::from_json_file(&path).unwrap();
        assert_eq!(kb.len(), 2);
    }
}
