//! Language model capability consumed by agent units.
//!
//! The coordinator never talks to a provider directly: every call goes
//! through [`LanguageModel::generate`], and every failure comes back as a
//! [`GatewayError`] that the agent layer can classify for retry decisions.

use async_trait::async_trait;
use thiserror::Error;

use crate::agents::ModelTier;
use crate::context::PromptBundle;

/// Per-call generation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateOptions {
    pub tier: ModelTier,
    pub max_tokens: u32,
}

/// Failures a language model backend may raise.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("model call timed out")]
    Timeout,

    /// Any other provider failure. `status` is `None` for transport errors.
    #[error("provider error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
    },
}

impl GatewayError {
    /// Whether a second attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::RateLimited { .. } | GatewayError::Timeout => true,
            GatewayError::Provider { status, .. } => status.is_none_or(|s| s >= 500),
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &PromptBundle,
        options: &GenerateOptions,
    ) -> Result<String, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_timeout_are_transient() {
        assert!(GatewayError::RateLimited { retry_after_ms: 10 }.is_transient());
        assert!(GatewayError::Timeout.is_transient());
    }

    #[test]
    fn provider_errors_split_on_status() {
        let server = GatewayError::Provider {
            status: Some(503),
            message: "overloaded".into(),
        };
        let client = GatewayError::Provider {
            status: Some(400),
            message: "bad request".into(),
        };
        let network = GatewayError::Provider {
            status: None,
            message: "connection reset".into(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(network.is_transient());
    }

    #[test]
    fn provider_error_display() {
        let err = GatewayError::Provider {
            status: Some(401),
            message: "Invalid API key".into(),
        };
        assert_eq!(err.to_string(), "provider error (status 401): Invalid API key");

        let err = GatewayError::Provider {
            status: None,
            message: "dns failure".into(),
        };
        assert_eq!(err.to_string(), "provider error: dns failure");
    }
}
