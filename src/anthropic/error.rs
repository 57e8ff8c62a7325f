//! Tipos de erro para o cliente da API Anthropic.
//!
//! Define [`AnthropicError`] e a sua classificação em [`GatewayError`],
//! que é o que a camada de agentes enxerga.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Erros que podem ocorrer ao interagir com a API da Anthropic.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// O servidor retornou HTTP 429 (rate limit).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro retornado pela API (ex.: 401 chave inválida, 500 erro interno).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A requisição excedeu o tempo limite do cliente HTTP.
    #[error("request timed out")]
    Timeout,

    /// Resposta 2xx sem nenhum bloco de texto.
    #[error("response contained no text")]
    EmptyResponse,

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<AnthropicError> for GatewayError {
    fn from(err: AnthropicError) -> Self {
        match err {
            AnthropicError::RateLimited { retry_after_ms } => {
                GatewayError::RateLimited { retry_after_ms }
            }
            AnthropicError::Timeout => GatewayError::Timeout,
            AnthropicError::ApiError { status, message } => GatewayError::Provider {
                status: Some(status),
                message,
            },
            other => GatewayError::Provider {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = AnthropicError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
    }

    #[test]
    fn api_error_display() {
        let err = AnthropicError::ApiError {
            status: 401,
            message: "Invalid API key".into(),
        };
        assert_eq!(err.to_string(), "API error (status 401): Invalid API key");
    }

    #[test]
    fn classification_into_gateway_errors() {
        let auth: GatewayError = AnthropicError::ApiError {
            status: 401,
            message: "Invalid API key".into(),
        }
        .into();
        assert!(!auth.is_transient());

        let overloaded: GatewayError = AnthropicError::ApiError {
            status: 529,
            message: "overloaded".into(),
        }
        .into();
        assert!(overloaded.is_transient());

        let timeout: GatewayError = AnthropicError::Timeout.into();
        assert_eq!(timeout, GatewayError::Timeout);

        let empty: GatewayError = AnthropicError::EmptyResponse.into();
        assert!(empty.is_transient());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AnthropicError>();
    }
}
