use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::error::AnthropicError;
use super::types::{Message, MessagesRequest, MessagesResponse, ModelMap};
use crate::context::PromptBundle;
use crate::gateway::{GatewayError, GenerateOptions, LanguageModel};

const API_URL: &str = "https://api.anthropic.com/v1/messages";

pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
    models: ModelMap,
}

impl AnthropicClient {
    pub fn new(api_key: String, models: ModelMap) -> Result<Self, AnthropicError> {
        Self::with_base_url(api_key, models, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        api_key: String,
        models: ModelMap,
        base_url: String,
    ) -> Result<Self, AnthropicError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
            models,
        })
    }

    pub fn models(&self) -> &ModelMap {
        &self.models
    }

    pub async fn send_message(
        &self,
        req: &MessagesRequest,
    ) -> Result<MessagesResponse, AnthropicError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(AnthropicError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AnthropicError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<MessagesResponse>()
            .await
            .map_err(transport_error)?;
        Ok(body)
    }

    fn request_for(&self, prompt: &PromptBundle, options: &GenerateOptions) -> MessagesRequest {
        let system = if prompt.context.is_empty() {
            prompt.instruction.clone()
        } else {
            format!("{}\n\n# Context\n\n{}", prompt.instruction, prompt.context)
        };
        MessagesRequest {
            model: self.models.model_for(options.tier).to_string(),
            max_tokens: options.max_tokens,
            system: Some(system),
            messages: vec![Message {
                role: "user".into(),
                content: prompt.request.clone(),
            }],
        }
    }
}

fn transport_error(err: reqwest::Error) -> AnthropicError {
    if err.is_timeout() {
        AnthropicError::Timeout
    } else {
        AnthropicError::NetworkError(err)
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn generate(
        &self,
        prompt: &PromptBundle,
        options: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        let req = self.request_for(prompt, options);
        debug!(role = %prompt.role, model = %req.model, "sending messages request");
        let response = self.send_message(&req).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(AnthropicError::EmptyResponse.into());
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::agents::ModelTier;

    fn prompt(context: &str) -> PromptBundle {
        PromptBundle {
            role: "draft".into(),
            instruction: "You are the draft agent.".into(),
            context: context.into(),
            request: "Write a launch note".into(),
        }
    }

    fn options(tier: ModelTier) -> GenerateOptions {
        GenerateOptions {
            tier,
            max_tokens: 512,
        }
    }

    async fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::with_base_url("sk-test".into(), ModelMap::default(), server.uri()).unwrap()
    }

    fn ok_body(text: &str) -> serde_json::Value {
        json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": text}],
            "model": "claude-haiku-4-5-20251001",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        })
    }

    #[tokio::test]
    async fn generate_sends_context_as_system_and_request_as_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({
                "model": "claude-haiku-4-5-20251001",
                "max_tokens": 512,
                "system": "You are the draft agent.\n\n# Context\n\n## background\n[a] b",
                "messages": [{"role": "user", "content": "Write a launch note"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Draft ready")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let text = client
            .generate(&prompt("## background\n[a] b"), &options(ModelTier::Fast))
            .await
            .unwrap();
        assert_eq!(text, "Draft ready");
    }

    #[tokio::test]
    async fn rate_limit_maps_to_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .generate(&prompt(""), &options(ModelTier::Standard))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::RateLimited { retry_after_ms: 7000 });
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .generate(&prompt(""), &options(ModelTier::Premium))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Provider {
                status: Some(401),
                message: "invalid x-api-key".into(),
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .generate(&prompt(""), &options(ModelTier::Standard))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn empty_text_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("  ")))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(
            client
                .generate(&prompt(""), &options(ModelTier::Standard))
                .await
                .is_err()
        );
    }

    #[test]
    fn request_without_context_uses_instruction_only() {
        let client =
            AnthropicClient::with_base_url("k".into(), ModelMap::default(), "http://x".into())
                .unwrap();
        let req = client.request_for(&prompt(""), &options(ModelTier::Premium));
        assert_eq!(req.model, "claude-opus-4-6");
        assert_eq!(req.system.as_deref(), Some("You are the draft agent."));
        assert_eq!(req.messages.len(), 1);
    }
}
