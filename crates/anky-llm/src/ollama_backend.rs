//! Ollama chat backend for self-hosted models

use anky_config::LlmConfig;
use anky_utils::error::ServiceError;
use anky_utils::http_client::{HttpClient, read_json};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, SamplingParams, resolve_params};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Clone)]
pub struct OllamaBackend {
    client: HttpClient,
    endpoint: String,
    default_model: String,
    default_params: SamplingParams,
}

impl OllamaBackend {
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(
        base_url: Option<String>,
        default_model: String,
        default_params: SamplingParams,
    ) -> Result<Self, ServiceError> {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client: HttpClient::new()?,
            endpoint: format!("{}/api/chat", base.trim_end_matches('/')),
            default_model,
            default_params,
        })
    }

    /// Build from the `[llm]` section. Ollama needs no credential.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new_from_config(config: &LlmConfig) -> Result<Self, ServiceError> {
        Self::new(
            config.base_url.clone(),
            config.model.clone(),
            SamplingParams {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        )
    }

    #[must_use]
    pub fn with_http_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, ServiceError> {
        let (model, params) = resolve_params(&inv, &self.default_model, &self.default_params);

        debug!(
            provider = "ollama",
            purpose = %inv.purpose,
            model = %model,
            timeout_secs = inv.timeout.as_secs(),
            "Invoking Ollama backend"
        );

        let request_body = OllamaRequest {
            model: &model,
            messages: &inv.messages,
            stream: false,
            options: OllamaOptions {
                num_predict: params.max_tokens,
                temperature: params.temperature,
            },
        };

        let request = self.client.inner().post(&self.endpoint).json(&request_body);
        let response = self
            .client
            .execute_with_retry(request, inv.timeout, "ollama")
            .await?;
        let body: OllamaResponse = read_json(response, "ollama").await?;

        if let Some(error) = body.error {
            return Err(ServiceError::InvalidResponse(format!(
                "ollama reported an error: {error}"
            )));
        }

        let content = body
            .message
            .map(|message| message.content)
            .ok_or_else(|| {
                ServiceError::InvalidResponse("ollama response missing message".to_string())
            })?;

        let mut result = LlmResult::new(content, "ollama", model);
        if let (Some(input), Some(output)) = (body.prompt_eval_count, body.eval_count) {
            result = result.with_tokens(input, output);
        }
        Ok(result)
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
    error: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anky_utils::stub_server::{StubResponse, StubServer};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_chat_request_shape() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            json!({
                "model": "llama3.1",
                "message": {"role": "assistant", "content": "quiet river"},
                "done": true,
                "prompt_eval_count": 40,
                "eval_count": 2
            }),
        )])
        .await;

        let backend = OllamaBackend::new(
            Some(server.base_url().to_string()),
            "llama3.1".to_string(),
            SamplingParams::default(),
        )
        .unwrap();
        let inv = LlmInvocation::new(
            "reflection.token_name",
            "",
            Duration::from_secs(5),
            vec![Message::user("hello")],
        );
        let result = backend.invoke(inv).await.unwrap();

        assert_eq!(result.raw_response, "quiet river");
        assert_eq!(result.provider, "ollama");
        assert_eq!(result.tokens_output, Some(2));

        let request = &server.requests()[0];
        assert_eq!(request.path, "/api/chat");
        let body = request.body_json();
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[tokio::test]
    async fn test_error_payload_is_invalid_response() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            json!({"error": "model 'llama3.1' not found"}),
        )])
        .await;
        let backend = OllamaBackend::new(
            Some(server.base_url().to_string()),
            "llama3.1".to_string(),
            SamplingParams::default(),
        )
        .unwrap();
        let inv = LlmInvocation::new("t", "", Duration::from_secs(5), vec![]);
        let err = backend.invoke(inv).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
