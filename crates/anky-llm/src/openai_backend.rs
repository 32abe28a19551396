//! OpenAI-compatible chat completions backend
//!
//! Works against OpenAI itself and any server exposing the same
//! `/v1/chat/completions` contract (OpenRouter, vLLM, LM Studio).

use anky_config::{Config, LlmConfig};
use anky_utils::error::ServiceError;
use anky_utils::http_client::{HttpClient, read_json};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, SamplingParams, resolve_params};

/// Default API root
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    client: HttpClient,
    endpoint: String,
    api_key: String,
    default_model: String,
    default_params: SamplingParams,
}

impl OpenAiCompatibleBackend {
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: SamplingParams,
    ) -> Result<Self, ServiceError> {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client: HttpClient::new()?,
            endpoint: format!("{}{}", base.trim_end_matches('/'), COMPLETIONS_PATH),
            api_key,
            default_model,
            default_params,
        })
    }

    /// Build from the `[llm]` section, reading the key from `api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the API key environment
    /// variable is not set or the HTTP client cannot be constructed
    pub fn new_from_config(config: &LlmConfig) -> Result<Self, ServiceError> {
        let api_key = Config::secret("llm.api_key_env", &config.api_key_env).map_err(|e| {
            ServiceError::Misconfiguration(format!(
                "{e}. Set it or configure a different api_key_env in [llm]."
            ))
        })?;

        Self::new(
            api_key,
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

    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|msg| ChatMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, ServiceError> {
        let (model, params) = resolve_params(&inv, &self.default_model, &self.default_params);

        debug!(
            provider = "openai",
            purpose = %inv.purpose,
            model = %model,
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            timeout_secs = inv.timeout.as_secs(),
            "Invoking OpenAI-compatible backend"
        );

        let request_body = ChatRequest {
            model: model.clone(),
            messages: Self::convert_messages(&inv.messages),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream: false,
        };

        let request = self
            .client
            .inner()
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body);

        let response = self
            .client
            .execute_with_retry(request, inv.timeout, "openai")
            .await?;
        let body: ChatResponse = read_json(response, "openai").await?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ServiceError::InvalidResponse(
                    "openai response missing content in choices[0]".to_string(),
                )
            })?;

        let mut result = LlmResult::new(content, "openai", model);
        if let Some(usage) = body.usage {
            result = result.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }

        debug!(
            provider = "openai",
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            "OpenAI-compatible invocation completed"
        );

        Ok(result)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anky_utils::stub_server::{StubResponse, StubServer};
    use serde_json::json;
    use std::time::Duration;

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    fn backend(base: &str) -> OpenAiCompatibleBackend {
        OpenAiCompatibleBackend::new(
            "sk-test".to_string(),
            Some(base.to_string()),
            "gpt-test".to_string(),
            SamplingParams::default(),
        )
        .unwrap()
        .with_http_client(
            HttpClient::new()
                .unwrap()
                .with_backoff(Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_endpoint_joins_base() {
        let backend = backend("http://localhost:9999/");
        assert_eq!(backend.endpoint, "http://localhost:9999/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_invoke_sends_conversation_and_reads_choice() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            json!({
                "choices": [{"message": {"role": "assistant", "content": "a story"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }),
        )])
        .await;

        let inv = LlmInvocation::new(
            "reflection.story",
            "",
            DEFAULT_TIMEOUT,
            vec![Message::system("guide"), Message::user("my writing")],
        );
        let result = backend(server.base_url()).invoke(inv).await.unwrap();

        assert_eq!(result.raw_response, "a story");
        assert_eq!(result.model_used, "gpt-test");
        assert_eq!(result.tokens_input, Some(12));

        let request = &server.requests()[0];
        assert_eq!(request.path, "/v1/chat/completions");
        assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
        let body = request.body_json();
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "my writing");
        assert_eq!(body["stream"], false);
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid_response() {
        let server =
            StubServer::start(vec![StubResponse::json(200, json!({"choices": []}))]).await;
        let inv = LlmInvocation::new("t", "", DEFAULT_TIMEOUT, vec![Message::user("x")]);
        let err = backend(server.base_url()).invoke(inv).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }
}
