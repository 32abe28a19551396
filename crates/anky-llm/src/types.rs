//! Core types for the text generation abstraction

use anky_utils::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Input to a backend invocation
#[derive(Debug, Clone)]
pub struct LlmInvocation {
    /// What the call is for, e.g. `reflection.story`; logged only.
    pub purpose: String,
    /// Model to use; empty means the backend default.
    pub model: String,
    pub timeout: Duration,
    pub messages: Vec<Message>,
    /// Provider-specific parameters (`max_tokens`, `temperature`)
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LlmInvocation {
    #[must_use]
    pub fn new(
        purpose: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            purpose: purpose.into(),
            model: model.into(),
            timeout,
            messages,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result from a backend invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResult {
    pub raw_response: String,
    /// Provider name (`openai`, `ollama`)
    pub provider: String,
    pub model_used: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

impl LlmResult {
    #[must_use]
    pub fn new(
        raw_response: impl Into<String>,
        provider: impl Into<String>,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            raw_response: raw_response.into(),
            provider: provider.into(),
            model_used: model_used.into(),
            tokens_input: None,
            tokens_output: None,
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = Some(input);
        self.tokens_output = Some(output);
        self
    }
}

/// Trait for text generation backends
///
/// All providers implement this trait so the reflection engine can work with
/// any of them without knowing transport details.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Invoke the model with the given conversation
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` for transport failures, provider errors
    /// (auth, quota, outage), timeouts and malformed responses.
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, ServiceError>;
}

/// Sampling parameters shared by the HTTP backends
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

/// Resolve model and sampling parameters for one invocation.
///
/// `inv.model` overrides `default_model`; `inv.metadata["max_tokens"]` and
/// `inv.metadata["temperature"]` override the defaults.
pub(crate) fn resolve_params(
    inv: &LlmInvocation,
    default_model: &str,
    defaults: &SamplingParams,
) -> (String, SamplingParams) {
    let model = if inv.model.is_empty() {
        default_model.to_string()
    } else {
        inv.model.clone()
    };

    let max_tokens = inv
        .metadata
        .get("max_tokens")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(defaults.max_tokens);

    let temperature = inv
        .metadata
        .get("temperature")
        .and_then(serde_json::Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(defaults.temperature);

    (
        model,
        SamplingParams {
            max_tokens,
            temperature,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(model: &str) -> LlmInvocation {
        LlmInvocation::new("test", model, Duration::from_secs(60), vec![])
    }

    #[test]
    fn test_resolve_params_uses_defaults() {
        let defaults = SamplingParams {
            max_tokens: 1024,
            temperature: 0.5,
        };
        let (model, params) = resolve_params(&invocation(""), "default-model", &defaults);
        assert_eq!(model, "default-model");
        assert_eq!(params, defaults);
    }

    #[test]
    fn test_resolve_params_overrides() {
        let inv = invocation("custom-model")
            .with_metadata("max_tokens", serde_json::json!(64))
            .with_metadata("temperature", serde_json::json!(0.0));
        let (model, params) = resolve_params(&inv, "default-model", &SamplingParams::default());
        assert_eq!(model, "custom-model");
        assert_eq!(params.max_tokens, 64);
        assert_eq!(params.temperature, 0.0);
    }

    #[test]
    fn test_message_roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
