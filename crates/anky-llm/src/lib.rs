//! Text generation for the reflection stage
//!
//! A trait-based system for invoking language models over HTTP. Both
//! providers implement [`LlmBackend`]; [`ConversationReflectionEngine`] drives
//! one of them through the reflection conversation.

mod ollama_backend;
mod openai_backend;
mod reflection;
mod types;

pub use ollama_backend::OllamaBackend;
pub use openai_backend::OpenAiCompatibleBackend;
pub use reflection::{
    ConversationReflectionEngine, MAX_TICKER_CHARS, Reflection, ReflectionEngine,
    normalize_ticker,
};
pub use types::{LlmBackend, LlmInvocation, LlmResult, Message, Role, SamplingParams};

use anky_config::LlmConfig;
use anky_utils::error::ServiceError;
use std::sync::Arc;
use std::time::Duration;

/// Construct the backend named by `[llm] provider`.
///
/// # Errors
///
/// Returns `ServiceError::Misconfiguration` if the provider is unknown or
/// provider-specific configuration (such as the API key) is missing.
pub fn backend_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmBackend>, ServiceError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCompatibleBackend::new_from_config(config)?)),
        "ollama" => Ok(Arc::new(OllamaBackend::new_from_config(config)?)),
        unknown => Err(ServiceError::Misconfiguration(format!(
            "Unknown LLM provider '{unknown}'. Supported providers: openai, ollama."
        ))),
    }
}

/// Build the reflection engine for the configured provider.
///
/// # Errors
///
/// See [`backend_from_config`].
pub fn reflection_engine_from_config(
    config: &LlmConfig,
) -> Result<ConversationReflectionEngine, ServiceError> {
    let backend = backend_from_config(config)?;
    Ok(ConversationReflectionEngine::new(
        backend,
        config.model.clone(),
        Duration::from_secs(config.timeout_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_misconfiguration() {
        let config = LlmConfig {
            provider: "telepathy".to_string(),
            ..LlmConfig::default()
        };
        let err = backend_from_config(&config).err().unwrap();
        assert!(matches!(err, ServiceError::Misconfiguration(_)));
        assert!(err.to_string().contains("telepathy"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            model: "llama3.1".to_string(),
            ..LlmConfig::default()
        };
        assert!(backend_from_config(&config).is_ok());
    }

    #[test]
    fn test_openai_requires_key() {
        let config = LlmConfig {
            api_key_env: "ANKY_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmConfig::default()
        };
        let err = backend_from_config(&config).err().unwrap();
        assert!(err.to_string().contains("ANKY_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
