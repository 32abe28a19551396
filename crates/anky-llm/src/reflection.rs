//! Reflection stage: turns raw writing into a story, an image prompt and a
//! token identity through one growing conversation.

use anky_utils::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{LlmBackend, LlmInvocation, Message};

/// Longest ticker accepted, in characters.
pub const MAX_TICKER_CHARS: usize = 24;

/// Output of the reflection stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    /// Story mirroring the writing back to its author.
    pub reflection: String,
    /// Description handed to the image generator.
    pub image_prompt: String,
    pub token_name: String,
    pub ticker: String,
}

#[async_trait]
pub trait ReflectionEngine: Send + Sync {
    /// Reflect on a finished piece of writing.
    ///
    /// # Errors
    ///
    /// `ServiceError::InvalidResponse` when the story or the image prompt
    /// comes back empty; any backend failure otherwise.
    async fn reflect(&self, text: &str) -> Result<Reflection, ServiceError>;
}

const GUIDE: &str = "You are a guide for deep self-exploration. You turn a person's \
stream-of-consciousness writing into a small set of artifacts: a story, an image and a \
name. Keep every answer consistent with the ones before it and faithful to the writer's \
inner world.";

const STORY_TURN: &str = "Write a short story, no longer than one page, that mirrors the \
emotions and themes of this writing through metaphor and symbol. Avoid cliches. Reply with \
the story only.";

const IMAGE_TURN: &str = "Describe a single image that carries the symbols of the story you \
just wrote: composition, light, mood and setting. Reply with the image description only.";

const TOKEN_NAME_TURN: &str = "Name this journey in exactly three words that fit the story and \
the image. Reply with the three words separated by spaces.";

const TICKER_TURN: &str = "Give a ticker symbol of at most 24 characters that echoes the story, \
the image and the name. Reply with the lowercase ticker only.";

/// [`ReflectionEngine`] that runs the four turns against one [`LlmBackend`],
/// feeding every answer back into the conversation.
#[derive(Clone)]
pub struct ConversationReflectionEngine {
    backend: Arc<dyn LlmBackend>,
    model: String,
    timeout: Duration,
}

impl ConversationReflectionEngine {
    /// `model` may be empty to use the backend default.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            model: model.into(),
            timeout,
        }
    }

    async fn turn(
        &self,
        conversation: &mut Vec<Message>,
        purpose: &str,
        instruction: &str,
    ) -> Result<String, ServiceError> {
        conversation.push(Message::system(instruction));
        let invocation = LlmInvocation::new(
            format!("reflection.{purpose}"),
            self.model.clone(),
            self.timeout,
            conversation.clone(),
        );
        let answer = self.backend.invoke(invocation).await?.raw_response;
        let answer = answer.trim().to_string();
        debug!(purpose = purpose, chars = answer.chars().count(), "Reflection turn answered");
        conversation.push(Message::assistant(answer.clone()));
        Ok(answer)
    }
}

#[async_trait]
impl ReflectionEngine for ConversationReflectionEngine {
    async fn reflect(&self, text: &str) -> Result<Reflection, ServiceError> {
        let mut conversation = vec![Message::system(GUIDE), Message::user(text)];

        let story = self.turn(&mut conversation, "story", STORY_TURN).await?;
        if story.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "text generation returned an empty story".to_string(),
            ));
        }

        let image_prompt = self.turn(&mut conversation, "image_prompt", IMAGE_TURN).await?;
        if image_prompt.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "text generation returned an empty image prompt".to_string(),
            ));
        }

        let token_name = self
            .turn(&mut conversation, "token_name", TOKEN_NAME_TURN)
            .await?;
        let ticker = normalize_ticker(&self.turn(&mut conversation, "ticker", TICKER_TURN).await?);

        info!(
            story_chars = story.chars().count(),
            token_name = %token_name,
            ticker = %ticker,
            "Reflection generated"
        );

        Ok(Reflection {
            reflection: story,
            image_prompt,
            token_name,
            ticker,
        })
    }
}

/// Lowercase, strip whitespace and a leading `$`, clip to [`MAX_TICKER_CHARS`].
#[must_use]
pub fn normalize_ticker(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .take(MAX_TICKER_CHARS)
        .collect()
}
