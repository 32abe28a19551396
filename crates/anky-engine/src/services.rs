//! Wiring of the pipeline's collaborators

use anky_config::{Config, PublishPolicy};
use anky_imagine::{ImageGenerationClient, ImagineClient};
use anky_llm::{ReflectionEngine, reflection_engine_from_config};
use anky_media::{CloudinaryStore, MediaStore};
use anky_publisher::{NeynarPublisher, SocialPublisher};
use anky_store::{ArtifactRepository, SessionRepository, UserDirectory};
use anky_utils::error::ServiceError;
use std::sync::Arc;
use tracing::warn;

/// The four remote services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub reflection: Arc<dyn ReflectionEngine>,
    pub images: Arc<dyn ImageGenerationClient>,
    pub media: Arc<dyn MediaStore>,
    /// `None` when publishing is disabled or no publisher is configured.
    pub publisher: Option<Arc<dyn SocialPublisher>>,
}

impl Collaborators {
    /// Build the HTTP-backed collaborators described by `config`.
    ///
    /// A missing publisher key only matters under
    /// [`PublishPolicy::Required`]; otherwise the publisher is left out and a
    /// run that finds a linked identity fails at the publish stage.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` for any client that cannot be
    /// built from its section.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let publisher: Option<Arc<dyn SocialPublisher>> = match config.pipeline.publish_policy {
            PublishPolicy::Disabled => None,
            policy => match NeynarPublisher::new_from_config(&config.publisher) {
                Ok(publisher) => Some(Arc::new(publisher)),
                Err(e) if policy == PublishPolicy::Required => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Social publishing is unavailable");
                    None
                }
            },
        };

        Ok(Self {
            reflection: Arc::new(reflection_engine_from_config(&config.llm)?),
            images: Arc::new(ImagineClient::new_from_config(&config.imagine)?),
            media: Arc::new(CloudinaryStore::new_from_config(&config.media)?),
            publisher,
        })
    }
}

/// Persistence seen by the engine.
#[derive(Clone)]
pub struct Repositories {
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub users: Arc<dyn UserDirectory>,
}

impl Repositories {
    /// Use one store for all three repositories.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ArtifactRepository + SessionRepository + UserDirectory + 'static,
    {
        Self {
            artifacts: store.clone(),
            sessions: store.clone(),
            users: store,
        }
    }
}
