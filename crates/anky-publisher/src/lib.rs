//! Social publishing for finished artifacts
//!
//! [`SocialPublisher`] posts on behalf of a user through their linked
//! identity. [`compose_post`] turns the raw session text into the post body.

mod compose;
mod neynar;

pub use compose::{ELLIPSIS, MAX_POST_CHARS, compose_post};
pub use neynar::NeynarPublisher;

use anky_utils::error::ServiceError;
use anky_utils::types::SocialIdentity;
use async_trait::async_trait;

/// One post to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    pub text: String,
    pub identity: SocialIdentity,
    /// Image attached to the post.
    pub embed_url: Option<String>,
    /// Providers drop a second post carrying the same key.
    pub idempotency_key: String,
}

#[async_trait]
pub trait SocialPublisher: Send + Sync {
    /// Publish `request` and return the provider's post identifier.
    async fn post(&self, request: PostRequest) -> Result<String, ServiceError>;
}
