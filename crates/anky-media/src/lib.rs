//! Durable storage for generated images

mod cloudinary;

pub use cloudinary::{ApiCredentials, CloudinaryStore, sign_params};

use anky_utils::error::ServiceError;
use anky_utils::types::SessionId;
use async_trait::async_trait;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Copy the image at `source_url` into durable storage under `key` and
    /// return its public URL.
    async fn upload(&self, source_url: &str, key: &str) -> Result<String, ServiceError>;

    /// Delete the object stored under `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), ServiceError>;
}

/// Storage key for the image of a writing session: `anky-<session-id>`,
/// under `folder/` when one is configured.
#[must_use]
pub fn media_key(session_id: SessionId, folder: Option<&str>) -> String {
    let name = format!("anky-{session_id}");
    match folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty()) {
        Some(folder) => format!("{folder}/{name}"),
        None => name,
    }
}
