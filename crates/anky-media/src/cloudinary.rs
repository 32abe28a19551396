//! Cloudinary-backed [`MediaStore`]
//!
//! Uploads go through an unsigned upload preset. Removal needs the account
//! key and secret because Cloudinary only accepts signed `destroy` calls.

use anky_config::{Config, MediaConfig};
use anky_utils::error::ServiceError;
use anky_utils::http_client::{HttpClient, read_json};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

use crate::MediaStore;

const PROVIDER: &str = "cloudinary";

/// Account credentials for signed calls.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Clone)]
pub struct CloudinaryStore {
    client: HttpClient,
    base_url: String,
    cloud_name: String,
    upload_preset: String,
    credentials: Option<ApiCredentials>,
    timeout: Duration,
}

impl CloudinaryStore {
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if `cloud_name` is empty or
    /// the HTTP client cannot be constructed
    pub fn new(
        base_url: impl Into<String>,
        cloud_name: impl Into<String>,
        upload_preset: impl Into<String>,
        credentials: Option<ApiCredentials>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let cloud_name = cloud_name.into();
        if cloud_name.trim().is_empty() {
            return Err(ServiceError::Misconfiguration(
                "media.cloud_name is not set".to_string(),
            ));
        }
        Ok(Self {
            client: HttpClient::new()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cloud_name,
            upload_preset: upload_preset.into(),
            credentials,
            timeout,
        })
    }

    /// Credentials are optional here; without them `remove` reports
    /// `Misconfiguration` while uploads keep working.
    ///
    /// # Errors
    ///
    /// See [`CloudinaryStore::new`].
    pub fn new_from_config(config: &MediaConfig) -> Result<Self, ServiceError> {
        let credentials = match (
            Config::secret("media.api_key_env", &config.api_key_env),
            Config::secret("media.api_secret_env", &config.api_secret_env),
        ) {
            (Ok(api_key), Ok(api_secret)) => Some(ApiCredentials {
                api_key,
                api_secret,
            }),
            _ => None,
        };
        Self::new(
            config.base_url.clone(),
            config.cloud_name.clone(),
            config.upload_preset.clone(),
            credentials,
            Duration::from_secs(config.timeout_secs),
        )
    }

    #[must_use]
    pub fn with_http_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/v1_1/{}/image/{}",
            self.base_url, self.cloud_name, action
        )
    }

    async fn download(&self, source_url: &str) -> Result<Vec<u8>, ServiceError> {
        let request = self.client.inner().get(source_url);
        let response = self
            .client
            .execute_with_retry(request, self.timeout, "image-download")
            .await?;
        let bytes = response.bytes().await.map_err(|e| {
            ServiceError::Transport(format!("image download was interrupted: {e}"))
        })?;
        if bytes.is_empty() {
            return Err(ServiceError::InvalidResponse(format!(
                "candidate image at {source_url} is empty"
            )));
        }
        Ok(bytes.to_vec())
    }
}

/// Hex SHA-256 over the alphabetically sorted `key=value` pairs joined by
/// `&`, followed by the API secret.
#[must_use]
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let to_sign = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(&self, source_url: &str, key: &str) -> Result<String, ServiceError> {
        let image = self.download(source_url).await?;
        debug!(key = %key, bytes = image.len(), "Candidate image downloaded");

        let file_name = format!("{}.png", key.rsplit('/').next().unwrap_or(key));
        let response = self
            .client
            .execute_with_retry_using(
                || {
                    let form = Form::new()
                        .part(
                            "file",
                            Part::bytes(image.clone()).file_name(file_name.clone()),
                        )
                        .text("upload_preset", self.upload_preset.clone())
                        .text("public_id", key.to_string());
                    Ok(self.client.inner().post(self.endpoint("upload")).multipart(form))
                },
                self.timeout,
                PROVIDER,
            )
            .await?;

        let uploaded: UploadResponse = read_json(response, PROVIDER).await?;
        let url = uploaded
            .secure_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                ServiceError::InvalidResponse("cloudinary upload returned no secure_url".into())
            })?;

        info!(key = %key, url = %url, "Image stored");
        Ok(url)
    }

    async fn remove(&self, key: &str) -> Result<(), ServiceError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ServiceError::Misconfiguration(
                "removing media requires media.api_key_env and media.api_secret_env".to_string(),
            )
        })?;

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign_params(
            &[("public_id", key), ("timestamp", &timestamp)],
            &credentials.api_secret,
        );

        let response = self
            .client
            .execute_with_retry_using(
                || {
                    let form = Form::new()
                        .text("public_id", key.to_string())
                        .text("timestamp", timestamp.clone())
                        .text("api_key", credentials.api_key.clone())
                        .text("signature", signature.clone())
                        .text("signature_algorithm", "sha256");
                    Ok(self.client.inner().post(self.endpoint("destroy")).multipart(form))
                },
                self.timeout,
                PROVIDER,
            )
            .await?;

        let destroyed: DestroyResponse = read_json(response, PROVIDER).await?;
        match destroyed.result.as_str() {
            // already gone is as good as removed
            "ok" | "not found" => {
                info!(key = %key, result = %destroyed.result, "Image removed");
                Ok(())
            }
            other => Err(ServiceError::InvalidResponse(format!(
                "cloudinary destroy answered '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    #[serde(default)]
    result: String,
}
