//! Farcaster publishing through the Neynar API

use anky_config::{Config, PublisherConfig};
use anky_utils::error::ServiceError;
use anky_utils::http_client::{HttpClient, read_json};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::{PostRequest, SocialPublisher};

const PROVIDER: &str = "neynar";

#[derive(Clone)]
pub struct NeynarPublisher {
    client: HttpClient,
    base_url: String,
    api_key: String,
    channel_id: Option<String>,
    timeout: Duration,
}

impl NeynarPublisher {
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        channel_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: HttpClient::new()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            channel_id: channel_id.filter(|c| !c.trim().is_empty()),
            timeout,
        })
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the API key variable is unset
    pub fn new_from_config(config: &PublisherConfig) -> Result<Self, ServiceError> {
        let api_key = Config::secret("publisher.api_key_env", &config.api_key_env)
            .map_err(|e| ServiceError::Misconfiguration(e.to_string()))?;
        Self::new(
            config.base_url.clone(),
            api_key,
            config.channel_id.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    #[must_use]
    pub fn with_http_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl SocialPublisher for NeynarPublisher {
    async fn post(&self, request: PostRequest) -> Result<String, ServiceError> {
        let body = CastRequest {
            signer_uuid: &request.identity.signer_uuid,
            text: &request.text,
            channel_id: self.channel_id.as_deref(),
            idem: &request.idempotency_key,
            embeds: request
                .embed_url
                .as_deref()
                .map(|url| vec![Embed { url }])
                .unwrap_or_default(),
        };
        let http = self
            .client
            .inner()
            .post(format!("{}/v2/farcaster/cast", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body);

        let response = self
            .client
            .execute_with_retry(http, self.timeout, PROVIDER)
            .await?;
        let published: CastResponse = read_json(response, PROVIDER).await?;

        let hash = published
            .cast
            .and_then(|cast| cast.hash)
            .or(published.hash)
            .filter(|hash| !hash.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::InvalidResponse("neynar accepted the cast but returned no hash".into())
            })?;

        info!(cast_hash = %hash, fid = ?request.identity.fid, "Cast published");
        Ok(hash)
    }
}

#[derive(Debug, Serialize)]
struct CastRequest<'a> {
    signer_uuid: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<&'a str>,
    idem: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct CastResponse {
    #[serde(default)]
    cast: Option<CastRef>,
    #[serde(default)]
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CastRef {
    #[serde(default)]
    hash: Option<String>,
}
