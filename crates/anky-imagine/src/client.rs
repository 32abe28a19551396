//! HTTP client for the image generation service
//!
//! The service fronts a Midjourney-style generator as a collection of image
//! items: creating an item starts a job, reading it reports progress and,
//! once finished, the upscaled variants.

use anky_config::{Config, ImagineConfig};
use anky_utils::error::ServiceError;
use anky_utils::http_client::{HttpClient, read_json};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::{ImageGenerationClient, JobStatus};

const PROVIDER: &str = "imagine";

#[derive(Clone)]
pub struct ImagineClient {
    client: HttpClient,
    base_url: String,
    api_token: String,
    prompt_prefix: String,
    timeout: Duration,
}

impl ImagineClient {
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        prompt_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: HttpClient::new()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            prompt_prefix: prompt_prefix.into(),
            timeout,
        })
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the token variable is unset
    pub fn new_from_config(config: &ImagineConfig) -> Result<Self, ServiceError> {
        let token = Config::secret("imagine.api_key_env", &config.api_key_env)
            .map_err(|e| ServiceError::Misconfiguration(e.to_string()))?;
        Self::new(
            config.base_url.clone(),
            token,
            config.prompt_prefix.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    #[must_use]
    pub fn with_http_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// Prompt as sent to the generator: style prefix, a space, the prompt.
    fn full_prompt(&self, prompt: &str) -> String {
        let prompt = prompt.trim();
        if self.prompt_prefix.is_empty() {
            prompt.to_string()
        } else {
            format!("{} {}", self.prompt_prefix, prompt)
        }
    }

    async fn fetch_item(&self, job_id: &str) -> Result<ImageItem, ServiceError> {
        let request = self
            .client
            .inner()
            .get(format!("{}/items/images/{}", self.base_url, job_id))
            .bearer_auth(&self.api_token);
        let response = self
            .client
            .execute_with_retry(request, self.timeout, PROVIDER)
            .await?;
        let envelope: Envelope<ImageItem> = read_json(response, PROVIDER).await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ImageGenerationClient for ImagineClient {
    async fn submit(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = SubmitRequest {
            prompt: self.full_prompt(prompt),
        };
        let request = self
            .client
            .inner()
            .post(format!("{}/items/images/", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body);

        // a retried submit could start a second job
        let response = self
            .client
            .execute_once(request, self.timeout, PROVIDER)
            .await?;
        let envelope: Envelope<Created> = read_json(response, PROVIDER).await?;

        let job_id = match envelope.data.id {
            serde_json::Value::String(id) => id,
            serde_json::Value::Number(id) => id.to_string(),
            _ => String::new(),
        };
        if job_id.trim().is_empty() {
            return Err(ServiceError::InvalidResponse(
                "imagine accepted the prompt but returned no job id".to_string(),
            ));
        }

        debug!(job_id = %job_id, "Image job submitted");
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ServiceError> {
        let item = self.fetch_item(job_id).await?;
        let status = JobStatus::from_provider(&item.status);
        debug!(job_id = %job_id, provider_status = %item.status, status = ?status, "Image job polled");
        Ok(status)
    }

    async fn fetch_candidates(&self, job_id: &str) -> Result<Vec<String>, ServiceError> {
        let item = self.fetch_item(job_id).await?;
        Ok(item
            .upscaled_urls
            .unwrap_or_default()
            .into_iter()
            .filter(|url| !url.trim().is_empty())
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest {
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Created {
    #[serde(default)]
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    #[serde(default)]
    status: String,
    #[serde(default)]
    upscaled_urls: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anky_utils::stub_server::{StubResponse, StubServer};
    use serde_json::json;

    fn client(server: &StubServer) -> ImagineClient {
        ImagineClient::new(
            server.base_url(),
            "imagine-token",
            "https://s.mj.run/style",
            Duration::from_secs(5),
        )
        .unwrap()
        .with_http_client(
            HttpClient::new()
                .unwrap()
                .with_backoff(Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn test_submit_prefixes_prompt() {
        let server =
            StubServer::start(vec![StubResponse::json(200, json!({"data": {"id": "abc"}}))]).await;

        let job_id = client(&server).submit("  a river at dusk ").await.unwrap();

        assert_eq!(job_id, "abc");
        let request = &server.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/items/images/");
        assert_eq!(request.header("authorization"), Some("Bearer imagine-token"));
        assert_eq!(
            request.body_json()["prompt"],
            "https://s.mj.run/style a river at dusk"
        );
    }

    #[tokio::test]
    async fn test_submit_numeric_id() {
        let server =
            StubServer::start(vec![StubResponse::json(200, json!({"data": {"id": 42}}))]).await;
        assert_eq!(client(&server).submit("p").await.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_submit_without_id_is_invalid() {
        let server =
            StubServer::start(vec![StubResponse::json(200, json!({"data": {"id": ""}}))]).await;
        let err = client(&server).submit("p").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_submit_is_sent_once_on_server_error() {
        let server = StubServer::start(vec![
            StubResponse::text(502, "bad gateway"),
            StubResponse::json(200, json!({"data": {"id": "second"}})),
        ])
        .await;

        let err = client(&server).submit("a river at dusk").await.unwrap_err();

        assert!(matches!(err, ServiceError::ProviderOutage(_)));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_maps_provider_status() {
        let server = StubServer::start(vec![
            StubResponse::json(200, json!({"data": {"status": "pending"}})),
            StubResponse::json(200, json!({"data": {"status": "in-progress"}})),
            StubResponse::json(200, json!({"data": {"status": "completed"}})),
            StubResponse::json(200, json!({"data": {"status": "failed"}})),
        ])
        .await;
        let client = client(&server);

        assert_eq!(client.poll("abc").await.unwrap(), JobStatus::Processing);
        assert_eq!(client.poll("abc").await.unwrap(), JobStatus::Processing);
        assert_eq!(client.poll("abc").await.unwrap(), JobStatus::Completed);
        assert_eq!(client.poll("abc").await.unwrap(), JobStatus::Failed);
        assert_eq!(server.requests()[0].path, "/items/images/abc");
    }

    #[tokio::test]
    async fn test_fetch_candidates_reads_upscaled_urls() {
        let server = StubServer::start(vec![
            StubResponse::json(
                200,
                json!({"data": {
                    "status": "completed",
                    "url": "https://cdn/grid.png",
                    "upscaled_urls": ["https://cdn/1.png", "", "https://cdn/2.png"]
                }}),
            ),
            StubResponse::json(200, json!({"data": {"status": "completed", "upscaled_urls": null}})),
        ])
        .await;
        let client = client(&server);

        assert_eq!(
            client.fetch_candidates("abc").await.unwrap(),
            vec!["https://cdn/1.png", "https://cdn/2.png"]
        );
        assert!(client.fetch_candidates("abc").await.unwrap().is_empty());
    }
}
