//! Shared HTTP client for the upstream services
//!
//! One `reqwest::Client` per collaborator, with a per-request timeout cap and
//! a retry policy for server errors and network failures. Every failure is
//! normalised into [`ServiceError`] with secrets redacted.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::redaction::redact_error_message;

/// Default maximum HTTP timeout (5 minutes)
const DEFAULT_MAX_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default connect timeout (30 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retry attempts for 5xx and network failures
const MAX_RETRIES: u32 = 2;

/// Initial backoff duration for retries (1 second)
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest slice of an error body carried into an error message
const ERROR_BODY_LIMIT: usize = 200;

/// HTTP client with timeout and retry policy.
///
/// - Per-request timeout: `min(request_timeout, max_timeout)`
/// - Up to 2 retries for 5xx and network failures, backoff 1s then 2s
/// - No retries for 4xx, nor for anything sent through [`HttpClient::execute_once`]
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    max_timeout: Duration,
    initial_backoff: Duration,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the client cannot be constructed
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_max_timeout(DEFAULT_MAX_HTTP_TIMEOUT)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Misconfiguration` if the client cannot be constructed
    pub fn with_max_timeout(max_timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ServiceError::Misconfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            max_timeout,
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    /// Override the retry backoff base; the n-th retry waits `n * initial`.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Underlying client, for building requests.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute a cloneable request with the timeout and retry policy.
    ///
    /// # Errors
    ///
    /// - `ServiceError::ProviderAuth` for 401/403
    /// - `ServiceError::ProviderQuota` for 429
    /// - `ServiceError::ProviderOutage` for 5xx after retries
    /// - `ServiceError::Timeout` for timeouts
    /// - `ServiceError::Transport` for other 4xx and for network errors after retries
    pub async fn execute_with_retry(
        &self,
        request_builder: RequestBuilder,
        request_timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, ServiceError> {
        self.execute_with_retry_using(
            || {
                request_builder.try_clone().ok_or_else(|| {
                    ServiceError::Transport("Failed to clone request for retry".to_string())
                })
            },
            request_timeout,
            provider_name,
        )
        .await
    }

    /// Like [`HttpClient::execute_with_retry`], rebuilding the request for
    /// every attempt. Needed for streaming bodies such as multipart forms.
    pub async fn execute_with_retry_using<F>(
        &self,
        make_request: F,
        request_timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, ServiceError>
    where
        F: FnMut() -> Result<RequestBuilder, ServiceError>,
    {
        self.execute_attempts(make_request, request_timeout, provider_name, MAX_RETRIES)
            .await
    }

    /// Execute a request exactly once, for calls that start work upstream and
    /// must not be repeated blindly. Errors map as in
    /// [`HttpClient::execute_with_retry`].
    pub async fn execute_once(
        &self,
        request_builder: RequestBuilder,
        request_timeout: Duration,
        provider_name: &str,
    ) -> Result<Response, ServiceError> {
        let mut request_builder = Some(request_builder);
        self.execute_attempts(
            || {
                request_builder.take().ok_or_else(|| {
                    ServiceError::Transport("request was already sent".to_string())
                })
            },
            request_timeout,
            provider_name,
            0,
        )
        .await
    }

    async fn execute_attempts<F>(
        &self,
        mut make_request: F,
        request_timeout: Duration,
        provider_name: &str,
        max_retries: u32,
    ) -> Result<Response, ServiceError>
    where
        F: FnMut() -> Result<RequestBuilder, ServiceError>,
    {
        let effective_timeout = request_timeout.min(self.max_timeout);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let request = make_request()?
                .timeout(effective_timeout)
                .build()
                .map_err(|e| {
                    ServiceError::Transport(format!(
                        "Failed to build request: {}",
                        redact_error_message(&e.to_string())
                    ))
                })?;

            debug!(
                provider = provider_name,
                attempt = attempt,
                method = %request.method(),
                timeout_secs = effective_timeout.as_secs(),
                "Executing HTTP request"
            );

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_client_error() {
                        let body = error_body(response).await;
                        return Err(map_client_error(status, provider_name, &body));
                    }

                    if status.is_server_error() {
                        if attempt <= max_retries {
                            warn!(
                                provider = provider_name,
                                attempt = attempt,
                                status = status.as_u16(),
                                "Server error, will retry"
                            );
                            tokio::time::sleep(self.initial_backoff * attempt).await;
                            continue;
                        }

                        let body = error_body(response).await;
                        return Err(ServiceError::ProviderOutage(format!(
                            "{provider_name} returned server error: {status}{body}"
                        )));
                    }

                    return Ok(response);
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(ServiceError::Timeout {
                            duration: effective_timeout,
                        });
                    }

                    let message = redact_error_message(&e.to_string());

                    if attempt <= max_retries {
                        warn!(
                            provider = provider_name,
                            attempt = attempt,
                            error = %message,
                            "Network error, will retry"
                        );
                        tokio::time::sleep(self.initial_backoff * attempt).await;
                        continue;
                    }

                    return Err(ServiceError::Transport(format!(
                        "{provider_name} request failed: {message}"
                    )));
                }
            }
        }
    }
}

/// Decode a successful response body as JSON.
///
/// # Errors
///
/// `ServiceError::InvalidResponse` when the body is not the expected shape.
pub async fn read_json<T: DeserializeOwned>(
    response: Response,
    provider_name: &str,
) -> Result<T, ServiceError> {
    let bytes = response.bytes().await.map_err(|e| {
        ServiceError::Transport(format!(
            "{provider_name} response body could not be read: {}",
            redact_error_message(&e.to_string())
        ))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ServiceError::InvalidResponse(format!("{provider_name} returned unexpected JSON: {e}"))
    })
}

/// Redacted, truncated error body formatted as a message suffix.
async fn error_body(response: Response) -> String {
    match response.text().await {
        Ok(text) if !text.trim().is_empty() => {
            let snippet: String = text.trim().chars().take(ERROR_BODY_LIMIT).collect();
            format!(" ({})", redact_error_message(&snippet))
        }
        _ => String::new(),
    }
}

/// Map HTTP client error status codes to ServiceError variants
///
/// - 401/403 → `ServiceError::ProviderAuth`
/// - 429 → `ServiceError::ProviderQuota`
/// - Other 4xx → `ServiceError::Transport`
fn map_client_error(status: StatusCode, provider_name: &str, body: &str) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::ProviderAuth(format!(
            "{provider_name} authentication failed: {status}{body}"
        )),
        StatusCode::TOO_MANY_REQUESTS => ServiceError::ProviderQuota(format!(
            "{provider_name} rate limit exceeded: {status}{body}"
        )),
        _ => ServiceError::Transport(format!(
            "{provider_name} returned client error: {status}{body}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub_server::{StubResponse, StubServer};
    use serde_json::json;

    fn fast_client() -> HttpClient {
        HttpClient::new()
            .unwrap()
            .with_backoff(Duration::from_millis(5))
    }

    #[test]
    fn test_client_error_mapping() {
        assert!(matches!(
            map_client_error(StatusCode::UNAUTHORIZED, "neynar", ""),
            ServiceError::ProviderAuth(_)
        ));
        assert!(matches!(
            map_client_error(StatusCode::FORBIDDEN, "neynar", ""),
            ServiceError::ProviderAuth(_)
        ));
        assert!(matches!(
            map_client_error(StatusCode::TOO_MANY_REQUESTS, "imagine", ""),
            ServiceError::ProviderQuota(_)
        ));
        let err = map_client_error(StatusCode::BAD_REQUEST, "cloudinary", " (bad preset)");
        assert_eq!(
            err.to_string(),
            "Transport error: cloudinary returned client error: 400 Bad Request (bad preset)"
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = StubServer::start(vec![
            StubResponse::text(503, "busy"),
            StubResponse::text(502, "still busy"),
            StubResponse::json(200, json!({"ok": true})),
        ])
        .await;
        let client = fast_client();

        let response = client
            .execute_with_retry(
                client.inner().get(server.url("/ping")),
                Duration::from_secs(5),
                "stub",
            )
            .await
            .unwrap();
        let body: serde_json::Value = read_json(response, "stub").await.unwrap();

        assert_eq!(body["ok"], true);
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_outage_after_retries_exhausted() {
        let server = StubServer::start(vec![StubResponse::text(500, "down")]).await;
        let client = fast_client();

        let err = client
            .execute_with_retry(
                client.inner().get(server.url("/ping")),
                Duration::from_secs(5),
                "stub",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::ProviderOutage(_)));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_reports_server_error() {
        let server = StubServer::start(vec![
            StubResponse::text(503, "busy"),
            StubResponse::json(200, json!({"ok": true})),
        ])
        .await;
        let client = fast_client();

        let err = client
            .execute_once(
                client.inner().post(server.url("/jobs")).json(&json!({"prompt": "p"})),
                Duration::from_secs(5),
                "stub",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::ProviderOutage(_)));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = StubServer::start(vec![StubResponse::text(401, "no")]).await;
        let client = fast_client();

        let err = client
            .execute_with_retry(
                client.inner().get(server.url("/ping")),
                Duration::from_secs(5),
                "stub",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::ProviderAuth(_)));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_response() {
        let server = StubServer::start(vec![StubResponse::text(200, "not json")]).await;
        let client = fast_client();

        let response = client
            .execute_with_retry(
                client.inner().get(server.url("/")),
                Duration::from_secs(5),
                "stub",
            )
            .await
            .unwrap();
        let err = read_json::<serde_json::Value>(response, "stub")
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidResponse(_)));
    }
}
