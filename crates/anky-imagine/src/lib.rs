//! Image generation for the anky pipeline
//!
//! [`ImageGenerationClient`] is the asynchronous job protocol: submit a
//! prompt, poll the job, fetch the finished candidates. [`ImagePoller`] waits
//! for a job with bounded, cancellable exponential backoff.

mod client;
mod poller;

pub use client::ImagineClient;
pub use poller::{BackoffPolicy, ImagePoller};

use anky_utils::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Provider-independent state of an image job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` are terminal; every other provider string
    /// (`pending`, `in-progress`, ...) means the job is still running.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Processing,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[async_trait]
pub trait ImageGenerationClient: Send + Sync {
    /// Start a job for `prompt`, returning the provider job id.
    async fn submit(&self, prompt: &str) -> Result<String, ServiceError>;

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ServiceError>;

    /// Candidate output URLs of a completed job; may be empty.
    async fn fetch_candidates(&self, job_id: &str) -> Result<Vec<String>, ServiceError>;
}
