//! Error taxonomy for the artifact pipeline
//!
//! Upstream-service failures are normalised into [`ServiceError`] by every
//! HTTP collaborator. The orchestrator wraps them, together with data errors
//! and persistence errors, in [`PipelineError`], tagging each with the stage
//! that produced it.

use std::time::Duration;
use thiserror::Error;

use crate::types::{ArtifactId, ArtifactStatus, SessionId};

/// Failure talking to an upstream service (text generation, image
/// generation, media storage, social publishing).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Transport-level failure (connection refused, DNS, TLS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider rejected our credentials (401, 403, missing key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider rate limit or quota exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider returned 5xx after retries
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    /// Request did not finish within its timeout
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Provider answered but the payload was malformed or empty
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Client could not be built from configuration
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),
}

/// Attempted status move that the transition table forbids.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Illegal artifact status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: ArtifactStatus,
    pub to: ArtifactStatus,
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Artifact {0} not found")]
    ArtifactNotFound(ArtifactId),

    #[error("Writing session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Writing session {session_id} already has artifact {existing}")]
    Duplicate {
        session_id: SessionId,
        existing: ArtifactId,
    },

    #[error("Artifact {artifact_id} is leased by '{owner}'")]
    LeaseHeld { artifact_id: ArtifactId, owner: String },

    #[error("Artifact {artifact_id} is already {status}")]
    Terminal {
        artifact_id: ArtifactId,
        status: ArtifactStatus,
    },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Other(String),
}

/// Pipeline stage names used in logs and failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Claim,
    Reflect,
    GenerateImage,
    AwaitImage,
    FetchCandidates,
    Upload,
    Publish,
}

impl Stage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Reflect => "reflect",
            Self::GenerateImage => "generate_image",
            Self::AwaitImage => "await_image",
            Self::FetchCandidates => "fetch_candidates",
            Self::Upload => "upload",
            Self::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that ends a pipeline run early.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Reflection failed: {0}")]
    Reflect(#[source] ServiceError),

    #[error("Image submission failed: {0}")]
    SubmitImage(#[source] ServiceError),

    #[error("Image status poll failed: {0}")]
    PollImage(#[source] ServiceError),

    #[error("Image job {job_id} reported failure")]
    ImageJobFailed { job_id: String },

    #[error("Image job {job_id} still processing after {attempts} polls")]
    PollExhausted { job_id: String, attempts: u32 },

    #[error("Fetching image candidates failed: {0}")]
    FetchCandidates(#[source] ServiceError),

    #[error("No candidate output available for image job {job_id}")]
    NoCandidates { job_id: String },

    #[error("Image upload failed: {0}")]
    Upload(#[source] ServiceError),

    #[error("Publishing failed: {0}")]
    Publish(#[source] ServiceError),

    #[error("No linked social identity for a required publish")]
    MissingIdentity,

    #[error("Identity lookup failed: {0}")]
    IdentityLookup(#[source] RepositoryError),

    #[error("Persisted status {status} is missing {what}")]
    MissingInput {
        status: ArtifactStatus,
        what: &'static str,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Pipeline deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },

    #[error("Pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stage that produced the error, when it belongs to one.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Reflect(_) => Some(Stage::Reflect),
            Self::SubmitImage(_) => Some(Stage::GenerateImage),
            Self::PollImage(_) | Self::ImageJobFailed { .. } | Self::PollExhausted { .. } => {
                Some(Stage::AwaitImage)
            }
            Self::FetchCandidates(_) | Self::NoCandidates { .. } => Some(Stage::FetchCandidates),
            Self::Upload(_) => Some(Stage::Upload),
            Self::Publish(_) | Self::MissingIdentity | Self::IdentityLookup(_) => {
                Some(Stage::Publish)
            }
            Self::Repository(RepositoryError::LeaseHeld { .. })
            | Self::Repository(RepositoryError::Terminal { .. }) => Some(Stage::Claim),
            _ => None,
        }
    }

    /// Data errors are non-retryable problems with what a provider returned,
    /// as opposed to the provider being unreachable.
    #[must_use]
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::NoCandidates { .. }
                | Self::ImageJobFailed { .. }
                | Self::MissingInput { .. }
                | Self::Reflect(ServiceError::InvalidResponse(_))
                | Self::SubmitImage(ServiceError::InvalidResponse(_))
                | Self::PollImage(ServiceError::InvalidResponse(_))
                | Self::FetchCandidates(ServiceError::InvalidResponse(_))
        )
    }

    /// Whether the artifact must be left resumable instead of being failed.
    #[must_use]
    pub fn leaves_artifact_resumable(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Repository(RepositoryError::LeaseHeld { .. })
                | Self::Repository(RepositoryError::Terminal { .. })
        )
    }
}

/// Rejections raised by the session-ended trigger before any artifact exists.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Invalid session-ended event: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Pipeline worker pool is shut down")]
    PoolClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_attribution() {
        let err = PipelineError::NoCandidates {
            job_id: "abc".into(),
        };
        assert_eq!(err.stage(), Some(Stage::FetchCandidates));
        assert!(err.is_data_error());
        assert_eq!(
            err.to_string(),
            "No candidate output available for image job abc"
        );

        let err = PipelineError::Upload(ServiceError::ProviderOutage("cloudinary 502".into()));
        assert_eq!(err.stage(), Some(Stage::Upload));
        assert!(!err.is_data_error());
    }

    #[test]
    fn cancellation_keeps_artifact_resumable() {
        assert!(PipelineError::Cancelled.leaves_artifact_resumable());
        assert!(
            !PipelineError::DeadlineExceeded {
                deadline: Duration::from_secs(1)
            }
            .leaves_artifact_resumable()
        );
    }

    #[test]
    fn transition_error_message() {
        let err = TransitionError {
            from: ArtifactStatus::Completed,
            to: ArtifactStatus::Failed,
        };
        assert_eq!(
            err.to_string(),
            "Illegal artifact status transition: completed -> failed"
        );
    }
}
