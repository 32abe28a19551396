use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::TransitionError;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The nil identifier, which is never valid for a persisted record.
            #[must_use]
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            #[must_use]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of a timed writing session.
    SessionId
);
uuid_newtype!(
    /// Identifier of the user owning sessions and artifacts.
    UserId
);
uuid_newtype!(
    /// Identifier of a generated artifact.
    ArtifactId
);

/// Lifecycle of a writing session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
}

/// A user's timed writing session.
///
/// Created when the session starts and mutated exactly once, when it ends.
/// The pipeline never deletes sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingSession {
    pub id: SessionId,
    pub user_id: UserId,
    #[serde(default)]
    pub session_index_for_user: u32,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub text: String,
    pub starting_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ending_timestamp: Option<DateTime<Utc>>,
    /// Elapsed writing time in seconds.
    #[serde(default)]
    pub elapsed_secs: u64,
    #[serde(default)]
    pub words_written: u32,
    /// Whether the client flagged this as an artifact-worthy session.
    #[serde(default)]
    pub is_anky: bool,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub artifact_id: Option<ArtifactId>,
}

impl WritingSession {
    /// Start a new session for `user_id` answering `prompt`.
    #[must_use]
    pub fn start(user_id: UserId, prompt: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            session_index_for_user: 0,
            prompt: prompt.into(),
            text: String::new(),
            starting_timestamp: Utc::now(),
            ending_timestamp: None,
            elapsed_secs: 0,
            words_written: 0,
            is_anky: false,
            status: SessionStatus::Active,
            artifact_id: None,
        }
    }

    /// Apply the final values carried by a session-ended event.
    pub fn apply_end(&mut self, end: &SessionEnd) {
        self.ending_timestamp = Some(end.ending_timestamp);
        self.text = end.text.clone();
        self.elapsed_secs = end.elapsed_secs;
        self.words_written = end.words_written;
        self.is_anky = end.is_anky;
        self.status = SessionStatus::Completed;
    }
}

/// Payload of the "session ended" trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub session_id: SessionId,
    pub user_id: UserId,
    #[serde(default = "Utc::now")]
    pub ending_timestamp: DateTime<Utc>,
    pub text: String,
    pub elapsed_secs: u64,
    #[serde(default)]
    pub words_written: u32,
    pub is_anky: bool,
}

/// Externally observable status of an artifact.
///
/// The variants are ordered as the pipeline visits them. `Failed` is reachable
/// from every non-terminal status; `Completed` and `Failed` are terminal.
///
/// ```text
/// created → starting_processing → reflection_completed → going_to_generate_image
///   → generating_image → image_generated → uploading_image → image_uploaded
///   → casting_to_farcaster → completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Created,
    StartingProcessing,
    ReflectionCompleted,
    GoingToGenerateImage,
    GeneratingImage,
    ImageGenerated,
    UploadingImage,
    ImageUploaded,
    /// The publishing stage.
    CastingToFarcaster,
    Completed,
    Failed,
}

impl ArtifactStatus {
    /// Forward sequence of a successful run.
    pub const SEQUENCE: [ArtifactStatus; 10] = [
        Self::Created,
        Self::StartingProcessing,
        Self::ReflectionCompleted,
        Self::GoingToGenerateImage,
        Self::GeneratingImage,
        Self::ImageGenerated,
        Self::UploadingImage,
        Self::ImageUploaded,
        Self::CastingToFarcaster,
        Self::Completed,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StartingProcessing => "starting_processing",
            Self::ReflectionCompleted => "reflection_completed",
            Self::GoingToGenerateImage => "going_to_generate_image",
            Self::GeneratingImage => "generating_image",
            Self::ImageGenerated => "image_generated",
            Self::UploadingImage => "uploading_image",
            Self::ImageUploaded => "image_uploaded",
            Self::CastingToFarcaster => "casting_to_farcaster",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in [`Self::SEQUENCE`]; `None` for `Failed`.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| s == self)
    }

    /// The status that follows this one on a successful run.
    #[must_use]
    pub fn successor(&self) -> Option<ArtifactStatus> {
        self.position()
            .and_then(|idx| Self::SEQUENCE.get(idx + 1))
            .copied()
    }

    /// Transition table.
    ///
    /// A non-terminal status may move to its immediate successor or to
    /// `Failed`. Re-asserting the current status is allowed and changes nothing.
    /// Terminal statuses accept no other status.
    #[must_use]
    pub fn can_transition_to(&self, next: ArtifactStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // "publishing" is accepted as an alias for the cast stage
        if s == "publishing" {
            return Ok(Self::CastingToFarcaster);
        }
        Self::SEQUENCE
            .iter()
            .chain(std::iter::once(&Self::Failed))
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown artifact status '{s}'"))
    }
}

/// Exclusive claim on an artifact held by one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    #[must_use]
    pub fn new(owner: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            owner: owner.into(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The unit the pipeline produces for one qualifying writing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub user_id: UserId,
    pub session_id: SessionId,
    status: ArtifactStatus,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub reflection: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub token_name: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub image_job_id: Option<String>,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub lease: Option<Lease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    /// New artifact in the `created` status for a session.
    #[must_use]
    pub fn new(session: &WritingSession) -> Self {
        let now = Utc::now();
        Self {
            id: ArtifactId::new(),
            user_id: session.user_id,
            session_id: session.id,
            status: ArtifactStatus::Created,
            prompt: session.prompt.clone(),
            reflection: String::new(),
            image_prompt: String::new(),
            token_name: String::new(),
            ticker: String::new(),
            image_job_id: None,
            image_url: String::new(),
            post_id: None,
            failure_reason: None,
            lease: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn status(&self) -> ArtifactStatus {
        self.status
    }

    /// Move to `next`, enforcing the transition table.
    ///
    /// Returns `Ok(true)` when the status changed and `Ok(false)` for a
    /// re-assertion of the current status.
    pub fn advance(&mut self, next: ArtifactStatus) -> Result<bool, TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        if self.status == next {
            return Ok(false);
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Move to `failed`, recording why. No-op once terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ArtifactStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
        true
    }

    /// Whether the lease, if any, is held by someone other than `owner` and is still live.
    #[must_use]
    pub fn is_leased_by_other(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| lease.owner != owner && !lease.is_expired_at(now))
    }
}

/// A user's linked social-publishing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialIdentity {
    /// Managed signer authorised to post on the user's behalf.
    pub signer_uuid: String,
    #[serde(default)]
    pub fid: Option<u64>,
}
