//! anky - background artifact generation for completed writing sessions
//!
//! When a writing session ends and qualifies, anky turns the text into an
//! artifact: a reflection and image prompt from a text model, a generated
//! image stored in a media library, and optionally a post on the writer's
//! linked social account. Progress is persisted after every step so a run
//! interrupted by a restart resumes where it stopped.
//!
//! anky can be used in two ways:
//! - **CLI**: `anky submit`, `anky status`, `anky resume`
//! - **Library**: wire [`SessionEndedHandler`] into your own service
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # Hand a session-ended event to the pipeline and wait for the result
//! anky submit session-end.json --wait
//!
//! # Inspect an artifact
//! anky status 6f1c2d0e-5b7a-4c1e-9a63-0d3f2b8e4a11 --json
//!
//! # Resume runs interrupted by a crash or shutdown
//! anky resume
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use anky::{Anky, Config, CliArgs};
//!
//! # async fn demo(end: anky::SessionEnd) -> anyhow::Result<()> {
//! let config = Config::discover(&CliArgs::default())?;
//! let anky = Anky::start(&config)?;
//! let outcome = anky.handler().handle(end).await?;
//! println!("{:?}", outcome.ack);
//! anky.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod app;
mod exit_codes;

#[doc(hidden)]
pub mod cli;

pub use app::Anky;
pub use exit_codes::ExitCode;

pub use anky_config::{CliArgs, Config, ConfigBuilder, ConfigError, PublishPolicy};
pub use anky_engine::{
    Collaborators, Eligibility, EligibilityGate, PipelineOrchestrator, PipelineSettings,
    PipelineSupervisor, Repositories, RunAck, RunHandle, RunOutcome, RunReport,
    SessionEndOutcome, SessionEndedHandler,
};
pub use anky_store::{ArtifactRepository, FileStore, MemoryStore, SessionRepository, UserDirectory};
pub use anky_utils::error::{PipelineError, RepositoryError, ServiceError, TriggerError};
pub use anky_utils::types::{
    Artifact, ArtifactId, ArtifactStatus, SessionEnd, SessionId, SocialIdentity, UserId,
    WritingSession,
};

#[doc(hidden)]
pub use anky_imagine as imagine;
#[doc(hidden)]
pub use anky_llm as llm;
#[doc(hidden)]
pub use anky_media as media;
#[doc(hidden)]
pub use anky_publisher as publisher;
#[doc(hidden)]
pub use anky_utils::logging;
