//! Artifact generation engine
//!
//! - [`SessionEndedHandler`] - the trigger: applies a session's end, runs the
//!   [`EligibilityGate`], creates the artifact and acknowledges quickly
//! - [`PipelineSupervisor`] - bounded worker pool that owns detached runs,
//!   shutdown, and crash recovery
//! - [`PipelineOrchestrator`] - the stage sequence for one artifact
//!
//! # Example
//!
//! ```rust,no_run
//! use anky_engine::{Collaborators, PipelineOrchestrator, PipelineSettings, PipelineSupervisor,
//!     Repositories, SessionEndedHandler};
//! use anky_store::FileStore;
//! use std::sync::Arc;
//!
//! # async fn demo(config: anky_config::Config, end: anky_utils::types::SessionEnd) -> anyhow::Result<()> {
//! let store = Arc::new(FileStore::open(&config.store.dir)?);
//! let orchestrator = PipelineOrchestrator::new(
//!     Collaborators::from_config(&config)?,
//!     Repositories::from_store(store),
//!     PipelineSettings::from(&config),
//! );
//! let supervisor = PipelineSupervisor::start(Arc::new(orchestrator));
//! let outcome = SessionEndedHandler::new(supervisor.clone()).handle(end).await?;
//! println!("{:?}", outcome.ack);
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod gate;
mod orchestrator;
mod services;
mod settings;
mod supervisor;
mod trigger;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use gate::{Eligibility, EligibilityGate};
pub use orchestrator::{PipelineOrchestrator, RunOutcome};
pub use services::{Collaborators, Repositories};
pub use settings::PipelineSettings;
pub use supervisor::{PipelineSupervisor, RunHandle, RunReport};
pub use trigger::{RunAck, SessionEndOutcome, SessionEndedHandler};
