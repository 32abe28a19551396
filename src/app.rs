//! Process wiring: file store, live collaborators, worker pool

use anky_config::Config;
use anky_engine::{
    Collaborators, PipelineOrchestrator, PipelineSettings, PipelineSupervisor, Repositories,
    SessionEndedHandler,
};
use anky_store::FileStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// A running pipeline over the configured file store.
pub struct Anky {
    store: Arc<FileStore>,
    supervisor: PipelineSupervisor,
}

impl Anky {
    /// Open the store at `config.store.dir`, creating it when missing.
    pub fn open_store(config: &Config) -> Result<Arc<FileStore>> {
        let store = FileStore::open(&config.store.dir).with_context(|| {
            format!("Failed to open store at {}", config.store.dir.display())
        })?;
        debug!(root = %store.root(), "Store opened");
        Ok(Arc::new(store))
    }

    /// Build the HTTP collaborators from `config` and start the worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config) -> Result<Self> {
        config.validate_services()?;
        let store = Self::open_store(config)?;
        let services =
            Collaborators::from_config(config).context("Failed to configure pipeline services")?;
        Ok(Self::with_services(config, store, services))
    }

    /// Start the worker pool with caller-provided collaborators.
    #[must_use]
    pub fn with_services(config: &Config, store: Arc<FileStore>, services: Collaborators) -> Self {
        let orchestrator = PipelineOrchestrator::new(
            services,
            Repositories::from_store(store.clone()),
            PipelineSettings::from(config),
        );
        Self {
            store,
            supervisor: PipelineSupervisor::start(Arc::new(orchestrator)),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    #[must_use]
    pub fn supervisor(&self) -> &PipelineSupervisor {
        &self.supervisor
    }

    #[must_use]
    pub fn handler(&self) -> SessionEndedHandler {
        SessionEndedHandler::new(self.supervisor.clone())
    }

    /// Cancel unfinished runs, leaving them resumable, and wait for them.
    pub async fn shutdown(self) {
        self.supervisor.shutdown().await;
    }
}
