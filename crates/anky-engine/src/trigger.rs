//! Session-ended trigger
//!
//! Applies the final state of a writing session, decides eligibility, and
//! for a qualifying session creates its artifact and hands the run to the
//! supervisor. The caller gets an acknowledgement after at most `ack_wait`;
//! the run itself carries on in the pool.

use anky_store::{ArtifactRepository, SessionRepository};
use anky_utils::error::{RepositoryError, TriggerError};
use anky_utils::types::{
    Artifact, ArtifactId, ArtifactStatus, SessionEnd, SessionStatus, WritingSession,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::gate::{Eligibility, EligibilityGate};
use crate::supervisor::{PipelineSupervisor, RunHandle};

/// What the trigger tells its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAck {
    /// No artifact: the session did not pass the gate.
    NotEligible(Eligibility),
    /// A run is in progress.
    Started,
    /// The run already ended with this status.
    Finished(ArtifactStatus),
}

#[derive(Debug, Clone)]
pub struct SessionEndOutcome {
    pub session: WritingSession,
    pub artifact_id: Option<ArtifactId>,
    pub ack: RunAck,
    /// Handle on the run started by this event, if one was.
    pub run: Option<RunHandle>,
}

#[derive(Clone)]
pub struct SessionEndedHandler {
    sessions: Arc<dyn SessionRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    gate: EligibilityGate,
    supervisor: PipelineSupervisor,
    ack_wait: Duration,
}

impl SessionEndedHandler {
    #[must_use]
    pub fn new(supervisor: PipelineSupervisor) -> Self {
        let orchestrator = supervisor.orchestrator();
        let repos = orchestrator.repositories();
        let settings = orchestrator.settings();
        Self {
            sessions: repos.sessions.clone(),
            artifacts: repos.artifacts.clone(),
            gate: EligibilityGate::new(settings.min_elapsed),
            ack_wait: settings.ack_wait,
            supervisor,
        }
    }

    /// Handle one "session ended" event.
    ///
    /// # Errors
    ///
    /// A session that already ended keeps the values it was recorded with;
    /// a repeated event only re-acknowledges its artifact.
    ///
    /// - `TriggerError::Validation` for nil identifiers, empty text, or a
    ///   session owned by another user; nothing is written
    /// - `TriggerError::Repository` when the store fails
    /// - `TriggerError::PoolClosed` when the worker pool is shutting down
    pub async fn handle(&self, end: SessionEnd) -> Result<SessionEndOutcome, TriggerError> {
        validate(&end)?;

        let mut session = match self.sessions.get_session(end.session_id).await {
            Ok(session) => session,
            Err(RepositoryError::SessionNotFound(_)) => new_session(&end),
            Err(e) => return Err(e.into()),
        };
        if session.user_id != end.user_id {
            return Err(TriggerError::Validation(format!(
                "session {} belongs to another user",
                session.id
            )));
        }
        // an ended session is never rewritten; repeats are judged on the recorded values
        let already_ended = session.status == SessionStatus::Completed;
        if already_ended {
            if session.text != end.text
                || session.elapsed_secs != end.elapsed_secs
                || session.is_anky != end.is_anky
            {
                warn!(session_id = %session.id, "Repeated end event disagrees with the recorded session, ignoring its values");
            }
        } else {
            session.apply_end(&end);
        }

        let verdict = self.gate.evaluate(&session);
        if !verdict.is_eligible() {
            if !already_ended {
                self.sessions.save_session(&session).await?;
            }
            info!(session_id = %session.id, reason = %verdict, "Session not eligible for an artifact");
            return Ok(SessionEndOutcome {
                artifact_id: session.artifact_id,
                session,
                ack: RunAck::NotEligible(verdict),
                run: None,
            });
        }

        let artifact = match self.existing_artifact(&session).await? {
            Some(existing) => existing,
            None => self.create_artifact(&session).await?,
        };
        if !already_ended || session.artifact_id != Some(artifact.id) {
            session.artifact_id = Some(artifact.id);
            self.sessions.save_session(&session).await?;
        }

        if artifact.status().is_terminal() {
            return Ok(SessionEndOutcome {
                session,
                artifact_id: Some(artifact.id),
                ack: RunAck::Finished(artifact.status()),
                run: None,
            });
        }
        if artifact
            .lease
            .as_ref()
            .is_some_and(|lease| !lease.is_expired_at(Utc::now()))
        {
            info!(artifact_id = %artifact.id, "Artifact already has a run in progress");
            return Ok(SessionEndOutcome {
                session,
                artifact_id: Some(artifact.id),
                ack: RunAck::Started,
                run: None,
            });
        }

        let mut run = self.supervisor.submit(artifact.id).await?;
        let ack = match tokio::time::timeout(self.ack_wait, run.outcome()).await {
            Ok(Ok(report)) => match report.status {
                Some(status) if status.is_terminal() => RunAck::Finished(status),
                _ => RunAck::Started,
            },
            Ok(Err(e)) => return Err(e),
            Err(_) => RunAck::Started,
        };
        info!(artifact_id = %artifact.id, ack = ?ack, "Artifact pipeline acknowledged");

        Ok(SessionEndOutcome {
            session,
            artifact_id: Some(artifact.id),
            ack,
            run: Some(run),
        })
    }

    async fn existing_artifact(
        &self,
        session: &WritingSession,
    ) -> Result<Option<Artifact>, RepositoryError> {
        if let Some(id) = session.artifact_id {
            match self.artifacts.get(id).await {
                Ok(artifact) => return Ok(Some(artifact)),
                Err(RepositoryError::ArtifactNotFound(_)) => {
                    warn!(session_id = %session.id, artifact_id = %id, "Session points at a missing artifact");
                }
                Err(e) => return Err(e),
            }
        }
        self.artifacts.find_by_session(session.id).await
    }

    async fn create_artifact(&self, session: &WritingSession) -> Result<Artifact, RepositoryError> {
        let artifact = Artifact::new(session);
        match self.artifacts.create(&artifact).await {
            Ok(()) => {
                info!(session_id = %session.id, artifact_id = %artifact.id, "Artifact created");
                Ok(artifact)
            }
            // lost a race with a concurrent event for the same session
            Err(RepositoryError::Duplicate { existing, .. }) => self.artifacts.get(existing).await,
            Err(e) => Err(e),
        }
    }
}

fn validate(end: &SessionEnd) -> Result<(), TriggerError> {
    if end.session_id.is_nil() {
        return Err(TriggerError::Validation("session id is nil".into()));
    }
    if end.user_id.is_nil() {
        return Err(TriggerError::Validation("user id is nil".into()));
    }
    if end.text.trim().is_empty() {
        return Err(TriggerError::Validation("session text is empty".into()));
    }
    Ok(())
}

/// Session row for an event whose start was never recorded.
fn new_session(end: &SessionEnd) -> WritingSession {
    let starting_timestamp = i64::try_from(end.elapsed_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|elapsed| end.ending_timestamp.checked_sub_signed(elapsed))
        .unwrap_or(end.ending_timestamp);
    WritingSession {
        id: end.session_id,
        starting_timestamp,
        ..WritingSession::start(end.user_id, String::new())
    }
}
