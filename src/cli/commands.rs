//! Command implementations
//!
//! Commands that run the pipeline start a worker pool, do their work, and
//! always shut the pool down before printing, so whatever they print is the
//! state left in the store.

use anky_config::Config;
use anky_engine::{RunAck, RunHandle, RunReport, SessionEndOutcome};
use anky_store::{ArtifactRepository, FileStore};
use anky_utils::error::{RepositoryError, TriggerError};
use anky_utils::types::{Artifact, ArtifactId, ArtifactStatus, SessionEnd, SessionId};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::warn;

use super::args::Commands;
use crate::{Anky, ExitCode};

pub(crate) async fn execute(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Submit { event, wait, json } => submit(config, &event, wait, json).await,
        Commands::Status { artifact_id, json } => status(config, artifact_id, json).await,
        Commands::Resume { artifact, json } => resume(config, artifact, json).await,
    }
}

// ============================================================================
// submit
// ============================================================================

async fn submit(config: &Config, event: &Path, wait: bool, json: bool) -> Result<ExitCode> {
    let end = read_event(event).await?;
    let anky = Anky::start(config)?;
    let store = anky.store().clone();

    let handled = handle_event(&anky, end, wait).await;
    anky.shutdown().await;
    let (outcome, interrupted) = handled?;

    let artifact = match outcome.artifact_id {
        Some(id) => Some(ArtifactView::load(store.as_ref(), id).await?),
        None => None,
    };
    let view = SubmitView::new(&outcome, artifact);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", view.render());
    }

    Ok(if interrupted {
        ExitCode::INTERRUPTED
    } else {
        view.exit_code()
    })
}

/// Run the trigger and, with `wait`, the run it started. The flag is set
/// when the wait was interrupted.
async fn handle_event(
    anky: &Anky,
    end: SessionEnd,
    wait: bool,
) -> Result<(SessionEndOutcome, bool)> {
    let mut outcome = anky
        .handler()
        .handle(end)
        .await
        .context("Failed to handle session-ended event")?;

    if !wait {
        return Ok((outcome, false));
    }
    match outcome.run.as_mut() {
        Some(run) => {
            let finished = wait_for_runs(std::slice::from_mut(run)).await?;
            Ok((outcome, finished.is_none()))
        }
        None => {
            if outcome.ack == RunAck::Started {
                warn!(
                    artifact_id = ?outcome.artifact_id,
                    "Another run holds this artifact, not waiting for it"
                );
            }
            Ok((outcome, false))
        }
    }
}

async fn read_event(path: &Path) -> Result<SessionEnd> {
    let raw = if path == Path::new("-") {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("Failed to read event from stdin")?;
        raw
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read event file {}", path.display()))?
    };
    Ok(parse_event(&raw)?)
}

pub(crate) fn parse_event(raw: &str) -> Result<SessionEnd, TriggerError> {
    serde_json::from_str(raw)
        .map_err(|e| TriggerError::Validation(format!("malformed session-ended event: {e}")))
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitView {
    session_id: SessionId,
    artifact_id: Option<ArtifactId>,
    ack: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<ArtifactView>,
}

impl SubmitView {
    pub(crate) fn new(outcome: &SessionEndOutcome, artifact: Option<ArtifactView>) -> Self {
        let (ack, reason) = match &outcome.ack {
            RunAck::NotEligible(verdict) => ("not_eligible", Some(verdict.to_string())),
            RunAck::Started => ("started", None),
            RunAck::Finished(_) => ("finished", None),
        };
        Self {
            session_id: outcome.session.id,
            artifact_id: outcome.artifact_id,
            ack,
            reason,
            artifact,
        }
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        match (&self.artifact, &self.reason) {
            (None, reason) => {
                let _ = writeln!(
                    out,
                    "Session {}: no artifact ({})",
                    self.session_id,
                    reason.as_deref().unwrap_or("not eligible")
                );
            }
            (Some(artifact), _) => {
                out.push_str(&artifact.render());
                if !artifact.artifact.status().is_terminal() {
                    let _ = writeln!(out, "\nStopped before finishing; continue with `anky resume`.");
                }
            }
        }
        out
    }

    pub(crate) fn exit_code(&self) -> ExitCode {
        match &self.artifact {
            Some(view) if view.artifact.status() == ArtifactStatus::Failed => {
                ExitCode::PIPELINE_FAILED
            }
            _ => ExitCode::SUCCESS,
        }
    }
}

// ============================================================================
// status
// ============================================================================

async fn status(config: &Config, artifact_id: ArtifactId, json: bool) -> Result<ExitCode> {
    let store = Anky::open_store(config)?;
    let view = ArtifactView::load(store.as_ref(), artifact_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", view.render());
    }
    Ok(ExitCode::SUCCESS)
}

/// An artifact together with the statuses it went through.
#[derive(Debug, Serialize)]
pub(crate) struct ArtifactView {
    #[serde(flatten)]
    artifact: Artifact,
    status_history: Vec<ArtifactStatus>,
}

impl ArtifactView {
    pub(crate) async fn load(store: &FileStore, id: ArtifactId) -> Result<Self, RepositoryError> {
        Ok(Self {
            artifact: store.get(id).await?,
            status_history: store.status_history(id).await?,
        })
    }

    pub(crate) fn render(&self) -> String {
        let a = &self.artifact;
        let history: Vec<&str> = self.status_history.iter().map(|s| s.as_str()).collect();

        let mut out = String::new();
        let _ = writeln!(out, "artifact  {}", a.id);
        let _ = writeln!(out, "session   {}", a.session_id);
        let _ = writeln!(out, "status    {}", a.status());
        let _ = writeln!(out, "history   {}", history.join(" → "));
        if !a.ticker.is_empty() {
            let _ = writeln!(out, "token     {} (${})", a.token_name, a.ticker);
        }
        if !a.image_url.is_empty() {
            let _ = writeln!(out, "image     {}", a.image_url);
        }
        if let Some(post_id) = &a.post_id {
            let _ = writeln!(out, "post      {post_id}");
        }
        if let Some(reason) = &a.failure_reason {
            let _ = writeln!(out, "failure   {reason}");
        }
        if let Some(lease) = &a.lease {
            let _ = writeln!(
                out,
                "lease     {} until {}",
                lease.owner,
                lease.expires_at.to_rfc3339()
            );
        }
        out
    }
}

// ============================================================================
// resume
// ============================================================================

async fn resume(config: &Config, artifact: Option<ArtifactId>, json: bool) -> Result<ExitCode> {
    let anky = Anky::start(config)?;
    let resumed = resume_runs(&anky, artifact).await;
    anky.shutdown().await;

    let Some(reports) = resumed? else {
        return Ok(ExitCode::INTERRUPTED);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print!("{}", render_reports(&reports));
    }
    Ok(reports_exit_code(&reports))
}

async fn resume_runs(anky: &Anky, artifact: Option<ArtifactId>) -> Result<Option<Vec<RunReport>>> {
    let mut runs = match artifact {
        Some(id) => {
            let existing = anky.store().get(id).await?;
            if existing.status().is_terminal() {
                return Err(RepositoryError::Terminal {
                    artifact_id: id,
                    status: existing.status(),
                }
                .into());
            }
            vec![anky.supervisor().submit(id).await?]
        }
        None => anky.supervisor().recover().await?,
    };
    wait_for_runs(&mut runs).await
}

pub(crate) fn render_reports(reports: &[RunReport]) -> String {
    if reports.is_empty() {
        return "Nothing to resume.\n".to_string();
    }
    let mut out = String::new();
    for report in reports {
        let status = report.status.map_or("unknown", |s| s.as_str());
        match &report.error {
            Some(error) => {
                let _ = writeln!(out, "{}  {status}  {error}", report.artifact_id);
            }
            None => {
                let _ = writeln!(out, "{}  {status}", report.artifact_id);
            }
        }
    }
    out
}

pub(crate) fn reports_exit_code(reports: &[RunReport]) -> ExitCode {
    if reports
        .iter()
        .any(|r| r.status == Some(ArtifactStatus::Failed))
    {
        ExitCode::PIPELINE_FAILED
    } else {
        ExitCode::SUCCESS
    }
}

/// Wait for every run to report. `None` when Ctrl-C arrived first; the
/// caller's shutdown then leaves the runs resumable.
async fn wait_for_runs(runs: &mut [RunHandle]) -> Result<Option<Vec<RunReport>>> {
    let all = async {
        let mut reports = Vec::with_capacity(runs.len());
        for run in runs.iter_mut() {
            reports.push(run.outcome().await?);
        }
        Ok::<_, TriggerError>(reports)
    };

    tokio::select! {
        reports = all => Ok(Some(reports?)),
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted, unfinished runs stay resumable");
            Ok(None)
        }
    }
}
