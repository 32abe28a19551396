//! Logging and observability for the pipeline
//!
//! Structured logging through `tracing`: every pipeline run gets a span
//! carrying the artifact and session identifiers, and every stage logs its
//! start, completion with duration, and failure.

use std::time::Instant;
use tracing::{Level, error, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::Stage;
use crate::redaction::redact_error_message;
use crate::types::{ArtifactId, ArtifactStatus, SessionId};

/// Crates whose events pass the default filter at `info` (`debug` when verbose).
const ANKY_TARGETS: &[&str] = &[
    "anky",
    "anky_config",
    "anky_engine",
    "anky_imagine",
    "anky_llm",
    "anky_media",
    "anky_publisher",
    "anky_store",
    "anky_utils",
];

/// Install the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` wins when set. Otherwise the anky crates log at `info` (or
/// `debug` when `verbose`) and everything else at `warn`. `json` switches the
/// compact human format for JSON lines, for log shipping.
pub fn init_tracing(verbose: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose { "debug" } else { "info" };
    let directives = ANKY_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .fold(String::from("warn"), |acc, d| acc + "," + &d);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout is reserved for command output
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else if verbose {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span wrapping one pipeline run.
pub fn pipeline_span(artifact_id: ArtifactId, session_id: SessionId) -> tracing::Span {
    span!(
        Level::INFO,
        "pipeline_run",
        artifact_id = %artifact_id,
        session_id = %session_id,
    )
}

/// Timer for a single stage; logs start on creation.
#[derive(Debug)]
pub struct StageTimer {
    stage: Stage,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: Stage) -> Self {
        info!(stage = %stage, "Stage started");
        Self {
            stage,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    pub fn complete(self) {
        info!(
            stage = %self.stage,
            duration_ms = %self.elapsed_ms(),
            "Stage completed"
        );
    }

    /// Log a stage failure. The message is redacted before it is emitted.
    pub fn fail(self, error: &str) {
        error!(
            stage = %self.stage,
            duration_ms = %self.elapsed_ms(),
            error = %redact_error_message(error),
            "Stage failed"
        );
    }
}

/// Log a persisted status transition.
pub fn log_status(status: ArtifactStatus) {
    info!(status = %status, "Artifact status persisted");
}

/// Log a best-effort side task (cleanup, lease release) that did not succeed.
pub fn log_side_failure(what: &str, error: &str) {
    warn!(what = what, error = %redact_error_message(error), "Best-effort step failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_timer_measures() {
        let timer = StageTimer::start(Stage::Reflect);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
        timer.complete();
    }

    #[test]
    fn spans_construct_without_subscriber() {
        let span = pipeline_span(ArtifactId::new(), SessionId::new());
        let _guard = span.enter();
        log_status(ArtifactStatus::Created);
    }
}
