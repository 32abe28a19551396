//! Supervised worker pool
//!
//! Runs are queued on a bounded channel and executed by at most
//! `concurrency` tasks at a time. Each run executes in its own task so a
//! panic surfaces as a `JoinError` instead of taking the pool down; the
//! artifact is then marked failed. Shutdown cancels every run cooperatively,
//! which leaves interrupted artifacts resumable, and [`PipelineSupervisor::recover`]
//! picks them up again on the next start.

use anky_store::ArtifactRepository;
use anky_utils::error::{PipelineError, RepositoryError, TriggerError};
use anky_utils::logging::log_side_failure;
use anky_utils::redaction::redact_error_message;
use anky_utils::types::{ArtifactId, ArtifactStatus};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::orchestrator::PipelineOrchestrator;

/// How a supervised run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub artifact_id: ArtifactId,
    /// Status persisted when the run ended; `None` if it could not be read back.
    pub status: Option<ArtifactStatus>,
    /// Redacted error message for runs that did not complete.
    pub error: Option<String>,
}

impl RunReport {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == Some(ArtifactStatus::Completed)
    }
}

/// Acknowledgement of a submitted run, resolvable to its [`RunReport`].
#[derive(Debug, Clone)]
pub struct RunHandle {
    artifact_id: ArtifactId,
    report: watch::Receiver<Option<RunReport>>,
}

impl RunHandle {
    #[must_use]
    pub fn artifact_id(&self) -> ArtifactId {
        self.artifact_id
    }

    /// The report, if the run has already ended.
    #[must_use]
    pub fn try_outcome(&self) -> Option<RunReport> {
        self.report.borrow().clone()
    }

    /// Wait for the run to end.
    ///
    /// # Errors
    ///
    /// `TriggerError::PoolClosed` if the pool dropped the run without reporting.
    pub async fn outcome(&mut self) -> Result<RunReport, TriggerError> {
        let report = self
            .report
            .wait_for(Option::is_some)
            .await
            .map_err(|_| TriggerError::PoolClosed)?;
        report.clone().ok_or(TriggerError::PoolClosed)
    }
}

struct Job {
    artifact_id: ArtifactId,
    report: watch::Sender<Option<RunReport>>,
}

struct Inner {
    orchestrator: Arc<PipelineOrchestrator>,
    artifacts: Arc<dyn ArtifactRepository>,
    queue: mpsc::Sender<Job>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

#[derive(Clone)]
pub struct PipelineSupervisor {
    inner: Arc<Inner>,
}

impl PipelineSupervisor {
    /// Start the pool on the current tokio runtime.
    #[must_use]
    pub fn start(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        let settings = orchestrator.settings();
        let (queue, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let workers = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let artifacts = orchestrator.repositories().artifacts.clone();
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        info!(
            concurrency = settings.concurrency,
            queue_capacity = settings.queue_capacity,
            "Pipeline supervisor started"
        );

        tracker.spawn(dispatch(
            receiver,
            workers,
            orchestrator.clone(),
            artifacts.clone(),
            shutdown.clone(),
            tracker.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                orchestrator,
                artifacts,
                queue,
                shutdown,
                tracker,
            }),
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.inner.orchestrator
    }

    /// Queue a run for `artifact_id`. Waits only while the queue is full.
    ///
    /// # Errors
    ///
    /// `TriggerError::PoolClosed` once [`shutdown`](Self::shutdown) has begun.
    pub async fn submit(&self, artifact_id: ArtifactId) -> Result<RunHandle, TriggerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TriggerError::PoolClosed);
        }
        let (report, receiver) = watch::channel(None);
        let job = Job {
            artifact_id,
            report,
        };
        tokio::select! {
            () = self.inner.shutdown.cancelled() => return Err(TriggerError::PoolClosed),
            sent = self.inner.queue.send(job) => sent.map_err(|_| TriggerError::PoolClosed)?,
        }
        debug!(artifact_id = %artifact_id, "Pipeline run queued");
        Ok(RunHandle {
            artifact_id,
            report: receiver,
        })
    }

    /// Re-submit every unfinished artifact nobody holds a live lease on.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be listed or the pool is shut down.
    pub async fn recover(&self) -> Result<Vec<RunHandle>, TriggerError> {
        let now = Utc::now();
        let mut handles = Vec::new();
        for artifact in self.inner.artifacts.list_unfinished().await? {
            if artifact
                .lease
                .as_ref()
                .is_some_and(|lease| !lease.is_expired_at(now))
            {
                debug!(artifact_id = %artifact.id, "Artifact is leased, not recovering");
                continue;
            }
            info!(
                artifact_id = %artifact.id,
                status = %artifact.status(),
                "Recovering unfinished artifact"
            );
            handles.push(self.submit(artifact.id).await?);
        }
        Ok(handles)
    }

    /// Stop accepting runs, cancel those in flight, and wait for them to wind down.
    pub async fn shutdown(&self) {
        info!("Pipeline supervisor shutting down");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<Job>,
    workers: Arc<Semaphore>,
    orchestrator: Arc<PipelineOrchestrator>,
    artifacts: Arc<dyn ArtifactRepository>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let job = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                report_unstarted(&artifacts, job).await;
                break;
            }
            permit = workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    report_unstarted(&artifacts, job).await;
                    break;
                }
            },
        };

        let orchestrator = orchestrator.clone();
        let artifacts = artifacts.clone();
        let cancel = shutdown.child_token();
        tracker.spawn(async move {
            supervise(orchestrator, artifacts, job, cancel).await;
            drop(permit);
        });
    }

    receiver.close();
    while let Some(job) = receiver.recv().await {
        report_unstarted(&artifacts, job).await;
    }
}

/// Execute one run in its own task and report how it ended.
async fn supervise(
    orchestrator: Arc<PipelineOrchestrator>,
    artifacts: Arc<dyn ArtifactRepository>,
    job: Job,
    cancel: CancellationToken,
) {
    let artifact_id = job.artifact_id;
    let run = tokio::spawn(async move { orchestrator.run(artifact_id, cancel).await });

    let error = match run.await {
        Ok(Ok(_)) => None,
        Ok(Err(err)) => Some(report_error(&err)),
        Err(join_error) => {
            let reason = if join_error.is_panic() {
                "pipeline run panicked"
            } else {
                "pipeline run was aborted"
            };
            error!(artifact_id = %artifact_id, reason = reason, "Pipeline task died");
            mark_failed(&artifacts, artifact_id, reason).await;
            Some(reason.to_string())
        }
    };

    let status = artifacts.get(artifact_id).await.ok().map(|a| a.status());
    job.report.send_replace(Some(RunReport {
        artifact_id,
        status,
        error,
    }));
}

fn report_error(err: &PipelineError) -> String {
    redact_error_message(&err.to_string())
}

async fn mark_failed(artifacts: &Arc<dyn ArtifactRepository>, id: ArtifactId, reason: &str) {
    let result = async {
        let mut artifact = artifacts.get(id).await?;
        if artifact.fail(reason) {
            artifacts.save(&artifact).await?;
        }
        Ok::<_, RepositoryError>(())
    }
    .await;
    if let Err(e) = result {
        log_side_failure("mark panicked run failed", &e.to_string());
    }
}

/// A queued run that never started keeps its persisted status.
async fn report_unstarted(artifacts: &Arc<dyn ArtifactRepository>, job: Job) {
    warn!(artifact_id = %job.artifact_id, "Queued run dropped by shutdown");
    let status = artifacts.get(job.artifact_id).await.ok().map(|a| a.status());
    job.report.send_replace(Some(RunReport {
        artifact_id: job.artifact_id,
        status,
        error: Some(PipelineError::Cancelled.to_string()),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeImageGenerator, FakeReflection, SAMPLE_TEXT, TestPipeline};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_submitted_run_reports_completion() {
        let pipeline = TestPipeline::new();
        let supervisor = pipeline.supervisor();
        let (_, artifact) = pipeline.seed_artifact(SAMPLE_TEXT).await;

        let mut handle = supervisor.submit(artifact.id).await.unwrap();
        assert_eq!(handle.artifact_id(), artifact.id);
        let report = handle.outcome().await.unwrap();

        assert!(report.is_completed());
        assert_eq!(report.error, None);
        assert_eq!(handle.try_outcome(), Some(report.clone()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_runs_share_the_pool() {
        let pipeline = TestPipeline::new().with_settings(|s| s.concurrency = 2);
        let supervisor = pipeline.supervisor();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let (_, artifact) = pipeline.seed_artifact(SAMPLE_TEXT).await;
            handles.push(supervisor.submit(artifact.id).await.unwrap());
        }
        for handle in &mut handles {
            assert!(handle.outcome().await.unwrap().is_completed());
        }
        assert_eq!(pipeline.media.uploads().len(), 5);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_run_marks_artifact_failed() {
        let pipeline = TestPipeline::new().with_reflection(FakeReflection::panicking());
        let supervisor = pipeline.supervisor();
        let (_, artifact) = pipeline.seed_artifact(SAMPLE_TEXT).await;

        let report = supervisor
            .submit(artifact.id)
            .await
            .unwrap()
            .outcome()
            .await
            .unwrap();

        assert_eq!(report.status, Some(ArtifactStatus::Failed));
        assert_eq!(report.error.as_deref(), Some("pipeline run panicked"));
        let stored = pipeline.store.get(artifact.id).await.unwrap();
        assert_eq!(stored.failure_reason.as_deref(), Some("pipeline run panicked"));

        // the pool survives
        let healthy = TestPipeline {
            store: pipeline.store.clone(),
            ..TestPipeline::new()
        };
        let (_, next) = healthy.seed_artifact(SAMPLE_TEXT).await;
        let supervisor = healthy.supervisor();
        let report = supervisor
            .submit(next.id)
            .await
            .unwrap()
            .outcome()
            .await
            .unwrap();
        assert!(report.is_completed());
        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_runs_resumable() {
        let pipeline = TestPipeline::new()
            .with_images(FakeImageGenerator::stuck())
            .with_settings(|s| s.polling.max_attempts = u32::MAX);
        let supervisor = pipeline.supervisor();
        let (_, artifact) = pipeline.seed_artifact(SAMPLE_TEXT).await;

        let mut handle = supervisor.submit(artifact.id).await.unwrap();
        while pipeline.images.polls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        supervisor.shutdown().await;

        let report = handle.outcome().await.unwrap();
        assert_eq!(report.status, Some(ArtifactStatus::GeneratingImage));
        assert_eq!(
            report.error.as_deref(),
            Some(PipelineError::Cancelled.to_string().as_str())
        );
        assert!(pipeline.store.get(artifact.id).await.unwrap().lease.is_none());

        assert!(matches!(
            supervisor.submit(artifact.id).await,
            Err(TriggerError::PoolClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_resubmits_unleased_unfinished_artifacts() {
        let pipeline = TestPipeline::new();
        let (_, interrupted) = pipeline.seed_artifact(SAMPLE_TEXT).await;
        let (_, leased) = pipeline.seed_artifact(SAMPLE_TEXT).await;
        pipeline
            .store
            .claim(leased.id, "other-host/run", Duration::from_secs(600))
            .await
            .unwrap();
        let (_, mut finished) = pipeline.seed_artifact(SAMPLE_TEXT).await;
        finished.fail("image job failed");
        pipeline.store.save(&finished).await.unwrap();

        let supervisor = pipeline.supervisor();
        let mut handles = supervisor.recover().await.unwrap();

        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].artifact_id(), interrupted.id);
        assert!(handles[0].outcome().await.unwrap().is_completed());
        assert_eq!(
            pipeline.store.get(leased.id).await.unwrap().status(),
            ArtifactStatus::Created
        );

        supervisor.shutdown().await;
    }
}
