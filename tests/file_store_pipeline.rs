//! The engine over the on-disk store: session-ended events, restarts, and
//! runs left behind by a crashed worker.

use anky::{
    ArtifactRepository, ArtifactStatus, FileStore, PipelineOrchestrator, PipelineSupervisor,
    Repositories, RunAck, SessionEndedHandler, SessionRepository, UserId, WritingSession,
};
use anky_engine::testing::{FakeImageGenerator, SAMPLE_TEXT, TestPipeline, session_end};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A supervisor running the fakes in `fakes` over a `FileStore` at `dir`.
fn supervisor(dir: &Path, fakes: &TestPipeline) -> (Arc<FileStore>, PipelineSupervisor) {
    let store = Arc::new(FileStore::open(dir).unwrap());
    let orchestrator = PipelineOrchestrator::new(
        fakes.collaborators(),
        Repositories::from_store(store.clone()),
        fakes.settings.clone(),
    );
    (store, PipelineSupervisor::start(Arc::new(orchestrator)))
}

#[tokio::test]
async fn test_session_end_runs_to_completion_on_disk() {
    let dir = TempDir::new().unwrap();
    let fakes = TestPipeline::new();
    let (store, supervisor) = supervisor(dir.path(), &fakes);
    let handler = SessionEndedHandler::new(supervisor.clone());

    let user_id = UserId::new();
    let session = WritingSession::start(user_id, "what is alive in you?");
    store.save_session(&session).await.unwrap();

    let mut outcome = handler
        .handle(session_end(session.id, user_id, SAMPLE_TEXT, 495, true))
        .await
        .unwrap();
    let artifact_id = outcome.artifact_id.unwrap();
    if let Some(run) = outcome.run.as_mut() {
        assert!(run.outcome().await.unwrap().is_completed());
    } else {
        assert_eq!(outcome.ack, RunAck::Finished(ArtifactStatus::Completed));
    }
    supervisor.shutdown().await;

    // a fresh handle on the directory sees the same records
    let reopened = FileStore::open(dir.path()).unwrap();
    let artifact = reopened.get(artifact_id).await.unwrap();
    assert_eq!(artifact.status(), ArtifactStatus::Completed);
    assert_eq!(artifact.session_id, session.id);
    assert_eq!(
        reopened.status_history(artifact_id).await.unwrap(),
        ArtifactStatus::SEQUENCE.to_vec()
    );
    let stored_session = reopened.get_session(session.id).await.unwrap();
    assert_eq!(stored_session.artifact_id, Some(artifact_id));
    assert_eq!(stored_session.text, SAMPLE_TEXT);
}

#[tokio::test]
async fn test_restart_resumes_interrupted_run() {
    let dir = TempDir::new().unwrap();
    let stalled = TestPipeline::new()
        .with_images(FakeImageGenerator::stuck())
        .with_settings(|s| s.polling.max_attempts = u32::MAX);
    let (store, first) = supervisor(dir.path(), &stalled);

    let (session, artifact) = stalled.seed_artifact(SAMPLE_TEXT).await;
    store.save_session(&session).await.unwrap();
    store.create(&artifact).await.unwrap();

    let mut handle = first.submit(artifact.id).await.unwrap();
    while stalled.images.polls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    first.shutdown().await;
    let report = handle.outcome().await.unwrap();
    assert_eq!(report.status, Some(ArtifactStatus::GeneratingImage));
    let job_id = store.get(artifact.id).await.unwrap().image_job_id;
    assert!(job_id.is_some());

    // second process: same directory, working image service
    let healthy = TestPipeline::new();
    let (store, second) = supervisor(dir.path(), &healthy);
    let mut runs = second.recover().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].outcome().await.unwrap().is_completed());
    second.shutdown().await;

    let done = store.get(artifact.id).await.unwrap();
    assert_eq!(done.status(), ArtifactStatus::Completed);
    assert_eq!(done.image_job_id, job_id);
    assert_eq!(healthy.reflection.calls(), 0);
    assert!(healthy.images.prompts().is_empty());
}

#[tokio::test]
async fn test_expired_lease_of_crashed_worker_is_recovered() {
    let dir = TempDir::new().unwrap();
    let fakes = TestPipeline::new();
    let (store, supervisor) = supervisor(dir.path(), &fakes);

    let (session, artifact) = fakes.seed_artifact(SAMPLE_TEXT).await;
    store.save_session(&session).await.unwrap();
    store.create(&artifact).await.unwrap();

    // a worker that claimed the artifact and died without releasing it
    store
        .claim(artifact.id, "worker-gone", Duration::from_millis(20))
        .await
        .unwrap();
    assert!(supervisor.recover().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut runs = supervisor.recover().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].outcome().await.unwrap().is_completed());
    supervisor.shutdown().await;

    let done = store.get(artifact.id).await.unwrap();
    assert_eq!(done.status(), ArtifactStatus::Completed);
    assert!(done.lease.is_none());
}
