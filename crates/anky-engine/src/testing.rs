//! Scripted collaborators for exercising the engine without network access
//!
//! [`TestPipeline`] assembles a [`MemoryStore`] with one fake per remote
//! service. Each fake records what it was asked to do.

use anky_imagine::{BackoffPolicy, ImageGenerationClient, JobStatus};
use anky_llm::{Reflection, ReflectionEngine};
use anky_media::MediaStore;
use anky_publisher::{PostRequest, SocialPublisher};
use anky_store::{ArtifactRepository, MemoryStore, SessionRepository};
use anky_utils::error::ServiceError;
use anky_utils::types::{Artifact, SessionEnd, SessionId, UserId, WritingSession};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::orchestrator::PipelineOrchestrator;
use crate::services::{Collaborators, Repositories};
use crate::settings::PipelineSettings;
use crate::supervisor::PipelineSupervisor;
use crate::trigger::SessionEndedHandler;

pub const SAMPLE_TEXT: &str = "I wonder who I truly am. It has been a long day.";

#[must_use]
pub fn sample_reflection() -> Reflection {
    Reflection {
        reflection: "Once there was a wanderer who asked the river its name.".into(),
        image_prompt: "a blue figure sitting by a river at dusk".into(),
        token_name: "River Of Names".into(),
        ticker: "riverofnames".into(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

enum ReflectBehaviour {
    Return(Result<Reflection, ServiceError>),
    Panic,
}

pub struct FakeReflection {
    behaviour: ReflectBehaviour,
    calls: AtomicUsize,
}

impl FakeReflection {
    #[must_use]
    pub fn returning(reflection: Reflection) -> Self {
        Self::with(ReflectBehaviour::Return(Ok(reflection)))
    }

    #[must_use]
    pub fn failing(error: ServiceError) -> Self {
        Self::with(ReflectBehaviour::Return(Err(error)))
    }

    #[must_use]
    pub fn panicking() -> Self {
        Self::with(ReflectBehaviour::Panic)
    }

    fn with(behaviour: ReflectBehaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReflectionEngine for FakeReflection {
    async fn reflect(&self, _text: &str) -> Result<Reflection, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            ReflectBehaviour::Return(result) => result.clone(),
            ReflectBehaviour::Panic => panic!("reflection engine exploded"),
        }
    }
}

/// Image job that answers polls from a script, repeating its last entry.
pub struct FakeImageGenerator {
    job_id: String,
    submit_error: Option<ServiceError>,
    statuses: Vec<Result<JobStatus, ServiceError>>,
    candidates: Result<Vec<String>, ServiceError>,
    prompts: Mutex<Vec<String>>,
    polls: AtomicUsize,
}

impl FakeImageGenerator {
    /// Job "abc" that reports `processing` `polls_before` times, then `completed`.
    #[must_use]
    pub fn completing_after(polls_before: usize, candidates: Vec<String>) -> Self {
        let mut statuses: Vec<_> = (0..polls_before)
            .map(|_| Ok(JobStatus::Processing))
            .collect();
        statuses.push(Ok(JobStatus::Completed));
        Self::scripted(statuses).with_candidates(candidates)
    }

    #[must_use]
    pub fn scripted(statuses: Vec<Result<JobStatus, ServiceError>>) -> Self {
        Self {
            job_id: "abc".into(),
            submit_error: None,
            statuses,
            candidates: Ok(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        }
    }

    /// A job that never leaves `processing`.
    #[must_use]
    pub fn stuck() -> Self {
        Self::scripted(vec![Ok(JobStatus::Processing)])
    }

    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = Ok(candidates);
        self
    }

    #[must_use]
    pub fn with_candidate_error(mut self, error: ServiceError) -> Self {
        self.candidates = Err(error);
        self
    }

    #[must_use]
    pub fn with_submit_error(mut self, error: ServiceError) -> Self {
        self.submit_error = Some(error);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerationClient for FakeImageGenerator {
    async fn submit(&self, prompt: &str) -> Result<String, ServiceError> {
        lock(&self.prompts).push(prompt.to_string());
        match &self.submit_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.job_id.clone()),
        }
    }

    async fn poll(&self, _job_id: &str) -> Result<JobStatus, ServiceError> {
        let index = self.polls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.get(index).or_else(|| self.statuses.last()) {
            Some(status) => status.clone(),
            None => Ok(JobStatus::Completed),
        }
    }

    async fn fetch_candidates(&self, _job_id: &str) -> Result<Vec<String>, ServiceError> {
        self.candidates.clone()
    }
}

pub struct FakeMediaStore {
    upload_error: Option<ServiceError>,
    uploads: Mutex<Vec<(String, String)>>,
    removed: Mutex<Vec<String>>,
}

impl FakeMediaStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            upload_error: None,
            uploads: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(error: ServiceError) -> Self {
        Self {
            upload_error: Some(error),
            ..Self::new()
        }
    }

    /// `(source_url, key)` of every upload.
    pub fn uploads(&self) -> Vec<(String, String)> {
        lock(&self.uploads).clone()
    }

    pub fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }
}

impl Default for FakeMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaStore for FakeMediaStore {
    async fn upload(&self, source_url: &str, key: &str) -> Result<String, ServiceError> {
        if let Some(error) = &self.upload_error {
            return Err(error.clone());
        }
        lock(&self.uploads).push((source_url.to_string(), key.to_string()));
        Ok(format!("https://media.test/{key}.png"))
    }

    async fn remove(&self, key: &str) -> Result<(), ServiceError> {
        lock(&self.removed).push(key.to_string());
        Ok(())
    }
}

pub struct FakePublisher {
    result: Result<String, ServiceError>,
    posts: Mutex<Vec<PostRequest>>,
}

impl FakePublisher {
    #[must_use]
    pub fn returning(post_id: &str) -> Self {
        Self {
            result: Ok(post_id.to_string()),
            posts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(error: ServiceError) -> Self {
        Self {
            result: Err(error),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn posts(&self) -> Vec<PostRequest> {
        lock(&self.posts).clone()
    }
}

#[async_trait]
impl SocialPublisher for FakePublisher {
    async fn post(&self, request: PostRequest) -> Result<String, ServiceError> {
        lock(&self.posts).push(request);
        self.result.clone()
    }
}

/// Settings with short intervals, suitable for a paused or a real clock.
#[must_use]
pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        deadline: Duration::from_secs(30),
        lease_ttl: Duration::from_secs(60),
        polling: BackoffPolicy {
            initial: Duration::from_millis(10),
            max_interval: Duration::from_millis(50),
            multiplier: 2.0,
            max_attempts: 20,
        },
        concurrency: 2,
        queue_capacity: 16,
        ..PipelineSettings::default()
    }
}

/// A pipeline over a [`MemoryStore`] and scripted collaborators.
pub struct TestPipeline {
    pub store: Arc<MemoryStore>,
    pub reflection: Arc<FakeReflection>,
    pub images: Arc<FakeImageGenerator>,
    pub media: Arc<FakeMediaStore>,
    pub publisher: Arc<FakePublisher>,
    pub settings: PipelineSettings,
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPipeline {
    /// Everything succeeds: the image completes on the third poll with three
    /// candidates and publishing returns `0xcast`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            reflection: Arc::new(FakeReflection::returning(sample_reflection())),
            images: Arc::new(FakeImageGenerator::completing_after(
                2,
                vec![
                    "https://cdn.test/1.png".into(),
                    "https://cdn.test/2.png".into(),
                    "https://cdn.test/3.png".into(),
                ],
            )),
            media: Arc::new(FakeMediaStore::new()),
            publisher: Arc::new(FakePublisher::returning("0xcast")),
            settings: test_settings(),
        }
    }

    #[must_use]
    pub fn with_reflection(mut self, reflection: FakeReflection) -> Self {
        self.reflection = Arc::new(reflection);
        self
    }

    #[must_use]
    pub fn with_images(mut self, images: FakeImageGenerator) -> Self {
        self.images = Arc::new(images);
        self
    }

    #[must_use]
    pub fn with_media(mut self, media: FakeMediaStore) -> Self {
        self.media = Arc::new(media);
        self
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: FakePublisher) -> Self {
        self.publisher = Arc::new(publisher);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, adjust: impl FnOnce(&mut PipelineSettings)) -> Self {
        adjust(&mut self.settings);
        self
    }

    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            reflection: self.reflection.clone(),
            images: self.images.clone(),
            media: self.media.clone(),
            publisher: Some(self.publisher.clone()),
        }
    }

    #[must_use]
    pub fn repositories(&self) -> Repositories {
        Repositories::from_store(self.store.clone())
    }

    #[must_use]
    pub fn orchestrator(&self) -> Arc<PipelineOrchestrator> {
        Arc::new(PipelineOrchestrator::new(
            self.collaborators(),
            self.repositories(),
            self.settings.clone(),
        ))
    }

    /// Start a supervisor; needs a running tokio runtime.
    #[must_use]
    pub fn supervisor(&self) -> PipelineSupervisor {
        PipelineSupervisor::start(self.orchestrator())
    }

    #[must_use]
    pub fn handler(&self) -> SessionEndedHandler {
        SessionEndedHandler::new(self.supervisor())
    }

    /// Store an ended, qualifying session and a `created` artifact for it.
    pub async fn seed_artifact(&self, text: &str) -> (WritingSession, Artifact) {
        let user_id = UserId::new();
        let mut session = WritingSession::start(user_id, "what is alive in you?");
        session.apply_end(&session_end(session.id, user_id, text, 500, true));
        let artifact = Artifact::new(&session);
        session.artifact_id = Some(artifact.id);

        if let Err(e) = self.store.save_session(&session).await {
            panic!("seeding session failed: {e}");
        }
        if let Err(e) = self.store.create(&artifact).await {
            panic!("seeding artifact failed: {e}");
        }
        (session, artifact)
    }
}

#[must_use]
pub fn session_end(
    session_id: SessionId,
    user_id: UserId,
    text: &str,
    elapsed_secs: u64,
    is_anky: bool,
) -> SessionEnd {
    SessionEnd {
        session_id,
        user_id,
        ending_timestamp: Utc::now(),
        text: text.to_string(),
        elapsed_secs,
        words_written: u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX),
        is_anky,
    }
}
