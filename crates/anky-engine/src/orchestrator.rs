//! Pipeline orchestrator
//!
//! Drives one artifact through its stages:
//!
//! ```text
//! reflect → submit image → await image → fetch + upload → publish
//! ```
//!
//! Before a stage runs, the status announcing it is persisted; after it
//! succeeds, its output and the next status are persisted together. A run
//! therefore resumes from whatever status it finds: the status alone says
//! which stage comes next and which inputs must already be stored.
//!
//! A run holds the artifact's lease from start to finish and is bounded by
//! the configured deadline. The first stage error fails the artifact;
//! cancellation leaves it at its last persisted status for a later resume.

use anky_config::PublishPolicy;
use anky_imagine::ImagePoller;
use anky_media::media_key;
use anky_publisher::{PostRequest, compose_post};
use anky_utils::error::{PipelineError, ServiceError, Stage};
use anky_utils::logging::{StageTimer, log_side_failure, log_status, pipeline_span};
use anky_utils::redaction::redact_error_message;
use anky_utils::types::{Artifact, ArtifactId, ArtifactStatus};
use rand::seq::IndexedRandom;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::services::{Collaborators, Repositories};
use crate::settings::PipelineSettings;

/// Result of a run that reached `completed`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub artifact: Artifact,
    /// Status the run found when it claimed the artifact.
    pub resumed_from: ArtifactStatus,
}

pub struct PipelineOrchestrator {
    services: Collaborators,
    repos: Repositories,
    settings: PipelineSettings,
    poller: ImagePoller,
    instance: String,
}

/// State carried through one run.
struct Run {
    artifact: Artifact,
    owner: String,
    /// Media key this or an earlier run may have written to.
    uploaded_key: Option<String>,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(services: Collaborators, repos: Repositories, settings: PipelineSettings) -> Self {
        Self {
            poller: ImagePoller::new(settings.polling.clone()),
            services,
            repos,
            settings,
            instance: format!("anky:{}", Uuid::new_v4()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Run (or resume) the pipeline for `artifact_id`.
    ///
    /// # Errors
    ///
    /// - `Repository(LeaseHeld)` / `Repository(Terminal)` when the artifact
    ///   cannot be claimed; nothing is modified
    /// - `Cancelled` when `cancel` fires; the artifact keeps its last
    ///   persisted status and can be resumed
    /// - any stage error or `DeadlineExceeded`; the artifact is `failed`
    pub async fn run(
        &self,
        artifact_id: ArtifactId,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        // one lease owner per run, so concurrent runs in this process exclude each other
        let owner = format!("{}/{}", self.instance, Uuid::new_v4());
        let artifact = self
            .repos
            .artifacts
            .claim(artifact_id, &owner, self.settings.lease_ttl)
            .await?;

        let span = pipeline_span(artifact.id, artifact.session_id);
        self.run_claimed(artifact, owner, cancel)
            .instrument(span)
            .await
    }

    async fn run_claimed(
        &self,
        artifact: Artifact,
        owner: String,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let resumed_from = artifact.status();
        info!(status = %resumed_from, "Pipeline run started");

        let upload_attempted = !artifact.image_url.is_empty()
            || resumed_from == ArtifactStatus::UploadingImage;
        let uploaded_key = upload_attempted.then(|| self.media_key(&artifact));
        let mut run = Run {
            artifact,
            owner,
            uploaded_key,
        };

        let deadline = self.settings.deadline;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PipelineError::Cancelled),
            bounded = tokio::time::timeout(deadline, self.execute(&mut run, &cancel)) => {
                bounded.unwrap_or(Err(PipelineError::DeadlineExceeded { deadline }))
            }
        };

        match result {
            Ok(()) => {
                self.release(&run).await;
                info!(
                    image_url = %run.artifact.image_url,
                    post_id = ?run.artifact.post_id,
                    "Pipeline run completed"
                );
                run.artifact.lease = None;
                Ok(RunOutcome {
                    artifact: run.artifact,
                    resumed_from,
                })
            }
            Err(err) if err.leaves_artifact_resumable() => {
                warn!(status = %run.artifact.status(), error = %err, "Pipeline run interrupted");
                self.release(&run).await;
                Err(err)
            }
            Err(err) => {
                self.fail(&mut run, &err).await;
                self.release(&run).await;
                Err(err)
            }
        }
    }

    /// Walk the stages from the current status up to `completed`.
    async fn execute(&self, run: &mut Run, cancel: &CancellationToken) -> Result<(), PipelineError> {
        loop {
            match run.artifact.status() {
                ArtifactStatus::Created => {
                    self.persist(run, ArtifactStatus::StartingProcessing).await?;
                }
                ArtifactStatus::StartingProcessing => {
                    timed(Stage::Reflect, self.reflect(run)).await?;
                }
                ArtifactStatus::ReflectionCompleted => {
                    self.persist(run, ArtifactStatus::GoingToGenerateImage).await?;
                }
                ArtifactStatus::GoingToGenerateImage => {
                    timed(Stage::GenerateImage, self.submit_image(run)).await?;
                }
                ArtifactStatus::GeneratingImage => {
                    timed(Stage::AwaitImage, self.await_image(run, cancel)).await?;
                }
                ArtifactStatus::ImageGenerated => {
                    self.persist(run, ArtifactStatus::UploadingImage).await?;
                }
                ArtifactStatus::UploadingImage => {
                    timed(Stage::Upload, self.upload_image(run)).await?;
                }
                ArtifactStatus::ImageUploaded => {
                    self.persist(run, ArtifactStatus::CastingToFarcaster).await?;
                }
                ArtifactStatus::CastingToFarcaster => {
                    timed(Stage::Publish, self.publish(run)).await?;
                }
                ArtifactStatus::Completed => return Ok(()),
                ArtifactStatus::Failed => {
                    return Err(PipelineError::MissingInput {
                        status: ArtifactStatus::Failed,
                        what: "a resumable status",
                    });
                }
            }
        }
    }

    /// Move to `next` and write the artifact before anything else happens.
    async fn persist(&self, run: &mut Run, next: ArtifactStatus) -> Result<(), PipelineError> {
        run.artifact.advance(next)?;
        self.repos.artifacts.save(&run.artifact).await?;
        log_status(next);
        Ok(())
    }

    async fn reflect(&self, run: &mut Run) -> Result<(), PipelineError> {
        let session = self
            .repos
            .sessions
            .get_session(run.artifact.session_id)
            .await?;
        if session.text.trim().is_empty() {
            return Err(PipelineError::MissingInput {
                status: run.artifact.status(),
                what: "session text",
            });
        }

        let reflection = self
            .services
            .reflection
            .reflect(&session.text)
            .await
            .map_err(PipelineError::Reflect)?;

        run.artifact.reflection = reflection.reflection;
        run.artifact.image_prompt = reflection.image_prompt;
        run.artifact.token_name = reflection.token_name;
        run.artifact.ticker = reflection.ticker;
        self.persist(run, ArtifactStatus::ReflectionCompleted).await
    }

    async fn submit_image(&self, run: &mut Run) -> Result<(), PipelineError> {
        if run.artifact.image_prompt.trim().is_empty() {
            return Err(PipelineError::MissingInput {
                status: run.artifact.status(),
                what: "image prompt",
            });
        }

        let job_id = self
            .services
            .images
            .submit(&run.artifact.image_prompt)
            .await
            .map_err(PipelineError::SubmitImage)?;
        info!(job_id = %job_id, "Image job accepted");

        run.artifact.image_job_id = Some(job_id);
        self.persist(run, ArtifactStatus::GeneratingImage).await
    }

    async fn await_image(&self, run: &mut Run, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let job_id = required_job_id(&run.artifact)?;
        let attempts = self
            .poller
            .await_completion(self.services.images.as_ref(), &job_id, cancel)
            .await?;
        info!(job_id = %job_id, attempts = attempts, "Image ready");
        self.persist(run, ArtifactStatus::ImageGenerated).await
    }

    async fn upload_image(&self, run: &mut Run) -> Result<(), PipelineError> {
        let job_id = required_job_id(&run.artifact)?;
        let candidates = self
            .services
            .images
            .fetch_candidates(&job_id)
            .await
            .map_err(PipelineError::FetchCandidates)?;

        let chosen = candidates
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| PipelineError::NoCandidates {
                job_id: job_id.clone(),
            })?;
        info!(
            job_id = %job_id,
            candidates = candidates.len(),
            chosen = %chosen,
            "Image candidate chosen"
        );

        // recorded before the call: an upload that errors or is cut off may still land
        let key = self.media_key(&run.artifact);
        run.uploaded_key = Some(key.clone());
        let url = self
            .services
            .media
            .upload(&chosen, &key)
            .await
            .map_err(PipelineError::Upload)?;

        run.artifact.image_url = url;
        self.persist(run, ArtifactStatus::ImageUploaded).await
    }

    async fn publish(&self, run: &mut Run) -> Result<(), PipelineError> {
        if let Some(post_id) = self.post(run).await? {
            run.artifact.post_id = Some(post_id);
        }
        self.persist(run, ArtifactStatus::Completed).await
    }

    /// Publish according to the policy. `None` when publishing is skipped.
    async fn post(&self, run: &Run) -> Result<Option<String>, PipelineError> {
        if self.settings.publish_policy == PublishPolicy::Disabled {
            info!("Publishing disabled");
            return Ok(None);
        }

        let identity = self
            .repos
            .users
            .social_identity(run.artifact.user_id)
            .await
            .map_err(PipelineError::IdentityLookup)?;
        let Some(identity) = identity else {
            if self.settings.publish_policy == PublishPolicy::Required {
                return Err(PipelineError::MissingIdentity);
            }
            info!(user_id = %run.artifact.user_id, "No linked identity, publish skipped");
            return Ok(None);
        };

        let publisher = self.services.publisher.as_ref().ok_or_else(|| {
            PipelineError::Publish(ServiceError::Misconfiguration(
                "a linked identity exists but no social publisher is configured".to_string(),
            ))
        })?;

        let session = self
            .repos
            .sessions
            .get_session(run.artifact.session_id)
            .await?;
        let embed_url = Some(run.artifact.image_url.clone())
            .filter(|url| self.settings.embed_image && !url.is_empty());

        let post_id = publisher
            .post(PostRequest {
                text: compose_post(&session.text),
                identity,
                embed_url,
                idempotency_key: session.id.to_string(),
            })
            .await
            .map_err(PipelineError::Publish)?;
        Ok(Some(post_id))
    }

    fn media_key(&self, artifact: &Artifact) -> String {
        media_key(artifact.session_id, self.settings.media_folder.as_deref())
    }

    /// Terminal failure: compensate, then persist `failed` with a redacted reason.
    async fn fail(&self, run: &mut Run, err: &PipelineError) {
        let stage = err.stage().map_or("pipeline", |stage| stage.as_str());
        warn!(
            stage = stage,
            status = %run.artifact.status(),
            data_error = err.is_data_error(),
            error = %redact_error_message(&err.to_string()),
            "Pipeline run failed"
        );

        if self.settings.cleanup_on_failure {
            if let Some(key) = run.uploaded_key.take() {
                match self.services.media.remove(&key).await {
                    Ok(()) => {
                        info!(key = %key, "Uploaded image removed after failure");
                        run.artifact.image_url.clear();
                    }
                    Err(e) => log_side_failure("media cleanup", &e.to_string()),
                }
            }
        }

        run.artifact
            .fail(redact_error_message(&format!("{stage}: {err}")));
        match self.repos.artifacts.save(&run.artifact).await {
            Ok(_) => log_status(ArtifactStatus::Failed),
            Err(e) => log_side_failure("persist failed status", &e.to_string()),
        }
    }

    async fn release(&self, run: &Run) {
        if let Err(e) = self
            .repos
            .artifacts
            .release(run.artifact.id, &run.owner)
            .await
        {
            log_side_failure("lease release", &e.to_string());
        }
    }
}

fn required_job_id(artifact: &Artifact) -> Result<String, PipelineError> {
    artifact
        .image_job_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(PipelineError::MissingInput {
            status: artifact.status(),
            what: "image job id",
        })
}

/// Log start, completion and failure of one stage around `stage_fut`.
async fn timed<F>(stage: Stage, stage_fut: F) -> Result<(), PipelineError>
where
    F: Future<Output = Result<(), PipelineError>>,
{
    let timer = StageTimer::start(stage);
    match stage_fut.await {
        Ok(()) => {
            timer.complete();
            Ok(())
        }
        Err(err) => {
            timer.fail(&err.to_string());
            Err(err)
        }
    }
}
