//! Bounded wait for an image job
//!
//! The first poll happens immediately. After each non-terminal answer the
//! poller sleeps for the current interval, which starts at `initial`, grows by
//! `multiplier` and is capped at `max_interval`. At most `max_attempts` polls
//! are made; cancellation interrupts both the sleep and an in-flight poll.

use anky_config::PollingConfig;
use anky_utils::error::PipelineError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ImageGenerationClient, JobStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for BackoffPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            initial: Duration::from_secs(config.initial_interval_secs),
            max_interval: Duration::from_secs(config.max_interval_secs),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the `attempt`-th poll (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImagePoller {
    policy: BackoffPolicy,
}

impl ImagePoller {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Poll `job_id` until it completes.
    ///
    /// Returns the number of polls made.
    ///
    /// # Errors
    ///
    /// - `PipelineError::ImageJobFailed` when the provider reports failure
    /// - `PipelineError::PollExhausted` after `max_attempts` processing answers
    /// - `PipelineError::PollImage` when a poll request itself fails
    /// - `PipelineError::Cancelled` when `cancel` fires
    pub async fn await_completion(
        &self,
        client: &dyn ImageGenerationClient,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<u32, PipelineError> {
        let mut attempt = 0;

        while attempt < self.policy.max_attempts {
            attempt += 1;

            let status = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                polled = client.poll(job_id) => polled.map_err(PipelineError::PollImage)?,
            };

            match status {
                JobStatus::Completed => {
                    info!(job_id = %job_id, attempt = attempt, "Image job completed");
                    return Ok(attempt);
                }
                JobStatus::Failed => {
                    return Err(PipelineError::ImageJobFailed {
                        job_id: job_id.to_string(),
                    });
                }
                JobStatus::Processing => {}
            }

            if attempt == self.policy.max_attempts {
                break;
            }

            let delay = self.policy.delay_after(attempt);
            debug!(
                job_id = %job_id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Image job still processing"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        Err(PipelineError::PollExhausted {
            job_id: job_id.to_string(),
            attempts: attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anky_utils::error::ServiceError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Answers polls from a script, repeating the last entry.
    struct ScriptedJob {
        script: Vec<Result<JobStatus, ServiceError>>,
        polls: Mutex<Vec<Instant>>,
    }

    impl ScriptedJob {
        fn new(script: Vec<Result<JobStatus, ServiceError>>) -> Self {
            Self {
                script,
                polls: Mutex::new(Vec::new()),
            }
        }

        fn poll_count(&self) -> usize {
            self.polls.lock().unwrap().len()
        }

        fn gaps(&self) -> Vec<Duration> {
            let polls = self.polls.lock().unwrap();
            polls.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl ImageGenerationClient for ScriptedJob {
        async fn submit(&self, _prompt: &str) -> Result<String, ServiceError> {
            Ok("abc".into())
        }

        async fn poll(&self, _job_id: &str) -> Result<JobStatus, ServiceError> {
            let mut polls = self.polls.lock().unwrap();
            polls.push(Instant::now());
            let index = (polls.len() - 1).min(self.script.len() - 1);
            self.script[index].clone()
        }

        async fn fetch_candidates(&self, _job_id: &str) -> Result<Vec<String>, ServiceError> {
            Ok(vec![])
        }
    }

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = policy(10);
        let delays: Vec<u64> = (1..=6).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_unit_multiplier_is_fixed_interval() {
        let policy = BackoffPolicy {
            multiplier: 1.0,
            ..policy(3)
        };
        assert_eq!(policy.delay_after(1), policy.delay_after(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_backoff() {
        let job = ScriptedJob::new(vec![
            Ok(JobStatus::Processing),
            Ok(JobStatus::Processing),
            Ok(JobStatus::Processing),
            Ok(JobStatus::Completed),
        ]);
        let attempts = ImagePoller::new(policy(60))
            .await_completion(&job, "abc", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(attempts, 4);
        assert_eq!(
            job.gaps(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_stops_polling() {
        let job = ScriptedJob::new(vec![Ok(JobStatus::Processing), Ok(JobStatus::Failed)]);
        let err = ImagePoller::new(policy(60))
            .await_completion(&job, "abc", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ImageJobFailed { ref job_id } if job_id == "abc"));
        assert_eq!(job.poll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_job_is_bounded() {
        let job = ScriptedJob::new(vec![Ok(JobStatus::Processing)]);
        let err = ImagePoller::new(policy(4))
            .await_completion(&job, "abc", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::PollExhausted { attempts: 4, .. }));
        assert_eq!(job.poll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_is_fatal() {
        let job = ScriptedJob::new(vec![Err(ServiceError::ProviderOutage("502".into()))]);
        let err = ImagePoller::new(policy(60))
            .await_completion(&job, "abc", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::PollImage(_)));
        assert_eq!(job.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let job = ScriptedJob::new(vec![Ok(JobStatus::Processing)]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let err = ImagePoller::new(policy(60))
            .await_completion(&job, "abc", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        // polls at t=0 and t=5, cancelled during the 10s sleep
        assert_eq!(job.poll_count(), 2);
    }
}
