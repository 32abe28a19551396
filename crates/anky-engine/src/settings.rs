use anky_config::{Config, PublishPolicy};
use anky_imagine::BackoffPolicy;
use std::time::Duration;

/// Runtime knobs of the engine, resolved from [`Config`].
///
/// Kept separate from the file model so tests can use sub-second deadlines.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub min_elapsed: Duration,
    pub deadline: Duration,
    pub ack_wait: Duration,
    pub lease_ttl: Duration,
    pub publish_policy: PublishPolicy,
    pub cleanup_on_failure: bool,
    /// Attach the uploaded image to the social post.
    pub embed_image: bool,
    pub media_folder: Option<String>,
    pub polling: BackoffPolicy,
    pub concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            min_elapsed: config.pipeline.min_elapsed(),
            deadline: config.pipeline.deadline(),
            ack_wait: config.pipeline.ack_wait(),
            lease_ttl: Duration::from_secs(config.workers.lease_ttl_secs),
            publish_policy: config.pipeline.publish_policy,
            cleanup_on_failure: config.pipeline.cleanup_on_failure,
            embed_image: config.publisher.embed_image,
            media_folder: config.media.folder.clone(),
            polling: BackoffPolicy::from(&config.polling),
            concurrency: config.workers.concurrency.max(1),
            queue_capacity: config.workers.queue_capacity.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_config() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.min_elapsed, Duration::from_secs(480));
        assert_eq!(settings.deadline, Duration::from_secs(1800));
        assert_eq!(settings.ack_wait, Duration::from_millis(2000));
        assert_eq!(settings.publish_policy, PublishPolicy::WhenLinked);
        assert_eq!(settings.polling.initial, Duration::from_secs(5));
        assert!(settings.lease_ttl >= settings.deadline);
    }
}
