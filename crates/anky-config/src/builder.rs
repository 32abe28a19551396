use std::path::PathBuf;
use std::time::Duration;

use crate::ConfigError;
use crate::model::{Config, ConfigSource, PollingConfig, PublishPolicy};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when embedding the pipeline, or in tests, where discovery
    /// from files and environment is unwanted.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use anky_config::{Config, PublishPolicy};
    /// use std::time::Duration;
    ///
    /// let config = Config::builder()
    ///     .store_dir("/var/lib/anky")
    ///     .concurrency(8)
    ///     .deadline(Duration::from_secs(900))
    ///     .publish_policy(PublishPolicy::Disabled)
    ///     .build()
    ///     .expect("Failed to build config");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Fluent construction of a [`Config`].
///
/// Every value set here is attributed to [`ConfigSource::Programmatic`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    store_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    queue_capacity: Option<usize>,
    lease_ttl: Option<Duration>,
    deadline: Option<Duration>,
    ack_wait: Option<Duration>,
    min_elapsed: Option<Duration>,
    publish_policy: Option<PublishPolicy>,
    cleanup_on_failure: Option<bool>,
    polling: Option<PollingConfig>,
    llm_provider: Option<String>,
    llm_model: Option<String>,
    llm_base_url: Option<String>,
    imagine_base_url: Option<String>,
    media_base_url: Option<String>,
    media_cloud_name: Option<String>,
    publisher_base_url: Option<String>,
    verbose: Option<bool>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory where the file store keeps artifacts, sessions and users.
    #[must_use]
    pub fn store_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(path.into());
        self
    }

    /// Number of pipeline runs executing at once. Default: 4.
    #[must_use]
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// How long a claimed artifact stays leased without renewal. Default: 1 hour.
    #[must_use]
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = Some(ttl);
        self
    }

    /// Upper bound on one pipeline run. Default: 30 minutes.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn ack_wait(mut self, wait: Duration) -> Self {
        self.ack_wait = Some(wait);
        self
    }

    /// Minimum writing time for a session to produce an artifact. Default: 8 minutes.
    #[must_use]
    pub fn min_elapsed(mut self, elapsed: Duration) -> Self {
        self.min_elapsed = Some(elapsed);
        self
    }

    #[must_use]
    pub fn publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn cleanup_on_failure(mut self, cleanup: bool) -> Self {
        self.cleanup_on_failure = Some(cleanup);
        self
    }

    /// Replace the whole image polling schedule.
    #[must_use]
    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Valid values: "openai", "ollama". Default: "openai"
    #[must_use]
    pub fn llm_provider(mut self, provider: impl Into<String>) -> Self {
        self.llm_provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.llm_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn imagine_base_url(mut self, url: impl Into<String>) -> Self {
        self.imagine_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn media_base_url(mut self, url: impl Into<String>) -> Self {
        self.media_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn media_cloud_name(mut self, name: impl Into<String>) -> Self {
        self.media_cloud_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn publisher_base_url(mut self, url: impl Into<String>) -> Self {
        self.publisher_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Build and validate the `Config`; unset values keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the resulting
    /// configuration fails [`Config::validate`].
    pub fn build(self) -> Result<Config, ConfigError> {
        fn set(config: &mut Config, key: &str) {
            config
                .source_attribution
                .insert(key.to_string(), ConfigSource::Programmatic);
        }

        let mut config = Config::default();

        if let Some(dir) = self.store_dir {
            config.store.dir = dir;
            set(&mut config, "store.dir");
        }
        if let Some(workers) = self.concurrency {
            config.workers.concurrency = workers;
            set(&mut config, "workers.concurrency");
        }
        if let Some(capacity) = self.queue_capacity {
            config.workers.queue_capacity = capacity;
            set(&mut config, "workers.queue_capacity");
        }
        if let Some(ttl) = self.lease_ttl {
            config.workers.lease_ttl_secs = ttl.as_secs();
            set(&mut config, "workers.lease_ttl_secs");
        }
        if let Some(deadline) = self.deadline {
            config.pipeline.deadline_secs = deadline.as_secs().max(1);
            set(&mut config, "pipeline.deadline_secs");
        }
        if let Some(wait) = self.ack_wait {
            config.pipeline.ack_wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
            set(&mut config, "pipeline.ack_wait_ms");
        }
        if let Some(elapsed) = self.min_elapsed {
            config.pipeline.min_elapsed_secs = elapsed.as_secs();
            set(&mut config, "pipeline.min_elapsed_secs");
        }
        if let Some(policy) = self.publish_policy {
            config.pipeline.publish_policy = policy;
            set(&mut config, "pipeline.publish_policy");
        }
        if let Some(cleanup) = self.cleanup_on_failure {
            config.pipeline.cleanup_on_failure = cleanup;
            set(&mut config, "pipeline.cleanup_on_failure");
        }
        if let Some(polling) = self.polling {
            config.polling = polling;
            set(&mut config, "polling");
        }
        if let Some(provider) = self.llm_provider {
            config.llm.provider = provider;
            set(&mut config, "llm.provider");
        }
        if let Some(model) = self.llm_model {
            config.llm.model = model;
            set(&mut config, "llm.model");
        }
        if let Some(url) = self.llm_base_url {
            config.llm.base_url = Some(url);
            set(&mut config, "llm.base_url");
        }
        if let Some(url) = self.imagine_base_url {
            config.imagine.base_url = url;
            set(&mut config, "imagine.base_url");
        }
        if let Some(url) = self.media_base_url {
            config.media.base_url = url;
            set(&mut config, "media.base_url");
        }
        if let Some(name) = self.media_cloud_name {
            config.media.cloud_name = name;
            set(&mut config, "media.cloud_name");
        }
        if let Some(url) = self.publisher_base_url {
            config.publisher.base_url = url;
            set(&mut config, "publisher.base_url");
        }
        if let Some(verbose) = self.verbose {
            config.verbose = verbose;
        }

        // A deadline longer than the lease would let a second worker claim a live run
        if config.workers.lease_ttl_secs < config.pipeline.deadline_secs
            && !config.source_attribution.contains_key("workers.lease_ttl_secs")
        {
            config.workers.lease_ttl_secs = config.pipeline.deadline_secs;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_config_defaults() {
        let built = Config::builder().build().unwrap();
        assert_eq!(built.pipeline, Config::default().pipeline);
        assert!(built.source_attribution.is_empty());
    }

    #[test]
    fn builder_values_are_programmatic() {
        let config = Config::builder()
            .store_dir("/tmp/anky-state")
            .concurrency(2)
            .publish_policy(PublishPolicy::Required)
            .polling(PollingConfig {
                initial_interval_secs: 1,
                max_interval_secs: 4,
                multiplier: 2.0,
                max_attempts: 3,
            })
            .build()
            .unwrap();

        assert_eq!(config.workers.concurrency, 2);
        assert_eq!(config.pipeline.publish_policy, PublishPolicy::Required);
        assert_eq!(config.polling.max_attempts, 3);
        assert_eq!(config.source_of("store.dir"), ConfigSource::Programmatic);
        assert_eq!(config.source_of("polling"), ConfigSource::Programmatic);
        assert_eq!(config.source_of("llm.model"), ConfigSource::Defaults);
    }

    #[test]
    fn long_deadline_stretches_default_lease() {
        let config = Config::builder()
            .deadline(Duration::from_secs(7200))
            .build()
            .unwrap();
        assert_eq!(config.workers.lease_ttl_secs, 7200);
    }

    #[test]
    fn invalid_values_fail_build() {
        let err = Config::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
