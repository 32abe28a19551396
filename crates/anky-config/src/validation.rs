use crate::ConfigError;
use crate::model::Config;

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Pipeline
        if self.pipeline.deadline_secs == 0 {
            return Err(invalid("pipeline.deadline_secs", "must be greater than 0"));
        }
        if self.pipeline.ack_wait_ms > 60_000 {
            return Err(invalid(
                "pipeline.ack_wait_ms",
                "exceeds maximum limit of 60000 ms",
            ));
        }

        // Polling
        let polling = &self.polling;
        if polling.initial_interval_secs == 0 {
            return Err(invalid(
                "polling.initial_interval_secs",
                "must be greater than 0",
            ));
        }
        if polling.max_interval_secs < polling.initial_interval_secs {
            return Err(invalid(
                "polling.max_interval_secs",
                "must be at least polling.initial_interval_secs",
            ));
        }
        if !polling.multiplier.is_finite() || polling.multiplier < 1.0 {
            return Err(invalid("polling.multiplier", "must be a number >= 1.0"));
        }
        if polling.max_attempts == 0 {
            return Err(invalid("polling.max_attempts", "must be greater than 0"));
        }
        if self.pipeline.deadline_secs < polling.initial_interval_secs {
            return Err(invalid(
                "pipeline.deadline_secs",
                "is shorter than a single polling interval",
            ));
        }

        // Workers
        if self.workers.concurrency == 0 {
            return Err(invalid("workers.concurrency", "must be greater than 0"));
        }
        if self.workers.concurrency > 256 {
            return Err(invalid(
                "workers.concurrency",
                "exceeds maximum limit of 256",
            ));
        }
        if self.workers.queue_capacity == 0 {
            return Err(invalid("workers.queue_capacity", "must be greater than 0"));
        }
        if self.workers.lease_ttl_secs < self.pipeline.deadline_secs {
            return Err(invalid(
                "workers.lease_ttl_secs",
                "must be at least pipeline.deadline_secs so a live run keeps its lease",
            ));
        }

        // Services
        match self.llm.provider.as_str() {
            "openai" | "ollama" => {}
            other => {
                return Err(invalid(
                    "llm.provider",
                    format!("unknown provider '{other}' (expected openai, ollama)"),
                ));
            }
        }
        if self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature", "must be within 0.0..=2.0"));
        }
        for (key, timeout) in [
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("imagine.timeout_secs", self.imagine.timeout_secs),
            ("media.timeout_secs", self.media.timeout_secs),
            ("publisher.timeout_secs", self.publisher.timeout_secs),
        ] {
            if timeout == 0 {
                return Err(invalid(key, "must be greater than 0"));
            }
        }
        for (key, url) in [
            ("imagine.base_url", self.imagine.base_url.as_str()),
            ("media.base_url", self.media.base_url.as_str()),
            ("publisher.base_url", self.publisher.base_url.as_str()),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(key, format!("'{url}' is not an http(s) URL")));
            }
        }

        Ok(())
    }

    /// Check that settings needed only by the live service clients are present.
    ///
    /// Kept separate from [`Config::validate`] so offline commands such as
    /// `status` work without a media account configured.
    pub fn validate_services(&self) -> Result<(), ConfigError> {
        if self.media.cloud_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "media.cloud_name".to_string(),
                hint: "set [media] cloud_name in .anky/config.toml".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = Config::default();
        config.workers.concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.concurrency"));
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.polling.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.polling.max_interval_secs = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_poll_attempts() {
        let mut config = Config::default();
        config.polling.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_deadline_shorter_than_poll_interval() {
        let mut config = Config::default();
        config.pipeline.deadline_secs = 2;
        config.workers.lease_ttl_secs = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pipeline.deadline_secs"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn services_require_cloud_name() {
        let mut config = Config::default();
        assert!(matches!(
            config.validate_services(),
            Err(ConfigError::MissingRequired { .. })
        ));
        config.media.cloud_name = "demo".into();
        config.validate_services().unwrap();
    }
}
