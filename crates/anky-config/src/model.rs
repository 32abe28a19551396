use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where an effective configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Defaults,
    ConfigFile(PathBuf),
    Environment(String),
    Cli,
    Programmatic,
}

/// Whether and when the publish stage posts to the social network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Publish when the user has a linked identity; skip otherwise.
    /// An attempted publish that fails fails the run.
    #[default]
    WhenLinked,
    /// A missing identity fails the run.
    Required,
    /// Never publish.
    Disabled,
}

impl std::str::FromStr for PublishPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "when_linked" => Ok(Self::WhenLinked),
            "required" => Ok(Self::Required),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!(
                "unknown publish policy '{other}' (expected when_linked, required, disabled)"
            )),
        }
    }
}

/// `[pipeline]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum elapsed writing time for a session to qualify.
    pub min_elapsed_secs: u64,
    /// Upper bound on one whole pipeline run.
    pub deadline_secs: u64,
    /// How long the trigger waits for an early outcome before acknowledging.
    pub ack_wait_ms: u64,
    pub publish_policy: PublishPolicy,
    /// Remove already-uploaded media when a later stage fails.
    pub cleanup_on_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_elapsed_secs: 480,
            deadline_secs: 1800,
            ack_wait_ms: 2000,
            publish_policy: PublishPolicy::WhenLinked,
            cleanup_on_failure: true,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    #[must_use]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    #[must_use]
    pub fn min_elapsed(&self) -> Duration {
        Duration::from_secs(self.min_elapsed_secs)
    }
}

/// `[polling]` - image job backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_interval_secs: u64,
    pub max_interval_secs: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 5,
            max_interval_secs: 60,
            multiplier: 2.0,
            max_attempts: 60,
        }
    }
}

/// `[workers]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub concurrency: usize,
    pub lease_ttl_secs: u64,
    pub queue_capacity: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease_ttl_secs: 3600,
            queue_capacity: 64,
        }
    }
}

/// `[llm]` - text generation for the reflection stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai` (any OpenAI-compatible endpoint) or `ollama`
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

/// `[imagine]` - image generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagineConfig {
    pub base_url: String,
    pub api_key_env: String,
    /// Style reference prepended to every prompt.
    pub prompt_prefix: String,
    pub timeout_secs: u64,
}

impl Default for ImagineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8055".to_string(),
            api_key_env: "IMAGINE_API_TOKEN".to_string(),
            prompt_prefix: "https://s.mj.run/YLJMlMJbo70".to_string(),
            timeout_secs: 60,
        }
    }
}

/// `[media]` - durable image storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub base_url: String,
    pub cloud_name: String,
    pub upload_preset: String,
    pub api_key_env: String,
    pub api_secret_env: String,
    pub folder: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloudinary.com".to_string(),
            cloud_name: String::new(),
            upload_preset: "anky_mobile".to_string(),
            api_key_env: "CLOUDINARY_API_KEY".to_string(),
            api_secret_env: "CLOUDINARY_API_SECRET".to_string(),
            folder: None,
            timeout_secs: 120,
        }
    }
}

/// `[publisher]` - social network posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub channel_id: Option<String>,
    /// Attach the uploaded image to the post.
    pub embed_image: bool,
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.neynar.com".to_string(),
            api_key_env: "NEYNAR_API_KEY".to_string(),
            channel_id: Some("anky".to_string()),
            embed_image: true,
            timeout_secs: 30,
        }
    }
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".anky/state"),
        }
    }
}

/// Effective configuration for the pipeline.
///
/// # Configuration File Format
///
/// ```toml
/// [pipeline]
/// min_elapsed_secs = 480
/// deadline_secs = 1800
/// publish_policy = "when_linked"
///
/// [polling]
/// initial_interval_secs = 5
/// max_attempts = 60
///
/// [llm]
/// provider = "ollama"
/// model = "llama3.1"
/// base_url = "http://localhost:11434"
///
/// [media]
/// cloud_name = "my-cloud"
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub polling: PollingConfig,
    pub workers: WorkersConfig,
    pub llm: LlmConfig,
    pub imagine: ImagineConfig,
    pub media: MediaConfig,
    pub publisher: PublisherConfig,
    pub store: StoreConfig,
    /// Verbose logging requested.
    pub verbose: bool,
    /// Source of each value that did not come from defaults.
    pub source_attribution: HashMap<String, ConfigSource>,
}

impl Config {
    /// Where `key` was set, defaulting to [`ConfigSource::Defaults`].
    #[must_use]
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.source_attribution
            .get(key)
            .cloned()
            .unwrap_or(ConfigSource::Defaults)
    }
}
