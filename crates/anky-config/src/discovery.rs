use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ConfigError;
use crate::model::{
    Config, ConfigSource, ImagineConfig, LlmConfig, MediaConfig, PipelineConfig, PollingConfig,
    PublishPolicy, PublisherConfig, StoreConfig, WorkersConfig,
};

/// Directory holding the config file and default state.
pub const CONFIG_DIR: &str = ".anky";
/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";
/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "ANKY_CONFIG";

/// Values supplied on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub store_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub verbose: Option<bool>,
}

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    pipeline: Option<PipelineConfig>,
    polling: Option<PollingConfig>,
    workers: Option<WorkersConfig>,
    llm: Option<LlmConfig>,
    imagine: Option<ImagineConfig>,
    media: Option<MediaConfig>,
    publisher: Option<PublisherConfig>,
    store: Option<StoreConfig>,
}

impl Config {
    /// Discover and load configuration with precedence CLI > env > file > defaults,
    /// searching upward from the current directory.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args, &|key| std::env::var(key).ok())
    }

    /// Path-driven variant of [`Config::discover`] with an injectable
    /// environment, so tests avoid process-global state.
    pub fn discover_from(
        start_dir: &Path,
        cli_args: &CliArgs,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Config::default();

        let config_path = match &cli_args.config_path {
            Some(explicit) => Some(explicit.clone()),
            None => match env(CONFIG_ENV_VAR) {
                Some(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
                _ => Self::discover_config_file_from(start_dir),
            },
        };

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;
            config.apply_file(file_config, path);
        }

        config.apply_env(env)?;
        config.apply_cli(cli_args);
        config.validate()?;

        debug!(
            config_file = ?config_path,
            store_dir = %config.store.dir.display(),
            concurrency = config.workers.concurrency,
            "Configuration resolved"
        );

        Ok(config)
    }

    /// Search upward from `start_dir` for `.anky/config.toml`.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        start_dir
            .ancestors()
            .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML in {}", path.display()))?;
        Ok(parsed)
    }

    fn apply_file(&mut self, file: TomlConfig, path: &Path) {
        let source = ConfigSource::ConfigFile(path.to_path_buf());
        let attribute = |key: &str, attribution: &mut HashMap<String, ConfigSource>| {
            attribution.insert(key.to_string(), source.clone());
        };

        if let Some(section) = file.pipeline {
            self.pipeline = section;
            attribute("pipeline", &mut self.source_attribution);
        }
        if let Some(section) = file.polling {
            self.polling = section;
            attribute("polling", &mut self.source_attribution);
        }
        if let Some(section) = file.workers {
            self.workers = section;
            attribute("workers", &mut self.source_attribution);
        }
        if let Some(section) = file.llm {
            self.llm = section;
            attribute("llm", &mut self.source_attribution);
        }
        if let Some(section) = file.imagine {
            self.imagine = section;
            attribute("imagine", &mut self.source_attribution);
        }
        if let Some(section) = file.media {
            self.media = section;
            attribute("media", &mut self.source_attribution);
        }
        if let Some(section) = file.publisher {
            self.publisher = section;
            attribute("publisher", &mut self.source_attribution);
        }
        if let Some(section) = file.store {
            // Relative store paths are anchored at the directory holding `.anky/`
            let dir = match (section.dir.is_relative(), path.parent().and_then(Path::parent)) {
                (true, Some(root)) => root.join(&section.dir),
                _ => section.dir,
            };
            self.store = StoreConfig { dir };
            attribute("store.dir", &mut self.source_attribution);
        }
    }

    fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = env("ANKY_STORE_DIR") {
            self.store.dir = PathBuf::from(dir);
            self.attribute_env("store.dir", "ANKY_STORE_DIR");
        }
        if let Some(raw) = env("ANKY_WORKERS") {
            self.workers.concurrency =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "ANKY_WORKERS".to_string(),
                        reason: format!("'{raw}' is not a positive integer"),
                    })?;
            self.attribute_env("workers.concurrency", "ANKY_WORKERS");
        }
        if let Some(provider) = env("ANKY_LLM_PROVIDER") {
            self.llm.provider = provider;
            self.attribute_env("llm.provider", "ANKY_LLM_PROVIDER");
        }
        if let Some(model) = env("ANKY_LLM_MODEL") {
            self.llm.model = model;
            self.attribute_env("llm.model", "ANKY_LLM_MODEL");
        }
        if let Some(raw) = env("ANKY_PUBLISH_POLICY") {
            self.pipeline.publish_policy =
                raw.parse::<PublishPolicy>()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: "ANKY_PUBLISH_POLICY".to_string(),
                        reason,
                    })?;
            self.attribute_env("pipeline.publish_policy", "ANKY_PUBLISH_POLICY");
        }
        Ok(())
    }

    fn attribute_env(&mut self, key: &str, var: &str) {
        self.source_attribution
            .insert(key.to_string(), ConfigSource::Environment(var.to_string()));
    }

    fn apply_cli(&mut self, cli_args: &CliArgs) {
        if let Some(dir) = &cli_args.store_dir {
            self.store.dir = dir.clone();
            self.source_attribution
                .insert("store.dir".to_string(), ConfigSource::Cli);
        }
        if let Some(concurrency) = cli_args.concurrency {
            self.workers.concurrency = concurrency;
            self.source_attribution
                .insert("workers.concurrency".to_string(), ConfigSource::Cli);
        }
        if let Some(verbose) = cli_args.verbose {
            self.verbose = verbose;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(root: &Path, body: &str) -> PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let config = Config::discover_from(temp.path(), &CliArgs::default(), &no_env).unwrap();
        assert_eq!(config.pipeline.min_elapsed_secs, 480);
        assert_eq!(config.polling.initial_interval_secs, 5);
        assert_eq!(config.pipeline.publish_policy, PublishPolicy::WhenLinked);
        assert_eq!(config.source_of("pipeline"), ConfigSource::Defaults);
    }

    #[test]
    fn file_found_from_nested_directory() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
[polling]
initial_interval_secs = 2
max_attempts = 10

[llm]
provider = "ollama"
model = "llama3.1"
"#,
        );
        let nested = temp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::discover_from(&nested, &CliArgs::default(), &no_env).unwrap();
        assert_eq!(config.polling.initial_interval_secs, 2);
        assert_eq!(config.polling.max_attempts, 10);
        // unspecified keys of a present section keep their defaults
        assert_eq!(config.polling.max_interval_secs, 60);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.source_of("polling"), ConfigSource::ConfigFile(path));
    }

    #[test]
    fn relative_store_dir_is_anchored_at_project_root() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "[store]\ndir = \"state\"\n");
        let config = Config::discover_from(temp.path(), &CliArgs::default(), &no_env).unwrap();
        assert_eq!(config.store.dir, temp.path().join("state"));
    }

    #[test]
    fn precedence_cli_over_env_over_file() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "[workers]\nconcurrency = 2\n");
        let env: HashMap<&str, &str> = HashMap::from([("ANKY_WORKERS", "6")]);
        let lookup = |key: &str| env.get(key).map(|v| (*v).to_string());

        let config = Config::discover_from(temp.path(), &CliArgs::default(), &lookup).unwrap();
        assert_eq!(config.workers.concurrency, 6);
        assert_eq!(
            config.source_of("workers.concurrency"),
            ConfigSource::Environment("ANKY_WORKERS".to_string())
        );

        let cli = CliArgs {
            concurrency: Some(9),
            ..CliArgs::default()
        };
        let config = Config::discover_from(temp.path(), &cli, &lookup).unwrap();
        assert_eq!(config.workers.concurrency, 9);
        assert_eq!(config.source_of("workers.concurrency"), ConfigSource::Cli);
    }

    #[test]
    fn explicit_path_via_env_var() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "[pipeline]\nmin_elapsed_secs = 60\n").unwrap();
        let path_str = path.to_string_lossy().to_string();
        let lookup = |key: &str| (key == CONFIG_ENV_VAR).then(|| path_str.clone());

        let config = Config::discover_from(temp.path(), &CliArgs::default(), &lookup).unwrap();
        assert_eq!(config.pipeline.min_elapsed_secs, 60);
    }

    #[test]
    fn unknown_section_is_rejected() {
        let temp = TempDir::new().unwrap();
        write_config(temp.path(), "[nonsense]\nx = 1\n");
        let err = Config::discover_from(temp.path(), &CliArgs::default(), &no_env).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse TOML"));
    }

    #[test]
    fn invalid_env_policy_is_rejected() {
        let temp = TempDir::new().unwrap();
        let lookup = |key: &str| (key == "ANKY_PUBLISH_POLICY").then(|| "sometimes".to_string());
        let err = Config::discover_from(temp.path(), &CliArgs::default(), &lookup).unwrap_err();
        assert!(err.to_string().contains("ANKY_PUBLISH_POLICY"));
    }
}
