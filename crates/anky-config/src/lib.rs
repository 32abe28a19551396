//! Configuration for the anky pipeline
//!
//! Hierarchical configuration with precedence CLI > environment > file >
//! defaults. The file is `.anky/config.toml`, found by searching upward from
//! the working directory unless an explicit path or `ANKY_CONFIG` is given.
//! Secrets never live in the file: each service section names the
//! environment variable that holds its credential.

mod builder;
mod discovery;
mod model;
mod validation;

pub use builder::ConfigBuilder;
pub use discovery::{CONFIG_DIR, CONFIG_ENV_VAR, CONFIG_FILE, CliArgs};
pub use model::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Missing required setting '{key}': {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Environment variable '{var}' named by '{key}' is not set")]
    MissingSecret { key: String, var: String },
}

impl Config {
    /// Resolve a secret from the environment variable named by a config key.
    pub fn secret(key: &str, var: &str) -> Result<String, ConfigError> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSecret {
                key: key.to_string(),
                var: var.to_string(),
            })
    }
}
