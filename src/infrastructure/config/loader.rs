//! Figment-based loading and validation of [`Config`].

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::MAX_RETRIES;

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `executor.max_concurrency` outside `1..=64`.
    #[error("Invalid max_concurrency: {0}. Must be between 1 and 64")]
    InvalidMaxConcurrency(usize),

    /// `executor.max_attempts` outside `1..=3`.
    #[error("Invalid max_attempts: {0}. Must be between 1 and 3")]
    InvalidMaxAttempts(u32),

    /// A duration setting, named by its key, is zero.
    #[error("Invalid {0}: must be greater than zero")]
    ZeroDuration(&'static str),

    /// `logging.level` is not a tracing level.
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// `database.path` is empty.
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    /// `database.max_connections` is zero.
    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    /// Any other invalid setting.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the project in the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .cadence/config.yaml (project config)
    /// 3. .cadence/local.yaml (local overrides, optional)
    /// 4. Environment variables (CADENCE_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::load_from(".")
    }

    /// Same as [`load`](Self::load) for the project rooted at `project_dir`.
    pub fn load_from(project_dir: impl AsRef<Path>) -> Result<Config> {
        let dir = project_dir.as_ref().join(".cadence");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let executor = &config.executor;
        if executor.max_concurrency == 0 || executor.max_concurrency > 64 {
            return Err(ConfigError::InvalidMaxConcurrency(executor.max_concurrency));
        }
        if executor.max_attempts == 0 || executor.max_attempts > MAX_RETRIES {
            return Err(ConfigError::InvalidMaxAttempts(executor.max_attempts));
        }
        if executor.agent_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("executor.agent_timeout_secs"));
        }
        if executor.activity_poll_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("executor.activity_poll_interval_secs"));
        }

        if config.activity.inactivity_threshold_secs == 0 {
            return Err(ConfigError::ZeroDuration("activity.inactivity_threshold_secs"));
        }

        if config.agent.binary_path.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("agent.binary_path cannot be empty".to_string()));
        }
        let valid_output_formats = ["text", "json", "stream-json"];
        if !valid_output_formats.contains(&config.agent.output_format.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "agent.output_format '{}' must be one of: text, json, stream-json",
                config.agent.output_format
            )));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::LogFormat;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.executor.max_concurrency, 4);
        assert_eq!(config.database.path, ".cadence/cadence.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
executor:
  max_concurrency: 8
  agent_timeout_secs: 600
activity:
  inactivity_threshold_secs: 300
logging:
  level: debug
  format: pretty
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.executor.max_concurrency, 8);
        assert_eq!(config.executor.max_attempts, 3);
        assert_eq!(config.activity.inactivity_threshold_secs, 300);
        assert_eq!(config.activity.min_runtime_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_validate_rejects_attempts_above_cap() {
        let mut config = Config::default();
        config.executor.max_attempts = 5;
        assert_eq!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxAttempts(5)));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = Config::default();
        config.activity.inactivity_threshold_secs = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::ZeroDuration(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }
}
