//! Configuration model, deserialized by the config loader.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::task::MAX_RETRIES;

/// Main configuration structure for Cadence
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Plan executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Inactivity detection configuration
    #[serde(default)]
    pub activity: ActivityConfig,

    /// Coding agent configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Plan executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Maximum concurrent task executions within a parallel batch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Attempts per task before it is marked failed (at most 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Hard ceiling for a single agent invocation, in seconds
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// How often a running task is checked for inactivity, in seconds
    #[serde(default = "default_activity_poll_interval_secs")]
    pub activity_poll_interval_secs: u64,
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    MAX_RETRIES
}

const fn default_agent_timeout_secs() -> u64 {
    300
}

const fn default_activity_poll_interval_secs() -> u64 {
    5
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            agent_timeout_secs: default_agent_timeout_secs(),
            activity_poll_interval_secs: default_activity_poll_interval_secs(),
        }
    }
}

impl ExecutorConfig {
    /// Hard wall-clock limit for one attempt.
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// How often a running attempt is checked for inactivity.
    pub fn activity_poll_interval(&self) -> Duration {
        Duration::from_secs(self.activity_poll_interval_secs)
    }
}

/// Inactivity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActivityConfig {
    /// Tasks younger than this are never reported as stuck
    #[serde(default = "default_min_runtime_secs")]
    pub min_runtime_secs: u64,

    /// Silence longer than this marks a task as stuck
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: u64,
}

const fn default_min_runtime_secs() -> u64 {
    30
}

const fn default_inactivity_threshold_secs() -> u64 {
    120
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            min_runtime_secs: default_min_runtime_secs(),
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
        }
    }
}

impl ActivityConfig {
    /// [`min_runtime_secs`](Self::min_runtime_secs) as a `Duration`.
    pub fn min_runtime(&self) -> Duration {
        Duration::from_secs(self.min_runtime_secs)
    }

    /// [`inactivity_threshold_secs`](Self::inactivity_threshold_secs) as a `Duration`.
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }
}

/// Coding agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Path to the claude CLI binary
    #[serde(default = "default_binary_path")]
    pub binary_path: String,

    /// Model to request, if any
    #[serde(default)]
    pub model: Option<String>,

    /// Output format for print mode (text, json, stream-json)
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Additional CLI flags
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

fn default_binary_path() -> String {
    "claude".to_string()
}

fn default_output_format() -> String {
    "text".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            model: None,
            output_format: default_output_format(),
            extra_flags: vec![],
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".cadence/cadence.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// New file every day.
    #[default]
    Daily,
    /// New file every hour.
    Hourly,
    /// Single file.
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stdout logging
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}
