//! Configuration management for Fanout

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// posts per hour per platform; absent platforms are unlimited
    #[serde(default)]
    pub rate_limits: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// The queue's own backing store; unreachable means poll-only mode
    #[serde(default = "default_queue_path")]
    pub path: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            retention_secs: default_retention_secs(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Drift window for locating entries by timestamp. A correctness
    /// compromise for clock/serialization skew; widen with care.
    #[serde(default = "default_match_tolerance_secs")]
    pub match_tolerance_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            match_tolerance_secs: default_match_tolerance_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Swap every platform for a succeeding mock (integration environments)
    #[serde(default)]
    pub sandbox: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            sandbox: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_credentials_path")]
    pub path: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: default_credentials_path(),
        }
    }
}

fn default_queue_path() -> String {
    "~/.local/share/fanout/queue.db".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_retention_secs() -> u64 {
    24 * 3600
}

fn default_concurrency() -> usize {
    2
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    10
}

fn default_match_tolerance_secs() -> i64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_credentials_path() -> String {
    "~/.config/fanout/credentials.toml".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/fanout/posts.db".to_string(),
            },
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            publisher: PublisherConfig::default(),
            credentials: CredentialsConfig::default(),
            rate_limits: BTreeMap::new(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FANOUT_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("fanout").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("fanout"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default_config();
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.concurrency, 2);
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert_eq!(config.scheduler.match_tolerance_secs, 60);
        assert_eq!(config.publisher.request_timeout_secs, 30);
        assert!(!config.publisher.sandbox);
        assert!(config.rate_limits.is_empty());
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = "/tmp/posts.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, "/tmp/posts.db");
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.credentials.path, "~/.config/fanout/credentials.toml");
    }

    #[test]
    fn full_toml_roundtrip() {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = "/data/posts.db"

            [queue]
            path = "/data/queue.db"
            max_attempts = 5
            backoff_base_secs = 10
            retention_secs = 3600
            concurrency = 4

            [scheduler]
            poll_interval_secs = 15
            batch_size = 25
            match_tolerance_secs = 90

            [publisher]
            request_timeout_secs = 10
            sandbox = true

            [credentials]
            path = "/data/credentials.toml"

            [rate_limits]
            facebook = 25
            twitter = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.path, "/data/queue.db");
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.queue.concurrency, 4);
        assert_eq!(config.scheduler.match_tolerance_secs, 90);
        assert!(config.publisher.sandbox);
        assert_eq!(config.rate_limits.get("facebook"), Some(&25));
        assert_eq!(config.rate_limits.get("twitter"), Some(&50));
    }

    #[test]
    fn missing_database_section_is_an_error() {
        let result: std::result::Result<Config, _> = toml::from_str("[queue]\n");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn config_env_override() {
        std::env::set_var("FANOUT_CONFIG", "/tmp/custom-fanout.toml");
        let path = resolve_config_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom-fanout.toml"));
        std::env::remove_var("FANOUT_CONFIG");
    }

    #[test]
    #[serial]
    fn config_default_path_under_config_dir() {
        std::env::remove_var("FANOUT_CONFIG");
        let path = resolve_config_path().unwrap();
        assert!(path.ends_with("fanout/config.toml"));
    }

    #[test]
    fn load_from_missing_path_is_an_error() {
        let result = Config::load_from_path(&PathBuf::from("/nonexistent/fanout.toml"));
        assert!(result.is_err());
    }
}
