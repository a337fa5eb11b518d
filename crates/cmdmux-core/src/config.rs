//! Orchestrator configuration
//!
//! Loaded from an optional JSON file, then overridden by `CMDMUX_*`
//! environment variables (a `.env` file in the working directory is read
//! first), then validated.
//!
//! ```json
//! {
//!   "maxQueueSize": 100,
//!   "concurrency": 4,
//!   "rateLimit": 10.0,
//!   "requiredConnections": ["github"]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CMDMUX_";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration surface of the orchestration layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Maximum number of pending (not yet started) commands
    pub max_queue_size: usize,
    /// Maximum number of commands executing at once
    pub concurrency: usize,
    /// Dispatch rate in commands per second; non-finite disables throttling
    pub rate_limit: f64,
    /// Number of history entries kept
    pub max_history_size: usize,
    /// Characters of stdout kept per history entry
    pub max_stdout_len: usize,
    /// Characters of stderr kept per history entry
    pub max_stderr_len: usize,
    pub cache_ttl_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Connections whose failure aborts `connect()`
    pub required_connections: BTreeSet<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            concurrency: 4,
            rate_limit: 10.0,
            max_history_size: 100,
            max_stdout_len: 10_000,
            max_stderr_len: 5_000,
            cache_ttl_ms: 60_000,
            connect_timeout_ms: 30_000,
            request_timeout_ms: 60_000,
            required_connections: BTreeSet::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration: file (if given), then environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "[Config] Loaded config file");
        Ok(config)
    }

    /// Apply `CMDMUX_*` overrides using `lookup` to read variables.
    ///
    /// `CMDMUX_REQUIRED_CONNECTIONS` is a comma-separated list.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((name, value)) = var("MAX_QUEUE_SIZE") {
            self.max_queue_size = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("CONCURRENCY") {
            self.concurrency = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("RATE_LIMIT") {
            self.rate_limit = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("MAX_HISTORY_SIZE") {
            self.max_history_size = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("MAX_STDOUT_LEN") {
            self.max_stdout_len = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("MAX_STDERR_LEN") {
            self.max_stderr_len = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("CACHE_TTL_MS") {
            self.cache_ttl_ms = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_env(&name, &value)?;
        }
        if let Some((name, value)) = var("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env(&name, &value)?;
        }
        if let Some((_, value)) = var("REQUIRED_CONNECTIONS") {
            self.required_connections = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// Reject values the orchestrator can't run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid("maxQueueSize must be at least 1".into()));
        }
        if self.max_history_size == 0 {
            return Err(ConfigError::Invalid("maxHistorySize must be at least 1".into()));
        }
        if self.rate_limit.is_finite() && self.rate_limit <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rateLimit must be positive (got {})",
                self.rate_limit
            )));
        }
        for (name, value) in [
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
