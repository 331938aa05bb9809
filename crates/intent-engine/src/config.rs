//! Engine configuration
//!
//! Loaded from TOML; every field has a default so partial files work.

use intent_model::{IntentKind, NodeId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// TOML could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML could not be produced
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// File could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Backoff applied to transient device errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per batch, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound on any delay
    pub max_backoff_ms: u64,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Per-replica engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identity of this replica
    pub node_id: NodeId,
    /// Partitions of the key space
    pub partitions: u32,
    /// Keys processed concurrently
    pub workers: usize,
    /// Bound on recursive compilation stages
    pub max_compile_depth: usize,
    /// Transient-error retry policy
    pub retry: RetryConfig,
    /// Wait for a device batch report
    pub install_timeout_ms: u64,
    /// Kinds that must have a compiler at start-up
    pub required_kinds: Vec<IntentKind>,
    /// Default tracing filter (overridden by `RUST_LOG`)
    pub log_filter: String,
    /// Capacity of the store change stream
    pub change_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::default(),
            partitions: 16,
            workers: 8,
            max_compile_depth: 10,
            retry: RetryConfig::default(),
            install_timeout_ms: 5_000,
            required_kinds: Vec::new(),
            log_filter: "info".to_string(),
            change_buffer: 4096,
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With node id
    #[inline]
    #[must_use]
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = NodeId::new(node_id);
        self
    }

    /// With partition count
    #[inline]
    #[must_use]
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    /// With worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// With compile depth bound
    #[inline]
    #[must_use]
    pub fn with_max_compile_depth(mut self, depth: usize) -> Self {
        self.max_compile_depth = depth;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With install timeout
    #[inline]
    #[must_use]
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With kinds required at start-up
    #[must_use]
    pub fn with_required_kinds<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<IntentKind>,
    {
        self.required_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Install timeout as a duration
    #[inline]
    #[must_use]
    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns error if parsing or validation fails
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.partitions == 0 {
            return invalid("partitions must be at least 1");
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.max_compile_depth == 0 {
            return invalid("max_compile_depth must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !(self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be at least 1.0");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return invalid("retry.initial_backoff_ms exceeds retry.max_backoff_ms");
        }
        if self.install_timeout_ms == 0 {
            return invalid("install_timeout_ms must be positive");
        }
        if self.change_buffer == 0 {
            return invalid("change_buffer must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partitions, 16);
        assert_eq!(config.max_compile_depth, 10);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            node_id = "ctrl-2"
            workers = 3

            [retry]
            max_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.node_id, NodeId::new("ctrl-2"));
        assert_eq!(config.workers, 3);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(config.partitions, 16);
    }

    #[test]
    fn rendered_default_parses_back() {
        let config = EngineConfig::default().with_required_kinds(["connectivity", "path"]);
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(EngineConfig::default().with_workers(0).validate().is_err());
        assert!(EngineConfig::default().with_partitions(0).validate().is_err());

        let mut retry = RetryConfig::default();
        retry.multiplier = 0.5;
        assert!(EngineConfig::default().with_retry(retry).validate().is_err());

        assert!(matches!(
            EngineConfig::from_toml_str("workers = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "partitions = 4\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().partitions, 4);
        assert!(matches!(
            EngineConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
