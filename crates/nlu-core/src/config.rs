use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Upper bound accepted for `max_sequence_length`
pub const MAX_SEQUENCE_LENGTH_LIMIT: usize = 2048;
/// Upper bound accepted for `batch_size`
pub const BATCH_SIZE_LIMIT: usize = 128;
/// Upper bound accepted for `max_concurrency`
pub const MAX_CONCURRENCY_LIMIT: usize = 1024;
/// Upper bound accepted for `cache_ttl_secs` (30 days)
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 3600;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub nlp: NlpConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_env("APP")
    }

    /// Load configuration from environment with custom prefix.
    ///
    /// Keys use `__` between sections, e.g. `APP_NLP__CONFIDENCE_THRESHOLD=0.9`.
    pub fn load_from_env(prefix: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(environment(prefix))
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?;

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &Path, prefix: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::from(path))
            .add_source(environment(prefix));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section; any violation is a fatal startup error.
    pub fn validate(&self) -> Result<()> {
        self.nlp.validate()
    }
}

fn environment(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Language processing configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NlpConfig {
    /// Model artifact file; the built-in lexicon is used when absent
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
    /// Maximum number of texts accepted in one batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Concurrent in-flight requests allowed to reach the models
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Requests allowed to wait for a slot; unbounded when absent
    #[serde(default)]
    pub max_queue_depth: Option<usize>,
    /// Longest wait for a slot; unbounded when absent
    #[serde(default)]
    pub admission_timeout_ms: Option<u64>,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            max_sequence_length: default_max_sequence_length(),
            batch_size: default_batch_size(),
            confidence_threshold: default_confidence_threshold(),
            max_concurrency: default_max_concurrency(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            max_queue_depth: None,
            admission_timeout_ms: None,
            model_version: default_model_version(),
        }
    }
}

impl NlpConfig {
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn with_max_sequence_length(mut self, length: usize) -> Self {
        self.max_sequence_length = length;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn admission_timeout(&self) -> Option<Duration> {
        self.admission_timeout_ms.map(Duration::from_millis)
    }

    /// Check every value against its accepted range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SEQUENCE_LENGTH_LIMIT).contains(&self.max_sequence_length) {
            return Err(CoreError::config(format!(
                "max_sequence_length must be between 1 and {}, got {}",
                MAX_SEQUENCE_LENGTH_LIMIT, self.max_sequence_length
            )));
        }

        if !(1..=BATCH_SIZE_LIMIT).contains(&self.batch_size) {
            return Err(CoreError::config(format!(
                "batch_size must be between 1 and {}, got {}",
                BATCH_SIZE_LIMIT, self.batch_size
            )));
        }

        // Written so that NaN fails as well
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(CoreError::config(format!(
                "confidence_threshold must be in (0, 1], got {}",
                self.confidence_threshold
            )));
        }

        if !(1..=MAX_CONCURRENCY_LIMIT).contains(&self.max_concurrency) {
            return Err(CoreError::config(format!(
                "max_concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY_LIMIT, self.max_concurrency
            )));
        }

        if !(1..=MAX_CACHE_TTL_SECS).contains(&self.cache_ttl_secs) {
            return Err(CoreError::config(format!(
                "cache_ttl_secs must be between 1 and {}, got {}",
                MAX_CACHE_TTL_SECS, self.cache_ttl_secs
            )));
        }

        if self.cache_capacity == 0 {
            return Err(CoreError::config("cache_capacity must be at least 1"));
        }

        if self.admission_timeout_ms == Some(0) {
            return Err(CoreError::config("admission_timeout_ms must be at least 1 when set"));
        }

        if self.model_version.trim().is_empty() {
            return Err(CoreError::config("model_version must not be empty"));
        }

        Ok(())
    }
}

fn default_max_sequence_length() -> usize {
    512
}

fn default_batch_size() -> usize {
    32
}

fn default_confidence_threshold() -> f64 {
    0.95
}

fn default_max_concurrency() -> usize {
    10
}

fn default_cache_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_model_version() -> String {
    "1.0.0".to_string()
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_nlp_config_defaults_are_valid() {
        let config = NlpConfig::default();

        assert_eq!(config.max_sequence_length, 512);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.confidence_threshold, 0.95);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert!(config.admission_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nlp_config_builders() {
        let config = NlpConfig::default()
            .with_max_sequence_length(128)
            .with_batch_size(8)
            .with_confidence_threshold(0.8)
            .with_max_concurrency(2)
            .with_cache_ttl(Duration::from_secs(60))
            .with_max_queue_depth(4)
            .with_admission_timeout(Duration::from_millis(250));

        assert_eq!(config.max_sequence_length, 128);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.max_queue_depth, Some(4));
        assert_eq!(config.admission_timeout(), Some(Duration::from_millis(250)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_confidence_threshold_bounds() {
        assert!(NlpConfig::default().with_confidence_threshold(0.0).validate().is_err());
        assert!(NlpConfig::default().with_confidence_threshold(1.5).validate().is_err());
        assert!(NlpConfig::default().with_confidence_threshold(f64::NAN).validate().is_err());
        assert!(NlpConfig::default().with_confidence_threshold(1.0).validate().is_ok());
    }

    #[test]
    fn test_size_bounds() {
        assert!(NlpConfig::default().with_max_sequence_length(0).validate().is_err());
        assert!(NlpConfig::default().with_max_sequence_length(4096).validate().is_err());
        assert!(NlpConfig::default().with_batch_size(0).validate().is_err());
        assert!(NlpConfig::default().with_batch_size(129).validate().is_err());
        assert!(NlpConfig::default().with_max_concurrency(0).validate().is_err());
        assert!(NlpConfig::default().with_cache_capacity(0).validate().is_err());
    }

    #[test]
    fn test_concurrency_upper_bound() {
        assert!(NlpConfig::default().with_max_concurrency(MAX_CONCURRENCY_LIMIT).validate().is_ok());
        assert!(NlpConfig::default().with_max_concurrency(MAX_CONCURRENCY_LIMIT + 1).validate().is_err());
        assert!(NlpConfig::default().with_max_concurrency(usize::MAX).validate().is_err());
    }

    #[test]
    fn test_cache_ttl_bounds() {
        let max = Duration::from_secs(MAX_CACHE_TTL_SECS);
        assert!(NlpConfig::default().with_cache_ttl(max).validate().is_ok());
        assert!(NlpConfig::default().with_cache_ttl(Duration::ZERO).validate().is_err());
        assert!(NlpConfig::default()
            .with_cache_ttl(max + Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(NlpConfig::default().with_cache_ttl(Duration::MAX).validate().is_err());
    }

    #[test]
    fn test_admission_timeout_saturates() {
        let config = NlpConfig::default().with_admission_timeout(Duration::MAX);
        assert_eq!(config.admission_timeout_ms, Some(u64::MAX));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[nlp]\nconfidence_threshold = 0.8\nbatch_size = 16\n\n[server]\nport = 9000"
        )
        .unwrap();

        let config = AppConfig::load_from_file(file.path(), "NLU_CONFIG_FILE_TEST").unwrap();
        assert_eq!(config.nlp.confidence_threshold, 0.8);
        assert_eq!(config.nlp.batch_size, 16);
        assert_eq!(config.nlp.max_sequence_length, 512);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[nlp]\nbatch_size = 500").unwrap();

        let result = AppConfig::load_from_file(file.path(), "NLU_CONFIG_INVALID_TEST");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.with_port(3000).address(), "0.0.0.0:3000");
    }
}
