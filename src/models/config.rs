// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue transport selection and settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker pool behavior
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Scheduler behavior
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// HTTP client settings (discovery and page fetching)
    #[serde(default)]
    pub http: HttpConfig,

    /// Job store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Index log location
    #[serde(default)]
    pub indexer: IndexerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    ///
    /// Environment overrides are applied in either case.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let mut config = Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        });
        config.apply_env();
        config
    }

    /// Apply environment variable overrides.
    ///
    /// Deployment environments select the queue backend and its endpoints
    /// without editing the config file.
    pub fn apply_env(&mut self) {
        if let Ok(backend) = std::env::var("QUEUE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "file" => self.queue.backend = QueueBackend::File,
                "sqs" => self.queue.backend = QueueBackend::Sqs,
                "s3" => self.queue.backend = QueueBackend::S3,
                other => log::warn!("Unknown QUEUE_BACKEND '{}', keeping config value", other),
            }
        }
        if let Ok(dir) = std::env::var("QUEUE_DIR") {
            self.queue.dir = dir;
        }
        if let Ok(url) = std::env::var("SQS_QUEUE_URL") {
            self.queue.queue_url = Some(url);
        }
        if let Ok(bucket) = std::env::var("QUEUE_S3_BUCKET") {
            self.queue.bucket = Some(bucket);
        }
        if let Ok(prefix) = std::env::var("QUEUE_S3_PREFIX") {
            self.queue.prefix = prefix;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_concurrent == 0 {
            return Err(AppError::validation("worker.max_concurrent must be > 0"));
        }
        if self.worker.visibility_timeout_secs == 0 {
            return Err(AppError::validation(
                "worker.visibility_timeout_secs must be > 0",
            ));
        }
        if self.worker.max_deliveries == 0 {
            return Err(AppError::validation("worker.max_deliveries must be > 0"));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        match self.queue.backend {
            QueueBackend::File => {
                if self.queue.dir.trim().is_empty() {
                    return Err(AppError::validation("queue.dir is empty"));
                }
            }
            QueueBackend::Sqs => {
                if self.queue.queue_url.is_none() {
                    return Err(AppError::validation("queue.queue_url required for sqs"));
                }
            }
            QueueBackend::S3 => {
                if self.queue.bucket.is_none() {
                    return Err(AppError::validation("queue.bucket required for s3"));
                }
            }
        }
        Ok(())
    }
}

/// Queue transport variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Durable local files (development and single-host deployments)
    #[default]
    File,
    /// Managed message broker (AWS SQS)
    Sqs,
    /// Object storage with simulated leases (AWS S3)
    S3,
}

/// Queue transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Which transport to use
    #[serde(default)]
    pub backend: QueueBackend,

    /// Directory for the file backend
    #[serde(default = "defaults::queue_dir")]
    pub dir: String,

    /// Queue URL for the SQS backend
    #[serde(default)]
    pub queue_url: Option<String>,

    /// Bucket for the S3 backend
    #[serde(default)]
    pub bucket: Option<String>,

    /// Key prefix for the S3 backend
    #[serde(default = "defaults::queue_prefix")]
    pub prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            dir: defaults::queue_dir(),
            queue_url: None,
            bucket: None,
            prefix: defaults::queue_prefix(),
        }
    }
}

/// Worker pool behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum jobs processed concurrently across all sites
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum spacing between dispatches to the same site, in milliseconds
    #[serde(default = "defaults::politeness_delay_ms")]
    pub politeness_delay_ms: u64,

    /// Lease duration requested on dequeue, in seconds
    #[serde(default = "defaults::visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Deliveries after which a still-failing job is dead-lettered
    #[serde(default = "defaults::max_deliveries")]
    pub max_deliveries: u32,

    /// Sleep between polls when the queue is empty, in milliseconds
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval between lease extensions for a running job, in seconds
    #[serde(default = "defaults::heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// How many held messages a dispatch round may scan past a busy site
    #[serde(default = "defaults::scan_ahead")]
    pub scan_ahead: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            politeness_delay_ms: defaults::politeness_delay_ms(),
            visibility_timeout_secs: defaults::visibility_timeout(),
            max_deliveries: defaults::max_deliveries(),
            poll_interval_ms: defaults::poll_interval_ms(),
            heartbeat_interval_secs: defaults::heartbeat_interval(),
            scan_ahead: defaults::scan_ahead(),
        }
    }
}

/// Scheduler behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enqueue attempts before giving up on a URL for this submission
    #[serde(default = "defaults::enqueue_retries")]
    pub enqueue_retries: u32,

    /// Base backoff between enqueue retries, in milliseconds
    #[serde(default = "defaults::enqueue_backoff_ms")]
    pub enqueue_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enqueue_retries: defaults::enqueue_retries(),
            enqueue_backoff_ms: defaults::enqueue_backoff_ms(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Job store location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for the durable ledger
    #[serde(default = "defaults::store_dir")]
    pub dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: defaults::store_dir(),
        }
    }
}

/// Index log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Path of the JSONL index log
    #[serde(default = "defaults::index_path")]
    pub path: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            path: defaults::index_path(),
        }
    }
}

mod defaults {
    // Queue defaults
    pub fn queue_dir() -> String {
        "data/queue".into()
    }
    pub fn queue_prefix() -> String {
        "siterake".into()
    }

    // Worker defaults
    pub fn max_concurrent() -> usize {
        8
    }
    pub fn politeness_delay_ms() -> u64 {
        1000
    }
    pub fn visibility_timeout() -> u64 {
        300
    }
    pub fn max_deliveries() -> u32 {
        5
    }
    pub fn poll_interval_ms() -> u64 {
        5000
    }
    pub fn heartbeat_interval() -> u64 {
        60
    }
    pub fn scan_ahead() -> usize {
        16
    }

    // Scheduler defaults
    pub fn enqueue_retries() -> u32 {
        3
    }
    pub fn enqueue_backoff_ms() -> u64 {
        100
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; siterake/1.0)".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Store defaults
    pub fn store_dir() -> String {
        "data/store".into()
    }

    // Indexer defaults
    pub fn index_path() -> String {
        "data/index.jsonl".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.worker.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_sqs_without_queue_url() {
        let mut config = Config::default();
        config.queue.backend = QueueBackend::Sqs;
        assert!(config.validate().is_err());
        config.queue.queue_url = Some("https://sqs.example/queue".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_s3_without_bucket() {
        let mut config = Config::default();
        config.queue.backend = QueueBackend::S3;
        assert!(config.validate().is_err());
        config.queue.bucket = Some("jobs".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_roundtrip_preserves_backend() {
        let mut config = Config::default();
        config.queue.backend = QueueBackend::S3;
        let text = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.queue.backend, QueueBackend::S3);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[worker]\nmax_concurrent = 2\n").unwrap();
        assert_eq!(config.worker.max_concurrent, 2);
        assert_eq!(config.worker.max_deliveries, 5);
        assert_eq!(config.queue.backend, QueueBackend::File);
    }
}
