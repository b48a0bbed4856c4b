//! # EventGraph Configuration System
//!
//! One immutable [`PipelineConfig`] value is built at startup and passed by reference
//! (usually as `Arc<PipelineConfig>`) into every component. There are no ambient
//! behavior flags.
//!
//! ## Sources
//!
//! - `config/eventgraph/base.toml`: shared defaults
//! - `config/eventgraph/{environment}.toml`: optional environment overrides
//! - `EVENTGRAPH__SECTION__KEY` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use eventgraph_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let workers = manager.config().documents.worker_threads;
//! let interval = manager.config().dispatch.reconcile_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{DEFAULT_DOCUMENT_QUEUE_PREFIX, DEFAULT_EDGE_QUEUE};
use crate::models::SourceKind;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Shared queue/lifecycle store connection
    pub store: StoreConfig,

    /// Destination graph store connection
    pub graph: GraphConfig,

    /// Sources with a dedicated item processor
    pub sources: Vec<SourceConfig>,

    /// Lifecycle record policy
    pub lifecycle: LifecycleConfig,

    /// Item processor loop settings
    pub processor: ProcessorConfig,

    /// Event dispatcher and reconciliation settings
    pub dispatch: DispatchConfig,

    /// Document work router and worker pool settings
    pub documents: DocumentsConfig,

    /// Edge batcher settings
    pub edges: EdgesConfig,

    /// Structured logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphBackend {
    Memory,
    Neo4j,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: GraphBackend,
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub max_connections: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::Memory,
            uri: "127.0.0.1:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: None,
            max_connections: 8,
        }
    }
}

/// Per-source processing settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Mutable entities are rewritten when the stored version is older
    #[serde(default)]
    pub mutable: bool,
    /// Processed items of this source spawn document jobs
    #[serde(default)]
    pub documents: bool,
}

impl SourceConfig {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            mutable: false,
            documents: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// TTL applied to records once they reach a terminal field
    pub ttl_seconds: Option<u64>,
    pub remove_on_terminal: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: None,
            remove_on_terminal: true,
        }
    }
}

impl LifecycleConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub pop_timeout_ms: u64,
    pub io_error_threshold: u32,
    pub generic_error_threshold: u32,
    pub reconnect_backoff_ms: u64,
    /// Monitored symbol universe; an empty list accepts every symbol
    pub symbols: Vec<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pop_timeout_ms: 1_000,
            io_error_threshold: 3,
            generic_error_threshold: 10,
            reconnect_backoff_ms: 500,
            symbols: Vec::new(),
        }
    }
}

impl ProcessorConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub poll_timeout_ms: u64,
    pub reconcile_interval_seconds: u64,
    pub reconcile_on_startup: bool,
    pub reconcile_batch_size: usize,
    /// Non-terminal document jobs older than this are re-driven
    pub stale_job_after_seconds: u64,
    pub max_job_redrives_per_sweep: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            reconcile_interval_seconds: 3_600,
            reconcile_on_startup: true,
            reconcile_batch_size: 100,
            stale_job_after_seconds: 1_800,
            max_job_redrives_per_sweep: 500,
        }
    }
}

impl DispatchConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn stale_job_after(&self) -> Duration {
        Duration::from_secs(self.stale_job_after_seconds)
    }
}

/// Form types per cost tier; anything unlisted lands in the heavy tier
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub heavy: Vec<String>,
    pub medium: Vec<String>,
    pub light: Vec<String>,
    pub skip: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            heavy: list(&["10-K", "10-K/A", "20-F", "S-1"]),
            medium: list(&["10-Q", "10-Q/A", "6-K"]),
            light: list(&["8-K", "8-K/A", "TRANSCRIPT"]),
            skip: list(&["3", "4", "5", "13F-HR", "SC 13G", "SC 13G/A"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub queue_prefix: String,
    /// Workers accepted into the pool per tier
    pub worker_threads: usize,
    /// Truly concurrent heavy operations per tier
    pub concurrency_limit: usize,
    pub semaphore_retries: u32,
    pub semaphore_retry_pause_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub call_timeout_ms: u64,
    pub cooldown_ms: u64,
    pub batch_deadline_seconds: u64,
    pub max_error_length: usize,
    pub pop_timeout_ms: u64,
    pub classification: ClassificationConfig,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            queue_prefix: DEFAULT_DOCUMENT_QUEUE_PREFIX.to_string(),
            worker_threads: 4,
            concurrency_limit: 2,
            semaphore_retries: 5,
            semaphore_retry_pause_ms: 200,
            max_attempts: 3,
            retry_backoff_ms: 1_000,
            call_timeout_ms: 120_000,
            cooldown_ms: 250,
            batch_deadline_seconds: 600,
            max_error_length: 1_000,
            pop_timeout_ms: 1_000,
            classification: ClassificationConfig::default(),
        }
    }
}

impl DocumentsConfig {
    pub fn semaphore_retry_pause(&self) -> Duration {
        Duration::from_millis(self.semaphore_retry_pause_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_seconds)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgesConfig {
    pub queue: String,
    pub batch_size: usize,
    /// Pause between drains when the queue is empty
    pub idle_pause_ms: u64,
    pub requeue_on_failure: bool,
}

impl Default for EdgesConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_EDGE_QUEUE.to_string(),
            batch_size: 500,
            idle_pause_ms: 250,
            requeue_on_failure: true,
        }
    }
}

impl EdgesConfig {
    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    /// Overrides the environment-derived level (still overridden by `RUST_LOG`)
    pub level: Option<String>,
    pub file_output: bool,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "log".to_string(),
            level: None,
            file_output: true,
            ansi: true,
        }
    }
}

impl PipelineConfig {
    /// Configuration covering every known source with default settings
    pub fn with_all_sources() -> Self {
        Self {
            sources: SourceKind::ALL.iter().copied().map(SourceConfig::new).collect(),
            ..Self::default()
        }
    }

    pub fn source(&self, kind: SourceKind) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.kind == kind)
    }

    pub fn is_mutable(&self, kind: SourceKind) -> bool {
        self.source(kind).is_some_and(|s| s.mutable)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let docs = &self.documents;
        if docs.worker_threads == 0 {
            return Err(ConfigurationError::invalid_value(
                "documents.worker_threads",
                docs.worker_threads,
                "must be greater than 0",
            ));
        }
        if docs.concurrency_limit == 0 || docs.concurrency_limit > docs.worker_threads {
            return Err(ConfigurationError::invalid_value(
                "documents.concurrency_limit",
                docs.concurrency_limit,
                format!(
                    "must be between 1 and worker_threads ({})",
                    docs.worker_threads
                ),
            ));
        }
        if docs.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "documents.max_attempts",
                docs.max_attempts,
                "must be greater than 0",
            ));
        }
        if self.edges.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "edges.batch_size",
                self.edges.batch_size,
                "must be greater than 0",
            ));
        }
        if self.dispatch.reconcile_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.reconcile_batch_size",
                self.dispatch.reconcile_batch_size,
                "must be greater than 0",
            ));
        }
        if self.dispatch.reconcile_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.reconcile_interval_seconds",
                self.dispatch.reconcile_interval_seconds,
                "must be greater than 0",
            ));
        }
        if self.sources.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "sources",
                "pipeline configuration",
            ));
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.kind) {
                return Err(ConfigurationError::validation_error(format!(
                    "source '{}' is configured more than once",
                    source.kind
                )));
            }
        }
        let processor = &self.processor;
        if processor.io_error_threshold == 0
            || processor.io_error_threshold > processor.generic_error_threshold
        {
            return Err(ConfigurationError::validation_error(format!(
                "processor.io_error_threshold ({}) must be between 1 and generic_error_threshold ({})",
                processor.io_error_threshold, processor.generic_error_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_with_sources_is_valid() {
        let config = PipelineConfig::with_all_sources();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.reconcile_interval(), Duration::from_secs(3_600));
        assert_eq!(config.edges.queue, "edges:queues:pending");
    }

    #[test]
    fn test_validation_rejects_bad_concurrency() {
        let mut config = PipelineConfig::with_all_sources();
        config.documents.worker_threads = 2;
        config.documents.concurrency_limit = 3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concurrency_limit"));

        config.documents.concurrency_limit = 0;
        assert!(config.validate().is_err());

        config.documents.worker_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_sources_and_thresholds() {
        let mut config = PipelineConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));

        config.sources = vec![
            SourceConfig::new(SourceKind::News),
            SourceConfig::new(SourceKind::News),
        ];
        assert!(config.validate().unwrap_err().to_string().contains("more than once"));

        config.sources = vec![SourceConfig::new(SourceKind::News)];
        config.processor.io_error_threshold = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_sizes() {
        let mut config = PipelineConfig::with_all_sources();
        config.edges.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::with_all_sources();
        config.dispatch.reconcile_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mutable_lookup() {
        let mut config = PipelineConfig::with_all_sources();
        config.sources[0].mutable = true;
        assert!(config.is_mutable(SourceKind::News));
        assert!(!config.is_mutable(SourceKind::Filing));
    }
}
