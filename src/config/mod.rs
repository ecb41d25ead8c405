//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files. Every field is optional;
//! command-line flags and environment variables layered on top live in
//! [`cli`].

pub mod cli;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::batch::FlushPolicy;
use crate::error::{
    ConfigError, EmptySinkPathSnafu, InvalidBatchRowsSnafu, InvalidCheckpointSecsSnafu,
    InvalidQueueCapacitySnafu, InvalidSkuLengthSnafu, ReadFileSnafu, YamlParseSnafu,
};

pub use cli::CliArgs;

/// Default number of events per flush.
pub const DEFAULT_BATCH_ROWS: usize = 50_000;
/// Default flush interval in seconds.
pub const DEFAULT_CHECKPOINT_SECS: u64 = 30;
/// Default SKU length accepted by the encoder.
pub const DEFAULT_SKU_LENGTH: usize = 8;

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Error handling configuration (optional).
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

/// Flush policy and event validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush once this many events are buffered (default: 50000).
    #[serde(default = "default_batch_rows")]
    pub max_rows: usize,
    /// Flush once this many seconds have passed since the last flush (default: 30).
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_secs: u64,
    /// Exact length of a valid SKU (default: 8).
    #[serde(default = "default_sku_length")]
    pub sku_length: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: default_batch_rows(),
            checkpoint_secs: default_checkpoint_secs(),
            sku_length: default_sku_length(),
        }
    }
}

impl BatchConfig {
    /// Build the flush policy for the accumulator.
    pub fn policy(&self) -> FlushPolicy {
        FlushPolicy::new(self.max_rows, Duration::from_secs(self.checkpoint_secs))
    }
}

fn default_batch_rows() -> usize {
    DEFAULT_BATCH_ROWS
}

fn default_checkpoint_secs() -> u64 {
    DEFAULT_CHECKPOINT_SECS
}

fn default_sku_length() -> usize {
    DEFAULT_SKU_LENGTH
}

/// Which event source feeds the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Randomly generated purchase events.
    #[default]
    Synthetic,
    /// One JSON event per line from a file or stdin.
    Ndjson,
}

/// Source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// NDJSON input path; `-` or absent reads stdin.
    #[serde(default)]
    pub path: Option<String>,
    /// Stop after this many events (default: unbounded).
    #[serde(default)]
    pub limit: Option<u64>,
    /// Throttle the synthetic source to this rate.
    #[serde(default)]
    pub events_per_sec: Option<u64>,
    /// Seed for the synthetic generator, for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Sink configuration for the partitioned Parquet dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Root of the dataset.
    /// Examples: "checkpoints/", "file:///data/events", "s3://bucket/events"
    #[serde(default = "default_sink_path")]
    pub path: String,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Maximum partitions written concurrently within one flush (default: 4)
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: default_sink_path(),
            storage_options: HashMap::new(),
            compression: ParquetCompression::default(),
            max_concurrent_writes: default_max_concurrent_writes(),
        }
    }
}

fn default_sink_path() -> String {
    "checkpoints/".to_string()
}

fn default_max_concurrent_writes() -> usize {
    4
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

/// Queue sizing and shutdown behaviour of the staged pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the source → batching queue (default: 8192).
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Batches allowed to wait for the flush worker (default: 1).
    #[serde(default = "default_flush_queue_depth")]
    pub flush_queue_depth: usize,
    /// Flush buffered events on shutdown instead of discarding them (default: true).
    #[serde(default = "default_drain_on_shutdown")]
    pub drain_on_shutdown: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            flush_queue_depth: default_flush_queue_depth(),
            drain_on_shutdown: default_drain_on_shutdown(),
        }
    }
}

fn default_event_queue_capacity() -> usize {
    8192
}

fn default_flush_queue_depth() -> usize {
    1
}

fn default_drain_on_shutdown() -> bool {
    true
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Where failed flushes and rejected events are recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Path to write failure records (DLQ disabled when absent).
    #[serde(default)]
    pub dlq_path: Option<String>,
    /// Storage options for DLQ (credentials, region, etc.)
    #[serde(default)]
    pub dlq_storage_options: HashMap<String, String>,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without validating it, so overrides can be applied first.
    pub(crate) fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        serde_yaml::from_str(&content).context(YamlParseSnafu)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.batch.max_rows > 0, InvalidBatchRowsSnafu);
        ensure!(self.batch.checkpoint_secs > 0, InvalidCheckpointSecsSnafu);
        ensure!(self.batch.sku_length > 0, InvalidSkuLengthSnafu);
        ensure!(!self.sink.path.trim().is_empty(), EmptySinkPathSnafu);
        ensure!(
            self.sink.max_concurrent_writes > 0,
            InvalidQueueCapacitySnafu {
                name: "sink.max_concurrent_writes"
            }
        );
        ensure!(
            self.pipeline.event_queue_capacity > 0,
            InvalidQueueCapacitySnafu {
                name: "pipeline.event_queue_capacity"
            }
        );
        ensure!(
            self.pipeline.flush_queue_depth > 0,
            InvalidQueueCapacitySnafu {
                name: "pipeline.flush_queue_depth"
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.batch.max_rows, 50_000);
        assert_eq!(config.batch.checkpoint_secs, 30);
        assert_eq!(config.batch.sku_length, 8);
        assert_eq!(config.sink.path, "checkpoints/");
        assert_eq!(config.sink.compression, ParquetCompression::Snappy);
        assert_eq!(config.pipeline.flush_queue_depth, 1);
        assert!(config.pipeline.drain_on_shutdown);
        assert!(!config.metrics.enabled);
        assert!(config.error_handling.dlq_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.batch.max_rows, DEFAULT_BATCH_ROWS);
        assert_eq!(config.source.kind, SourceKind::Synthetic);
    }

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
batch:
  max_rows: 1000
  checkpoint_secs: 5

source:
  kind: ndjson
  path: events.ndjson

sink:
  path: "s3://bucket/events"
  compression: zstd
  storage_options:
    region: eu-west-1

pipeline:
  drain_on_shutdown: false

error_handling:
  dlq_path: /tmp/flurry-dlq
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.batch.max_rows, 1000);
        assert_eq!(config.batch.checkpoint_secs, 5);
        assert_eq!(config.batch.sku_length, DEFAULT_SKU_LENGTH);
        assert_eq!(config.source.kind, SourceKind::Ndjson);
        assert_eq!(config.source.path.as_deref(), Some("events.ndjson"));
        assert_eq!(config.sink.compression, ParquetCompression::Zstd);
        assert_eq!(
            config.sink.storage_options.get("region").map(String::as_str),
            Some("eu-west-1")
        );
        assert!(!config.pipeline.drain_on_shutdown);
        assert_eq!(
            config.error_handling.dlq_path.as_deref(),
            Some("/tmp/flurry-dlq")
        );
    }

    #[test]
    fn test_policy_from_batch_config() {
        let batch = BatchConfig {
            max_rows: 10,
            checkpoint_secs: 2,
            sku_length: 8,
        };
        let policy = batch.policy();
        assert_eq!(policy.max_rows(), 10);
        assert_eq!(policy.max_age(), Duration::from_secs(2));
    }

    #[test]
    fn test_validation_rejects_zero_bounds() {
        let err = Config::from_yaml("batch:\n  max_rows: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBatchRows));

        let err = Config::from_yaml("batch:\n  checkpoint_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCheckpointSecs));

        let err = Config::from_yaml("pipeline:\n  flush_queue_depth: 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidQueueCapacity {
                name: "pipeline.flush_queue_depth"
            }
        ));
    }

    #[test]
    fn test_validation_rejects_empty_sink_path() {
        let err = Config::from_yaml("sink:\n  path: \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptySinkPath));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Config::from_yaml("batch: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batch:\n  max_rows: 42").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.batch.max_rows, 42);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/flurry.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
