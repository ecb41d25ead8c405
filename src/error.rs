//! Error types for flurry using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. Per-flush errors are wrapped in
//! [`FlushError`], which carries the flush context needed for reporting.

use snafu::prelude::*;

use crate::metrics::events::FailureStage;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// URL could not be parsed.
    #[snafu(display("Failed to parse storage URL: {url}"))]
    UrlParse {
        url: String,
        source: url::ParseError,
    },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Check if a create-if-absent put lost against an existing object.
    pub fn is_already_exists(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::AlreadyExists { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Batch size must be positive.
    #[snafu(display("batch.max_rows must be greater than 0"))]
    InvalidBatchRows,

    /// Checkpoint interval must be positive.
    #[snafu(display("batch.checkpoint_secs must be greater than 0"))]
    InvalidCheckpointSecs,

    /// SKU length must be positive.
    #[snafu(display("batch.sku_length must be greater than 0"))]
    InvalidSkuLength,

    /// Sink path is empty.
    #[snafu(display("Sink path cannot be empty"))]
    EmptySinkPath,

    /// A queue or concurrency bound is zero.
    #[snafu(display("{name} must be greater than 0"))]
    InvalidQueueCapacity { name: &'static str },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Source Errors ============

/// Errors that can occur while pulling events from a source.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// A single input record could not be decoded. The source stays usable.
    #[snafu(display("Failed to decode event on line {line}: {message}"))]
    Decode { line: u64, message: String },

    /// Reading from the underlying input failed.
    #[snafu(display("Failed to read source input"))]
    ReadInput { source: std::io::Error },

    /// The input file could not be opened.
    #[snafu(display("Failed to open source input {path}"))]
    OpenInput {
        path: String,
        source: std::io::Error,
    },
}

impl SourceError {
    /// Whether ingestion can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Decode { .. })
    }
}

// ============ Encode Errors ============

/// Errors raised while projecting a batch of events into columnar form.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EncodeError {
    /// Flushes never carry an empty batch.
    #[snafu(display("Cannot encode an empty batch"))]
    EmptyBatch,

    /// An event failed validation; the whole batch is rejected.
    #[snafu(display("Malformed event at row {row}: field '{field}' {reason}"))]
    MalformedEvent {
        row: usize,
        field: &'static str,
        reason: String,
    },

    /// Arrow rejected a column or the assembled batch.
    #[snafu(display("Failed to build columnar batch"))]
    EncodeColumn { source: arrow::error::ArrowError },
}

// ============ Transform Errors ============

/// Errors raised by the derivation pass.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// The input batch does not carry the columnar schema.
    #[snafu(display("Input schema does not match the columnar batch schema: {message}"))]
    SchemaMismatch { message: String },

    /// A cast kernel failed on a column.
    #[snafu(display("Failed to cast column '{column}'"))]
    CastColumn {
        column: &'static str,
        source: arrow::error::ArrowError,
    },

    /// The transform must be row-preserving.
    #[snafu(display("Transform changed the row count: expected {expected}, got {actual}"))]
    RowCountMismatch { expected: usize, actual: usize },

    /// Arrow rejected the assembled output batch.
    #[snafu(display("Failed to assemble transformed batch"))]
    TransformColumn { source: arrow::error::ArrowError },
}

// ============ Write Errors ============

/// Errors raised while appending a batch to the partitioned dataset.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// The batch is missing a column the writer needs.
    #[snafu(display("Transformed batch is missing column '{name}'"))]
    MissingColumn { name: &'static str },

    /// Rows could not be gathered into a partition.
    #[snafu(display("Failed to split rows for partition {partition}"))]
    PartitionSplit {
        partition: String,
        source: arrow::error::ArrowError,
    },

    /// Parquet encoding failed.
    #[snafu(display("Failed to encode parquet for partition {partition}"))]
    ParquetEncode {
        partition: String,
        source: parquet::errors::ParquetError,
    },

    /// The blocking encode task did not complete.
    #[snafu(display("Parquet encode task failed"))]
    EncodeTask { source: tokio::task::JoinError },

    /// Storage rejected the file.
    #[snafu(display("Failed to write {path}"))]
    PutFile { path: String, source: StorageError },

    /// Existing files in a partition could not be listed.
    #[snafu(display("Failed to list existing files in partition {partition}"))]
    ListExisting {
        partition: String,
        source: StorageError,
    },

    /// Every candidate file name was already taken.
    #[snafu(display(
        "No free file index for partition {partition} hour {hour} after {attempts} attempts"
    ))]
    SequenceExhausted {
        partition: String,
        hour: String,
        attempts: usize,
    },
}

// ============ Monitor Errors ============

/// Errors raised while summarizing a transformed batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MonitorError {
    /// A column was missing or had the wrong type.
    #[snafu(display("Column '{name}' is missing or has an unexpected type"))]
    MonitorColumn { name: &'static str },
}

// ============ Flush Errors ============

/// A flush that failed at some stage. Carries the flush context so the
/// failure can be reported and recorded without the original batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FlushError {
    #[snafu(display("Flush {flush_id} ({rows} rows) failed to encode"))]
    EncodeStage {
        flush_id: u64,
        rows: usize,
        partitions: Vec<String>,
        source: EncodeError,
    },

    #[snafu(display("Flush {flush_id} ({rows} rows) failed to transform"))]
    TransformStage {
        flush_id: u64,
        rows: usize,
        partitions: Vec<String>,
        source: TransformError,
    },

    #[snafu(display("Flush {flush_id} ({rows} rows) failed to write partitions {partitions:?}"))]
    WriteStage {
        flush_id: u64,
        rows: usize,
        partitions: Vec<String>,
        source: WriteError,
    },

    #[snafu(display("Flush {flush_id} ({rows} rows) failed to summarize"))]
    MonitorStage {
        flush_id: u64,
        rows: usize,
        partitions: Vec<String>,
        source: MonitorError,
    },

    #[snafu(display("Flush {flush_id} ({rows} rows) task did not complete"))]
    FlushTask {
        flush_id: u64,
        rows: usize,
        partitions: Vec<String>,
        source: tokio::task::JoinError,
    },
}

impl FlushError {
    /// The stage at which the flush failed.
    pub fn stage(&self) -> FailureStage {
        match self {
            FlushError::EncodeStage { .. } | FlushError::FlushTask { .. } => FailureStage::Encode,
            FlushError::TransformStage { .. } => FailureStage::Transform,
            FlushError::WriteStage { .. } => FailureStage::Write,
            FlushError::MonitorStage { .. } => FailureStage::Summarize,
        }
    }

    pub fn flush_id(&self) -> u64 {
        match self {
            FlushError::EncodeStage { flush_id, .. }
            | FlushError::TransformStage { flush_id, .. }
            | FlushError::WriteStage { flush_id, .. }
            | FlushError::MonitorStage { flush_id, .. }
            | FlushError::FlushTask { flush_id, .. } => *flush_id,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            FlushError::EncodeStage { rows, .. }
            | FlushError::TransformStage { rows, .. }
            | FlushError::WriteStage { rows, .. }
            | FlushError::MonitorStage { rows, .. }
            | FlushError::FlushTask { rows, .. } => *rows,
        }
    }

    /// Partition values touched by the failed batch.
    pub fn partitions(&self) -> &[String] {
        match self {
            FlushError::EncodeStage { partitions, .. }
            | FlushError::TransformStage { partitions, .. }
            | FlushError::WriteStage { partitions, .. }
            | FlushError::MonitorStage { partitions, .. }
            | FlushError::FlushTask { partitions, .. } => partitions,
        }
    }

    /// Whether the rows of this flush were lost. A summary failure happens
    /// after the data is durable, so it does not drop rows.
    pub fn rows_lost(&self) -> bool {
        !matches!(self, FlushError::MonitorStage { .. })
    }
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to install Prometheus recorder.
    #[snafu(display("Failed to install Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ DLQ Errors ============

/// Errors that can occur during DLQ operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DlqError {
    /// Failed to write DLQ records.
    #[snafu(display("Failed to write DLQ records to {path}"))]
    DlqWrite { path: String, source: StorageError },

    /// Failed to serialize DLQ record.
    #[snafu(display("Failed to serialize DLQ record"))]
    DlqSerialize { source: serde_json::Error },

    /// Failed to open DLQ storage.
    #[snafu(display("Failed to open DLQ storage"))]
    DlqStorage { source: StorageError },
}

// ============ Pipeline Errors ============

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// The output root could not be opened.
    #[snafu(display("Failed to open output storage"))]
    PipelineStorage { source: StorageError },

    /// The event source failed fatally or could not be opened.
    #[snafu(display("Event source error"))]
    Source { source: SourceError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// DLQ error.
    #[snafu(display("DLQ error"))]
    Dlq { source: DlqError },

    /// A pipeline stage panicked or was aborted.
    #[snafu(display("Pipeline task failed"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parse error.
    #[snafu(display("Invalid address"))]
    AddressParse { source: std::net::AddrParseError },
}
