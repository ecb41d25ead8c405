//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::batch::FlushTrigger;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when the source hands an event to the pipeline.
pub struct EventsReceived {
    pub count: u64,
}

impl InternalEvent for EventsReceived {
    fn emit(self) {
        trace!(count = self.count, "Events received");
        counter!("flurry_events_received_total").increment(self.count);
    }
}

/// Event emitted when the source rejects an undecodable record.
pub struct EventsRejected {
    pub count: u64,
}

impl InternalEvent for EventsRejected {
    fn emit(self) {
        trace!(count = self.count, "Events rejected");
        counter!("flurry_events_rejected_total").increment(self.count);
    }
}

/// Event emitted when the accumulator hands off a batch.
pub struct FlushTriggered {
    pub trigger: FlushTrigger,
    pub rows: usize,
}

impl InternalEvent for FlushTriggered {
    fn emit(self) {
        trace!(trigger = self.trigger.as_str(), rows = self.rows, "Flush triggered");
        counter!("flurry_flushes_triggered_total", "trigger" => self.trigger.as_str())
            .increment(1);
        histogram!("flurry_flush_rows").record(self.rows as f64);
    }
}

/// Event emitted when the number of buffered events changes.
pub struct BufferedEvents {
    pub count: usize,
}

impl InternalEvent for BufferedEvents {
    fn emit(self) {
        trace!(count = self.count, "Buffered events");
        gauge!("flurry_buffered_events").set(self.count as f64);
    }
}

/// Event emitted when a flush completes all of its stages.
pub struct FlushCompleted {
    pub rows: usize,
    pub duration: Duration,
}

impl InternalEvent for FlushCompleted {
    fn emit(self) {
        trace!(
            rows = self.rows,
            duration_ms = self.duration.as_millis(),
            "Flush completed"
        );
        counter!("flurry_flushes_completed_total").increment(1);
        histogram!("flurry_flush_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Stage at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Ingest,
    Encode,
    Transform,
    Write,
    Summarize,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Ingest => "ingest",
            FailureStage::Encode => "encode",
            FailureStage::Transform => "transform",
            FailureStage::Write => "write",
            FailureStage::Summarize => "summarize",
        }
    }
}

/// Event emitted when a flush fails.
pub struct FlushFailed {
    pub stage: FailureStage,
}

impl InternalEvent for FlushFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Flush failed");
        counter!("flurry_flushes_failed_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when rows are lost to a failed or discarded flush.
pub struct RowsDropped {
    pub count: u64,
}

impl InternalEvent for RowsDropped {
    fn emit(self) {
        trace!(count = self.count, "Rows dropped");
        counter!("flurry_rows_dropped_total").increment(self.count);
    }
}

/// Event emitted when rows are committed to a partition.
pub struct RowsWritten {
    pub partition: String,
    pub count: u64,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(partition = %self.partition, count = self.count, "Rows written");
        counter!("flurry_rows_written_total", "partition" => self.partition).increment(self.count);
    }
}

/// Event emitted when a Parquet file is committed.
pub struct ParquetFileWritten {
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for ParquetFileWritten {
    fn emit(self) {
        trace!(
            bytes = self.bytes,
            duration_ms = self.duration.as_millis(),
            "Parquet file written"
        );
        counter!("flurry_files_written_total").increment(1);
        counter!("flurry_bytes_written_total").increment(self.bytes);
        histogram!("flurry_parquet_write_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a put collided with an existing file name.
pub struct FileNameCollision;

impl InternalEvent for FileNameCollision {
    fn emit(self) {
        trace!("File name collision");
        counter!("flurry_file_name_collisions_total").increment(1);
    }
}

/// Event emitted for each bucket in a published summary.
pub struct BucketObserved {
    pub bucket: &'static str,
    pub count: u64,
    pub avg_amount: f64,
}

impl InternalEvent for BucketObserved {
    fn emit(self) {
        trace!(
            bucket = self.bucket,
            count = self.count,
            avg_amount = self.avg_amount,
            "Bucket observed"
        );
        counter!("flurry_bucket_events_total", "bucket" => self.bucket).increment(self.count);
        gauge!("flurry_bucket_last_count", "bucket" => self.bucket).set(self.count as f64);
        gauge!("flurry_bucket_last_avg_amount", "bucket" => self.bucket).set(self.avg_amount);
    }
}

/// Event emitted when the number of batches waiting for the flush worker changes.
pub struct PendingFlushes {
    pub count: usize,
}

impl InternalEvent for PendingFlushes {
    fn emit(self) {
        trace!(count = self.count, "Pending flushes");
        gauge!("flurry_pending_flushes").set(self.count as f64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
    Delete,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
            StorageOperation::Delete => "delete",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "flurry_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "flurry_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
