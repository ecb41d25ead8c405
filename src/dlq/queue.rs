//! Dead letter queue.
//!
//! Buffers failure records and writes them as NDJSON. Every flush of the
//! buffer goes to a new object, `failures-<run>-<seq>.ndjson`, created with
//! a put-if-absent so earlier batches are never overwritten.

use bytes::Bytes;
use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::ErrorHandlingConfig;
use crate::error::{DlqError, DlqSerializeSnafu, DlqStorageSnafu, DlqWriteSnafu};
use crate::storage::{StorageProvider, StorageProviderRef};

use super::types::{FailureRecord, FailureStats};

/// Records are written once this many are buffered.
const DEFAULT_BUFFER_SIZE: usize = 100;

struct QueueState {
    buffer: Vec<FailureRecord>,
    stats: FailureStats,
    sequence: u64,
}

/// Dead letter queue for failed flushes and rejected events.
pub struct DeadLetterQueue {
    storage: StorageProviderRef,
    run_id: String,
    state: Mutex<QueueState>,
    buffer_size: usize,
}

impl DeadLetterQueue {
    /// Create a DLQ from configuration.
    ///
    /// Returns `None` if no DLQ path is configured.
    pub async fn from_config(
        config: &ErrorHandlingConfig,
        run_id: &str,
    ) -> Result<Option<Self>, DlqError> {
        let Some(dlq_path) = &config.dlq_path else {
            return Ok(None);
        };

        let storage =
            StorageProvider::for_url_with_options(dlq_path, config.dlq_storage_options.clone())
                .await
                .context(DlqStorageSnafu)?;

        info!(path = %dlq_path, run_id, "DLQ enabled");
        Ok(Some(Self::new(Arc::new(storage), run_id)))
    }

    pub fn new(storage: StorageProviderRef, run_id: impl Into<String>) -> Self {
        Self {
            storage,
            run_id: run_id.into(),
            state: Mutex::new(QueueState {
                buffer: Vec::new(),
                stats: FailureStats::default(),
                sequence: 0,
            }),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub async fn record(&self, record: FailureRecord) {
        debug!(stage = record.stage.as_str(), "Recording DLQ failure");

        let should_flush = {
            let mut state = self.state.lock().await;
            state.stats.increment(record.stage);
            state.buffer.push(record);
            state.buffer.len() >= self.buffer_size
        };

        if should_flush && let Err(e) = self.flush().await {
            error!("Failed to flush DLQ: {}", e);
        }
    }

    /// Write buffered records to a new object.
    pub async fn flush(&self) -> Result<(), DlqError> {
        // The lock is held across the write so sequence numbers are used in order.
        let mut state = self.state.lock().await;
        if state.buffer.is_empty() {
            return Ok(());
        }

        let mut ndjson = String::new();
        for record in &state.buffer {
            let line = serde_json::to_string(record).context(DlqSerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let path = format!("failures-{}-{:04}.ndjson", self.run_id, state.sequence);
        self.storage
            .put_if_absent(&path, Bytes::from(ndjson))
            .await
            .context(DlqWriteSnafu { path: path.clone() })?;

        let count = state.buffer.len();
        state.buffer.clear();
        state.sequence += 1;
        info!(path = %path, count, "Flushed records to DLQ");
        Ok(())
    }

    pub async fn stats(&self) -> FailureStats {
        self.state.lock().await.stats
    }

    /// Flush any remaining records and log the totals.
    pub async fn finalize(&self) -> Result<(), DlqError> {
        self.flush().await?;
        let stats = self.stats().await;
        info!(
            "DLQ finalized: {} total failures (ingest={}, encode={}, transform={}, write={}, summarize={})",
            stats.total(),
            stats.ingest,
            stats.encode,
            stats.transform,
            stats.write,
            stats.summarize
        );
        Ok(())
    }
}
