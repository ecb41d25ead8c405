//! Continuous micro-batch pipeline.
//!
//! Connects a source, the batch accumulator, and the flush stages into a
//! streaming pipeline with back-pressure and graceful shutdown.
//!
//! # Architecture
//!
//! Three tokio tasks joined by bounded channels:
//! - **ingest**: pulls events from the [`EventSource`]
//! - **batching**: owns the [`BatchAccumulator`] and fires size and age flushes
//! - **flush**: encodes, transforms, writes, and summarizes one batch at a time,
//!   with CPU work on the blocking pool
//!
//! The flush queue is shallow (one batch by default), so a slow sink stalls
//! batching, which stalls ingestion.

mod signal;
mod tasks;

use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::{BatchAccumulator, ColumnarEncoder};
use crate::config::Config;
use crate::dlq::{DeadLetterQueue, FailureTracker};
use crate::error::{ConfigSnafu, DlqSnafu, PipelineError, PipelineStorageSnafu, SourceSnafu};
use crate::monitor::{LogSummarySink, SummarySink};
use crate::sink::{PartitionedWriter, WriterConfig};
use crate::source::{self, EventSource};
use crate::storage::{StorageProvider, StorageProviderRef};

use tasks::{Batcher, Flusher, Ingester};

pub use tasks::{FlushReport, FlushStats, FlushWorker};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub events_received: u64,
    pub events_rejected: u64,
    pub flushes_triggered: u64,
    pub flushes_completed: u64,
    pub flushes_failed: u64,
    pub rows_written: u64,
    pub rows_dropped: u64,
    pub files_written: u64,
    pub bytes_written: u64,
}

/// Main processing pipeline.
pub struct Pipeline {
    config: Config,
    source: Box<dyn EventSource>,
    storage: StorageProviderRef,
    failures: FailureTracker,
    summary_sink: Arc<dyn SummarySink>,
    shutdown: CancellationToken,
    run_id: String,
}

impl Pipeline {
    /// Create a pipeline from configuration and an already opened source.
    ///
    /// Fails if the configuration is invalid or the output root or the DLQ
    /// location cannot be opened.
    pub async fn new(
        config: Config,
        source: Box<dyn EventSource>,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        config.validate().context(ConfigSnafu)?;

        let storage = Arc::new(
            StorageProvider::for_url_with_options(
                &config.sink.path,
                config.sink.storage_options.clone(),
            )
            .await
            .context(PipelineStorageSnafu)?,
        );

        let run_id = Uuid::now_v7().to_string();
        let dlq = DeadLetterQueue::from_config(&config.error_handling, &run_id)
            .await
            .context(DlqSnafu)?
            .map(Arc::new);

        Ok(Self {
            config,
            source,
            storage,
            failures: FailureTracker::new(dlq),
            summary_sink: Arc::new(LogSummarySink),
            shutdown,
            run_id,
        })
    }

    /// Deliver per-flush summaries to `sink` instead of the log.
    pub fn with_summary_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.summary_sink = sink;
        self
    }

    /// Output storage the dataset is written to.
    pub fn storage(&self) -> &StorageProviderRef {
        &self.storage
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run until the source is exhausted or shutdown is requested.
    ///
    /// Failed flushes are reported and counted but never end the run. A
    /// source failure ends ingestion; the buffered events are still flushed
    /// before the error is returned.
    pub async fn run(self) -> Result<PipelineStats, PipelineError> {
        let Self {
            config,
            source,
            storage,
            failures,
            summary_sink,
            shutdown,
            run_id,
        } = self;

        info!(
            run_id = %run_id,
            source = %source.describe(),
            output = %storage.canonical_url(),
            max_rows = config.batch.max_rows,
            checkpoint_secs = config.batch.checkpoint_secs,
            "Starting pipeline"
        );

        let (event_tx, event_rx) = mpsc::channel(config.pipeline.event_queue_capacity);
        let (batch_tx, batch_rx) = mpsc::channel(config.pipeline.flush_queue_depth);

        let worker = FlushWorker::new(
            ColumnarEncoder::new(config.batch.sku_length),
            PartitionedWriter::new(storage, WriterConfig::from(&config.sink)),
            summary_sink,
            failures.clone(),
        );
        let flusher = Flusher::spawn(worker, batch_rx);

        let accumulator = BatchAccumulator::new(config.batch.policy(), Instant::now());
        let batcher = Batcher::spawn(
            accumulator,
            event_rx,
            batch_tx,
            shutdown.clone(),
            config.pipeline.drain_on_shutdown,
        );

        let ingester = Ingester::spawn(source, event_tx, shutdown, failures.clone());

        let ingest = ingester.finish().await?;
        let batching = batcher.finish().await?;
        let flushed = flusher.finish().await?;

        failures.finalize_dlq().await;

        let stats = PipelineStats {
            events_received: ingest.received,
            events_rejected: ingest.rejected,
            flushes_triggered: batching.flushes_triggered,
            flushes_completed: flushed.flushes_completed,
            flushes_failed: flushed.flushes_failed,
            rows_written: flushed.rows_written,
            rows_dropped: flushed.rows_dropped + batching.rows_discarded,
            files_written: flushed.files_written,
            bytes_written: flushed.bytes_written,
        };

        if stats.flushes_failed > 0 || stats.rows_dropped > 0 {
            warn!(
                flushes_failed = stats.flushes_failed,
                rows_dropped = stats.rows_dropped,
                dlq = failures.has_dlq(),
                "Pipeline finished with failures"
            );
        }
        info!("Pipeline completed: {:?}", stats);

        match ingest.error {
            Some(error) => Err(error).context(SourceSnafu),
            None => Ok(stats),
        }
    }
}

/// Run the pipeline with the given configuration until the source is
/// exhausted or a shutdown signal arrives.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    let shutdown = CancellationToken::new();

    // Set up signal handler for graceful shutdown
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let source = source::from_config(&config.source)
        .await
        .context(SourceSnafu)?;
    let pipeline = Pipeline::new(config, source, shutdown).await?;
    pipeline.run().await
}
