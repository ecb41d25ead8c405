//! Flush stage: encode, transform, write, and summarize each batch.
//!
//! A single worker handles flushes strictly in order, so files within one
//! partition are written in flush order.

use snafu::ResultExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::batch::{Batch, ColumnarEncoder, FlushTrigger};
use crate::dlq::FailureTracker;
use crate::emit;
use crate::error::{
    EncodeStageSnafu, FlushError, FlushTaskSnafu, MonitorStageSnafu, PipelineError,
    TaskJoinSnafu, TransformStageSnafu, WriteStageSnafu,
};
use crate::metrics::events::{FlushCompleted, PendingFlushes};
use crate::monitor::{AggregateSummary, FlushInfo, MetricsSummarySink, MonitorAggregator, SummarySink};
use crate::sink::{PartitionedWriter, WrittenFile};
use crate::transform::{TransformEngine, TransformedBatch};

/// Outcome of one successful flush.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub flush_id: u64,
    pub trigger: FlushTrigger,
    pub rows: usize,
    pub files: Vec<WrittenFile>,
    pub summary: AggregateSummary,
}

impl FlushReport {
    pub fn bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FlushStats {
    pub flushes_completed: u64,
    pub flushes_failed: u64,
    pub rows_written: u64,
    pub rows_dropped: u64,
    pub files_written: u64,
    pub bytes_written: u64,
}

/// Runs every stage of a flush for one batch at a time.
pub struct FlushWorker {
    encoder: ColumnarEncoder,
    engine: TransformEngine,
    writer: PartitionedWriter,
    aggregator: MonitorAggregator,
    sink: Arc<dyn SummarySink>,
    failures: FailureTracker,
}

impl FlushWorker {
    pub fn new(
        encoder: ColumnarEncoder,
        writer: PartitionedWriter,
        sink: Arc<dyn SummarySink>,
        failures: FailureTracker,
    ) -> Self {
        Self {
            encoder,
            engine: TransformEngine::new(),
            writer,
            aggregator: MonitorAggregator::new(),
            sink,
            failures,
        }
    }

    /// Process batches until the queue closes.
    ///
    /// A failed flush is reported and the worker moves on to the next batch.
    pub async fn run(mut self, mut batches: mpsc::Receiver<Batch>) -> FlushStats {
        let mut stats = FlushStats::default();

        while let Some(batch) = batches.recv().await {
            emit!(PendingFlushes {
                count: batches.len()
            });

            match self.execute(batch).await {
                Ok(report) => {
                    stats.flushes_completed += 1;
                    stats.rows_written += report.rows as u64;
                    stats.files_written += report.files.len() as u64;
                    stats.bytes_written += report.bytes();
                }
                Err(e) => {
                    stats.flushes_failed += 1;
                    if e.rows_lost() {
                        stats.rows_dropped += e.rows() as u64;
                    } else {
                        stats.rows_written += e.rows() as u64;
                    }
                    self.failures.record_flush_failure(&e).await;
                }
            }
        }

        debug!("Flush queue closed, worker exiting");
        stats
    }

    /// Run one flush through every stage.
    pub async fn execute(&mut self, batch: Batch) -> Result<FlushReport, FlushError> {
        let start = Instant::now();
        let flush_id = batch.flush_id;
        let trigger = batch.trigger;
        let rows = batch.len();
        let partitions = batch.regions();

        let encoder = self.encoder.clone();
        let engine = self.engine;
        let task_partitions = partitions.clone();
        let transformed = tokio::task::spawn_blocking(move || -> Result<TransformedBatch, FlushError> {
            let columnar = encoder.encode(&batch).with_context(|_| EncodeStageSnafu {
                flush_id,
                rows,
                partitions: task_partitions.clone(),
            })?;
            engine.transform(&columnar).with_context(|_| TransformStageSnafu {
                flush_id,
                rows,
                partitions: task_partitions.clone(),
            })
        })
        .await
        .with_context(|_| FlushTaskSnafu {
            flush_id,
            rows,
            partitions: partitions.clone(),
        })??;

        let files = self
            .writer
            .write(&transformed)
            .await
            .with_context(|_| WriteStageSnafu {
                flush_id,
                rows,
                partitions: partitions.clone(),
            })?;

        let summary = self
            .aggregator
            .summarize(&transformed)
            .with_context(|_| MonitorStageSnafu {
                flush_id,
                rows,
                partitions: partitions.clone(),
            })?;

        let info = FlushInfo {
            flush_id,
            trigger,
            rows,
        };
        MetricsSummarySink.publish(&info, &summary);
        self.sink.publish(&info, &summary);

        let duration = start.elapsed();
        emit!(FlushCompleted { rows, duration });
        info!(
            flush_id,
            trigger = trigger.as_str(),
            rows,
            files = files.len(),
            duration_ms = duration.as_millis() as u64,
            "Flush completed"
        );

        Ok(FlushReport {
            flush_id,
            trigger,
            rows,
            files,
            summary,
        })
    }
}

/// Handle to the background flush task.
pub(in crate::pipeline) struct Flusher {
    handle: JoinHandle<FlushStats>,
}

impl Flusher {
    pub fn spawn(worker: FlushWorker, batches: mpsc::Receiver<Batch>) -> Self {
        Self {
            handle: tokio::spawn(worker.run(batches)),
        }
    }

    pub async fn finish(self) -> Result<FlushStats, PipelineError> {
        self.handle.await.context(TaskJoinSnafu)
    }
}
