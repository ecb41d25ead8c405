//! Batching stage: owns the accumulator and decides when to flush.

use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, BatchAccumulator};
use crate::emit;
use crate::error::{PipelineError, TaskJoinSnafu};
use crate::metrics::events::{BufferedEvents, FlushTriggered, PendingFlushes, RowsDropped};
use crate::source::Event;

#[derive(Debug, Default, Clone, Copy)]
pub(in crate::pipeline) struct BatchingStats {
    pub flushes_triggered: u64,
    /// Events discarded on shutdown when draining is disabled, or lost
    /// because the flush stage went away.
    pub rows_discarded: u64,
}

/// Handle to the background batching task.
pub(in crate::pipeline) struct Batcher {
    handle: JoinHandle<BatchingStats>,
}

impl Batcher {
    pub fn spawn(
        accumulator: BatchAccumulator,
        events: mpsc::Receiver<Event>,
        batches: mpsc::Sender<Batch>,
        shutdown: CancellationToken,
        drain_on_shutdown: bool,
    ) -> Self {
        let handle = tokio::spawn(Self::run(
            accumulator,
            events,
            batches,
            shutdown,
            drain_on_shutdown,
        ));
        Self { handle }
    }

    pub async fn finish(self) -> Result<BatchingStats, PipelineError> {
        self.handle.await.context(TaskJoinSnafu)
    }

    /// Returns once the source is exhausted or shutdown is requested, after
    /// the final flush has been queued. Dropping `batches` then lets the flush
    /// worker finish.
    async fn run(
        mut acc: BatchAccumulator,
        mut events: mpsc::Receiver<Event>,
        batches: mpsc::Sender<Batch>,
        shutdown: CancellationToken,
        drain_on_shutdown: bool,
    ) -> BatchingStats {
        let mut stats = BatchingStats::default();

        loop {
            let buffered = !acc.is_empty();
            let deadline = acc.deadline();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(buffered = acc.len(), "Shutdown requested, closing event queue");
                    events.close();
                    if drain_on_shutdown {
                        while let Some(event) = events.recv().await {
                            if acc.offer(event, Instant::now())
                                && let Some(batch) = acc.flush_if_due(Instant::now())
                                && !dispatch(&batches, batch, &mut stats).await
                            {
                                return stats;
                            }
                        }
                        if let Some(batch) = acc.drain(Instant::now()) {
                            dispatch(&batches, batch, &mut stats).await;
                        }
                    } else {
                        let mut discarded = acc.len() as u64;
                        while events.recv().await.is_some() {
                            discarded += 1;
                        }
                        if discarded > 0 {
                            warn!(discarded, "Discarding buffered events on shutdown");
                            emit!(RowsDropped { count: discarded });
                            stats.rows_discarded += discarded;
                        }
                    }
                    break;
                }

                received = events.recv() => match received {
                    Some(event) => {
                        let now = Instant::now();
                        if acc.offer(event, now)
                            && let Some(batch) = acc.flush_if_due(now)
                            && !dispatch(&batches, batch, &mut stats).await
                        {
                            break;
                        }
                    }
                    None => {
                        debug!(buffered = acc.len(), "Event queue closed, draining");
                        if let Some(batch) = acc.drain(Instant::now()) {
                            dispatch(&batches, batch, &mut stats).await;
                        }
                        break;
                    }
                },

                _ = sleep_until(deadline), if buffered => {
                    if let Some(batch) = acc.flush_if_due(Instant::now())
                        && !dispatch(&batches, batch, &mut stats).await
                    {
                        break;
                    }
                }
            }

            emit!(BufferedEvents { count: acc.len() });
        }

        emit!(BufferedEvents { count: acc.len() });
        stats
    }
}

/// Queue `batch` for the flush worker. Returns false if the worker is gone.
async fn dispatch(batches: &mpsc::Sender<Batch>, batch: Batch, stats: &mut BatchingStats) -> bool {
    let rows = batch.len();
    debug!(
        flush_id = batch.flush_id,
        trigger = batch.trigger.as_str(),
        rows,
        "Flush triggered"
    );
    emit!(FlushTriggered {
        trigger: batch.trigger,
        rows,
    });
    stats.flushes_triggered += 1;

    if batches.send(batch).await.is_err() {
        error!(rows, "Flush queue closed unexpectedly, dropping batch");
        emit!(RowsDropped { count: rows as u64 });
        stats.rows_discarded += rows as u64;
        return false;
    }
    emit!(PendingFlushes {
        count: batches.max_capacity() - batches.capacity()
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{FlushPolicy, FlushTrigger};
    use std::time::Duration;

    fn event(user_id: i64) -> Event {
        Event {
            timestamp: 1_700_000_000,
            user_id,
            region: "eu".to_string(),
            amount: 12.5,
            sku: "AB12CD34".to_string(),
        }
    }

    fn spawn_batcher(
        max_rows: usize,
        max_age: Duration,
        drain_on_shutdown: bool,
    ) -> (
        Batcher,
        mpsc::Sender<Event>,
        mpsc::Receiver<Batch>,
        CancellationToken,
    ) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (batch_tx, batch_rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        let acc = BatchAccumulator::new(FlushPolicy::new(max_rows, max_age), Instant::now());
        let batcher = Batcher::spawn(
            acc,
            event_rx,
            batch_tx,
            shutdown.clone(),
            drain_on_shutdown,
        );
        (batcher, event_tx, batch_rx, shutdown)
    }

    #[tokio::test]
    async fn test_size_trigger_then_drain_on_close() {
        let (batcher, tx, mut rx, _shutdown) =
            spawn_batcher(3, Duration::from_secs(3600), true);
        for i in 0..7 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);

        let stats = batcher.finish().await.unwrap();
        assert_eq!(stats.flushes_triggered, 3);

        let mut batches = Vec::new();
        while let Some(batch) = rx.recv().await {
            batches.push(batch);
        }
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches[0].trigger, FlushTrigger::Size);
        assert_eq!(batches[2].trigger, FlushTrigger::Shutdown);
        let ids: Vec<u64> = batches.iter().map(|b| b.flush_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_trigger_fires_on_quiet_source() {
        let (batcher, tx, mut rx, _shutdown) =
            spawn_batcher(1000, Duration::from_secs(30), true);
        for i in 0..4 {
            tx.send(event(i)).await.unwrap();
        }

        // Paused time auto-advances to the deadline once everything is idle.
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.trigger, FlushTrigger::Age);
        assert_eq!(batch.len(), 4);

        drop(tx);
        let stats = batcher.finish().await.unwrap();
        assert_eq!(stats.flushes_triggered, 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_trigger_never_sends_empty_batches() {
        let (batcher, tx, mut rx, _shutdown) =
            spawn_batcher(1000, Duration::from_secs(1), true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(tx);

        let stats = batcher.finish().await.unwrap();
        assert_eq!(stats.flushes_triggered, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffer() {
        let (batcher, tx, mut rx, shutdown) =
            spawn_batcher(100, Duration::from_secs(3600), true);
        for i in 0..5 {
            tx.send(event(i)).await.unwrap();
        }
        shutdown.cancel();

        let stats = batcher.finish().await.unwrap();
        assert_eq!(stats.rows_discarded, 0);

        let mut rows = 0;
        while let Some(batch) = rx.recv().await {
            assert_eq!(batch.trigger, FlushTrigger::Shutdown);
            rows += batch.len();
        }
        assert_eq!(rows, 5);
        assert!(tx.send(event(99)).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_without_drain_discards() {
        let (batcher, tx, mut rx, shutdown) =
            spawn_batcher(100, Duration::from_secs(3600), false);
        for i in 0..5 {
            tx.send(event(i)).await.unwrap();
        }
        shutdown.cancel();

        let stats = batcher.finish().await.unwrap();
        assert_eq!(stats.rows_discarded, 5);
        assert_eq!(stats.flushes_triggered, 0);
        assert!(rx.recv().await.is_none());
    }
}
