//! Ingest stage: pulls events from the source into the event queue.

use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dlq::FailureTracker;
use crate::emit;
use crate::error::{PipelineError, SourceError, TaskJoinSnafu};
use crate::metrics::events::EventsReceived;
use crate::source::{Event, EventSource};

/// What the ingest stage did before it stopped.
#[derive(Debug, Default)]
pub(in crate::pipeline) struct IngestOutcome {
    pub received: u64,
    pub rejected: u64,
    /// Set when the source failed in a way ingestion cannot recover from.
    pub error: Option<SourceError>,
}

/// Handle to the background ingest task.
pub(in crate::pipeline) struct Ingester {
    handle: JoinHandle<IngestOutcome>,
}

impl Ingester {
    pub fn spawn(
        source: Box<dyn EventSource>,
        events: mpsc::Sender<Event>,
        shutdown: CancellationToken,
        failures: FailureTracker,
    ) -> Self {
        let handle = tokio::spawn(Self::run(source, events, shutdown, failures));
        Self { handle }
    }

    pub async fn finish(self) -> Result<IngestOutcome, PipelineError> {
        self.handle.await.context(TaskJoinSnafu)
    }

    /// Dropping `events` on return is what tells the batching stage that the
    /// source is done.
    async fn run(
        mut source: Box<dyn EventSource>,
        events: mpsc::Sender<Event>,
        shutdown: CancellationToken,
        failures: FailureTracker,
    ) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        info!(source = %source.describe(), "Ingestion started");

        loop {
            let next = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping ingestion");
                    break;
                }

                next = source.next_event() => next,
            };

            match next {
                Ok(Some(event)) => {
                    outcome.received += 1;
                    emit!(EventsReceived { count: 1 });
                    if events.send(event).await.is_err() {
                        debug!("Event queue closed, stopping ingestion");
                        break;
                    }
                }
                Ok(None) => {
                    info!(received = outcome.received, "Source exhausted");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    outcome.rejected += 1;
                    failures.record_rejected_event(&e).await;
                }
                Err(e) => {
                    error!(error = %snafu::Report::from_error(&e), "Source failed, stopping ingestion");
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct ScriptedSource {
        steps: VecDeque<Result<Option<Event>, SourceError>>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
            self.steps.pop_front().unwrap_or(Ok(None))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn event(user_id: i64) -> Event {
        Event {
            timestamp: 1_700_000_000,
            user_id,
            region: "eu".to_string(),
            amount: 12.5,
            sku: "AB12CD34".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ingest_skips_decode_errors() {
        let source = ScriptedSource {
            steps: VecDeque::from(vec![
                Ok(Some(event(1))),
                Err(SourceError::Decode {
                    line: 2,
                    message: "bad".to_string(),
                }),
                Ok(Some(event(3))),
            ]),
        };
        let (tx, mut rx) = mpsc::channel(8);
        let ingester = Ingester::spawn(
            Box::new(source),
            tx,
            CancellationToken::new(),
            FailureTracker::default(),
        );

        let outcome = ingester.finish().await.unwrap();
        assert_eq!(outcome.received, 2);
        assert_eq!(outcome.rejected, 1);
        assert!(outcome.error.is_none());

        assert_eq!(rx.recv().await.unwrap().user_id, 1);
        assert_eq!(rx.recv().await.unwrap().user_id, 3);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ingest_stops_on_fatal_error() {
        let source = ScriptedSource {
            steps: VecDeque::from(vec![
                Ok(Some(event(1))),
                Err(SourceError::ReadInput {
                    source: std::io::Error::other("disk gone"),
                }),
                Ok(Some(event(3))),
            ]),
        };
        let (tx, _rx) = mpsc::channel(8);
        let ingester = Ingester::spawn(
            Box::new(source),
            tx,
            CancellationToken::new(),
            FailureTracker::default(),
        );

        let outcome = ingester.finish().await.unwrap();
        assert_eq!(outcome.received, 1);
        assert!(matches!(outcome.error, Some(SourceError::ReadInput { .. })));
    }

    #[tokio::test]
    async fn test_ingest_stops_on_shutdown() {
        let source = ScriptedSource {
            steps: VecDeque::from(vec![Ok(Some(event(1)))]),
        };
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (tx, _rx) = mpsc::channel(8);
        let ingester = Ingester::spawn(Box::new(source), tx, shutdown, FailureTracker::default());

        let outcome = ingester.finish().await.unwrap();
        assert_eq!(outcome.received, 0);
    }
}
