//! Failure tracking with DLQ integration.

use std::sync::Arc;
use tracing::{error, warn};

use crate::emit;
use crate::error::{FlushError, SourceError};
use crate::metrics::events::{EventsRejected, FlushFailed, RowsDropped};

use super::{DeadLetterQueue, FailureRecord};

/// Reports failed flushes and rejected events, and forwards them to the DLQ.
///
/// Failures never stop the pipeline; they are logged, counted, and recorded.
#[derive(Clone, Default)]
pub struct FailureTracker {
    dlq: Option<Arc<DeadLetterQueue>>,
}

impl FailureTracker {
    pub fn new(dlq: Option<Arc<DeadLetterQueue>>) -> Self {
        Self { dlq }
    }

    /// Report a flush that did not complete.
    pub async fn record_flush_failure(&self, err: &FlushError) {
        let stage = err.stage();
        error!(
            flush_id = err.flush_id(),
            rows = err.rows(),
            partitions = ?err.partitions(),
            stage = stage.as_str(),
            error = %snafu::Report::from_error(err),
            "Flush failed"
        );
        emit!(FlushFailed { stage });
        if err.rows_lost() {
            emit!(RowsDropped {
                count: err.rows() as u64
            });
        }

        if let Some(dlq) = &self.dlq {
            dlq.record(FailureRecord::from_flush_error(err)).await;
        }
    }

    /// Report an input record the source could not decode.
    pub async fn record_rejected_event(&self, err: &SourceError) {
        warn!(error = %err, "Rejected input event");
        emit!(EventsRejected { count: 1 });

        if let Some(dlq) = &self.dlq {
            dlq.record(FailureRecord::from_source_error(err)).await;
        }
    }

    /// Finalize the DLQ, logging any errors.
    pub async fn finalize_dlq(&self) {
        if let Some(dlq) = &self.dlq
            && let Err(e) = dlq.finalize().await
        {
            error!("Failed to finalize DLQ: {}", e);
        }
    }

    pub fn has_dlq(&self) -> bool {
        self.dlq.is_some()
    }
}
