//! Dead letter queue for failed flushes and rejected input.
//!
//! Failures are written as NDJSON to a configurable storage location for
//! later inspection and replay.
//!
//! - [`DeadLetterQueue`] buffers records and writes them to storage
//! - [`FailureTracker`] logs, counts, and forwards failures to the queue

mod queue;
mod tracker;
mod types;

pub use queue::DeadLetterQueue;
pub use tracker::FailureTracker;
pub use types::{FailureRecord, FailureStats};
