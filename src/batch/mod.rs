//! Event batching.
//!
//! - `accumulator`: buffers events and decides when to flush
//! - `encoder`: projects a flushed batch into an Arrow record batch

pub mod accumulator;
pub mod encoder;

use std::collections::BTreeSet;

use crate::source::Event;

pub use accumulator::{BatchAccumulator, FlushPolicy};
pub use encoder::{ColumnarBatch, ColumnarEncoder, columnar_schema};

/// Why a batch was handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The buffer reached `max_rows`.
    Size,
    /// `max_age` elapsed since the last flush.
    Age,
    /// The pipeline is stopping.
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Age => "age",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered, non-empty run of events taken from the accumulator.
#[derive(Debug, Clone)]
pub struct Batch {
    pub flush_id: u64,
    pub trigger: FlushTrigger,
    pub events: Vec<Event>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct regions in the batch, sorted.
    pub fn regions(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|e| e.region.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}
