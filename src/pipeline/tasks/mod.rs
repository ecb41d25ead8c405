//! Background stages of the pipeline.
//!
//! Each stage is a spawned task behind a small handle; `finish` waits for the
//! task and returns what it accomplished. Stages talk only through bounded
//! channels.

mod batching;
mod flush;
mod ingest;

pub(super) use batching::Batcher;
pub use flush::{FlushReport, FlushStats, FlushWorker};
pub(super) use flush::Flusher;
pub(super) use ingest::Ingester;
