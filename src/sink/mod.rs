//! Partitioned Parquet sink.
//!
//! - `partition`: directory layout, file naming, index allocation
//! - `parquet`: in-memory Parquet encoding
//! - `writer`: appends transformed batches to the dataset

pub mod parquet;
pub mod partition;
pub mod writer;

pub use partition::{FileSequencer, PartitionDescriptor, hour_bucket};
pub use writer::{PartitionedWriter, WriterConfig, WrittenFile};
