//! Partitioned dataset writer.
//!
//! Appends each transformed batch to the dataset as one new Parquet file per
//! region present in the batch. Existing files are never modified: every put
//! uses create-if-absent semantics, and a name collision (for example with a
//! second writer sharing the directory) moves on to the next index.
//!
//! A flush either lands completely or not at all, as far as this writer can
//! arrange: if any partition fails, the files already committed by the same
//! flush are deleted again before the error is returned.

use arrow::array::{AsArray, RecordBatch, UInt64Array};
use arrow::compute::take_record_batch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ParquetCompression, SinkConfig};
use crate::emit;
use crate::error::{
    EncodeTaskSnafu, ListExistingSnafu, MissingColumnSnafu, ParquetEncodeSnafu,
    PartitionSplitSnafu, PutFileSnafu, SequenceExhaustedSnafu, WriteError,
};
use crate::metrics::events::{FileNameCollision, ParquetFileWritten, RowsWritten};
use crate::storage::StorageProviderRef;
use crate::transform::TransformedBatch;

use super::parquet::ParquetEncoder;
use super::partition::{
    FileSequencer, PARTITION_COLUMN, PartitionDescriptor, hour_bucket, parse_index,
    partition_directory,
};

/// Writer tuning.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub compression: ParquetCompression,
    /// Partitions written concurrently within one flush.
    pub max_concurrent_writes: usize,
    /// Names tried per partition before giving up on collisions.
    pub max_put_attempts: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: ParquetCompression::default(),
            max_concurrent_writes: 4,
            max_put_attempts: 16,
        }
    }
}

impl From<&SinkConfig> for WriterConfig {
    fn from(config: &SinkConfig) -> Self {
        Self {
            compression: config.compression,
            max_concurrent_writes: config.max_concurrent_writes.max(1),
            ..Default::default()
        }
    }
}

/// A file committed to the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// Path relative to the dataset root.
    pub path: String,
    pub partition: String,
    pub hour: String,
    pub index: u64,
    pub rows: usize,
    pub bytes: u64,
}

/// One partition of a flush, encoded and waiting for storage.
struct PendingFile {
    partition: String,
    rows: usize,
    bytes: Bytes,
    index: u64,
}

struct PutOutcome {
    partition: String,
    last_index: u64,
    result: Result<WrittenFile, WriteError>,
}

/// Appends transformed batches to a region-partitioned Parquet dataset.
pub struct PartitionedWriter {
    storage: StorageProviderRef,
    encoder: ParquetEncoder,
    sequencer: FileSequencer,
    config: WriterConfig,
}

impl PartitionedWriter {
    pub fn new(storage: StorageProviderRef, config: WriterConfig) -> Self {
        Self {
            storage,
            encoder: ParquetEncoder::new(config.compression),
            sequencer: FileSequencer::new(),
            config,
        }
    }

    pub fn storage(&self) -> &StorageProviderRef {
        &self.storage
    }

    /// Append `batch`, naming files after the current UTC hour.
    pub async fn write(&mut self, batch: &TransformedBatch) -> Result<Vec<WrittenFile>, WriteError> {
        self.write_at(batch, Utc::now()).await
    }

    /// Append `batch` as if written at `now`.
    pub async fn write_at(
        &mut self,
        batch: &TransformedBatch,
        now: DateTime<Utc>,
    ) -> Result<Vec<WrittenFile>, WriteError> {
        let hour = hour_bucket(now);
        self.sequencer.roll_hour(&hour);

        let partitions = split_by_partition(batch.record_batch())?;
        let encoded = self.encode_partitions(partitions).await?;

        let mut pending = Vec::with_capacity(encoded.len());
        for (partition, rows, bytes) in encoded {
            if !self.sequencer.is_seeded(&partition) {
                let next = self.next_index_in_storage(&partition, &hour).await?;
                debug!(partition = %partition, hour = %hour, next, "Seeded file sequence");
                self.sequencer.seed(&partition, next);
            }
            let index = self.sequencer.allocate(&partition);
            pending.push(PendingFile {
                partition,
                rows,
                bytes,
                index,
            });
        }

        let outcomes: Vec<PutOutcome> = stream::iter(pending)
            .map(|file| put_file(&self.storage, file, &hour, self.config.max_put_attempts))
            .buffer_unordered(self.config.max_concurrent_writes)
            .collect()
            .await;

        let mut written = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            self.sequencer.observe(&outcome.partition, outcome.last_index);
            match outcome.result {
                Ok(file) => written.push(file),
                Err(e) => failures.push((outcome.partition, e)),
            }
        }

        if !failures.is_empty() {
            self.rollback(&written).await;
            failures.sort_by(|a, b| a.0.cmp(&b.0));
            let (partition, error) = failures.swap_remove(0);
            warn!(
                partition = %partition,
                failed = failures.len() + 1,
                rolled_back = written.len(),
                "Partition write failed"
            );
            return Err(error);
        }

        written.sort_by(|a, b| a.partition.cmp(&b.partition));
        for file in &written {
            emit!(RowsWritten {
                partition: file.partition.clone(),
                count: file.rows as u64,
            });
        }
        info!(
            files = written.len(),
            rows = batch.num_rows(),
            hour = %hour,
            "Appended batch to dataset"
        );
        Ok(written)
    }

    /// Encode every partition on the blocking pool. Nothing is written if any
    /// partition fails to encode.
    async fn encode_partitions(
        &self,
        partitions: Vec<(String, RecordBatch)>,
    ) -> Result<Vec<(String, usize, Bytes)>, WriteError> {
        let encoder = self.encoder.clone();
        tokio::task::spawn_blocking(move || {
            partitions
                .into_iter()
                .map(|(partition, batch)| {
                    let bytes = encoder
                        .encode(&batch)
                        .context(ParquetEncodeSnafu { partition: &partition })?;
                    Ok((partition, batch.num_rows(), bytes))
                })
                .collect::<Result<Vec<_>, WriteError>>()
        })
        .await
        .context(EncodeTaskSnafu)?
    }

    /// One past the largest index already stored for `partition` in `hour`.
    async fn next_index_in_storage(&self, partition: &str, hour: &str) -> Result<u64, WriteError> {
        let existing = self
            .storage
            .list_with_prefix(&partition_directory(partition))
            .await
            .context(ListExistingSnafu { partition })?;

        Ok(existing
            .iter()
            .filter_map(|path| parse_index(path.rsplit('/').next().unwrap_or(path), hour))
            .max()
            .map_or(0, |max| max + 1))
    }

    async fn rollback(&self, written: &[WrittenFile]) {
        for file in written {
            if let Err(e) = self.storage.delete(&file.path).await {
                warn!(path = %file.path, error = %e, "Failed to roll back file");
            } else {
                debug!(path = %file.path, "Rolled back file");
            }
        }
    }
}

/// Split rows by partition value, in sorted partition order, keeping row
/// order within each partition. The partition column is dropped.
fn split_by_partition(batch: &RecordBatch) -> Result<Vec<(String, RecordBatch)>, WriteError> {
    let schema = batch.schema();
    let (column_index, _) = schema
        .column_with_name(PARTITION_COLUMN)
        .context(MissingColumnSnafu {
            name: PARTITION_COLUMN,
        })?;
    let values = batch
        .column(column_index)
        .as_string_opt::<i32>()
        .context(MissingColumnSnafu {
            name: PARTITION_COLUMN,
        })?;

    let mut rows: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for (row, value) in values.iter().enumerate() {
        let value = value.context(MissingColumnSnafu {
            name: PARTITION_COLUMN,
        })?;
        rows.entry(value).or_default().push(row as u64);
    }

    let keep: Vec<usize> = (0..schema.fields().len())
        .filter(|&i| i != column_index)
        .collect();
    let projected = batch.project(&keep).context(PartitionSplitSnafu {
        partition: PARTITION_COLUMN,
    })?;

    if rows.len() == 1
        && let Some(value) = rows.keys().next()
    {
        return Ok(vec![(value.to_string(), projected)]);
    }

    rows.into_iter()
        .map(|(value, indices)| {
            let indices = UInt64Array::from(indices);
            let part = take_record_batch(&projected, &indices)
                .context(PartitionSplitSnafu { partition: value })?;
            Ok((value.to_string(), part))
        })
        .collect()
}

async fn put_file(
    storage: &StorageProviderRef,
    file: PendingFile,
    hour: &str,
    max_attempts: usize,
) -> PutOutcome {
    let mut index = file.index;

    for attempt in 1..=max_attempts {
        let descriptor = PartitionDescriptor::new(&file.partition, hour, index);
        let path = descriptor.path();
        let start = Instant::now();

        match storage.put_if_absent(&path, file.bytes.clone()).await {
            Err(e) if e.is_already_exists() => {
                warn!(path = %path, attempt, "File already exists, advancing index");
                emit!(FileNameCollision);
                if attempt < max_attempts {
                    index += 1;
                }
            }
            result => {
                let result = result.context(PutFileSnafu { path: &path }).map(|()| {
                    emit!(ParquetFileWritten {
                        bytes: file.bytes.len() as u64,
                        duration: start.elapsed(),
                    });
                    debug!(path = %path, rows = file.rows, bytes = file.bytes.len(), "Wrote file");
                    WrittenFile {
                        path: path.clone(),
                        partition: file.partition.clone(),
                        hour: hour.to_string(),
                        index,
                        rows: file.rows,
                        bytes: file.bytes.len() as u64,
                    }
                });
                return PutOutcome {
                    partition: file.partition,
                    last_index: index,
                    result,
                };
            }
        }
    }

    PutOutcome {
        result: SequenceExhaustedSnafu {
            partition: &file.partition,
            hour,
            attempts: max_attempts,
        }
        .fail(),
        partition: file.partition,
        last_index: index,
    }
}
