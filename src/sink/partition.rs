//! Hive-style partition layout and file naming.
//!
//! Files live at `region=<value>/events-<YYYY-MM-DD-HH>-<index>.parquet`.
//! The hour is taken in UTC at write time. Within one `(region, hour)` the
//! index only ever grows; the [`FileSequencer`] hands out indexes and is
//! seeded from what is already in storage so restarts continue the sequence.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::batch::encoder::REGION_COLUMN;

/// Column the dataset is partitioned by.
pub const PARTITION_COLUMN: &str = REGION_COLUMN;
/// strftime format of the hour component of file names.
pub const HOUR_FORMAT: &str = "%Y-%m-%d-%H";
pub const FILE_PREFIX: &str = "events";
pub const FILE_EXTENSION: &str = "parquet";

/// The hour bucket a write at `now` lands in.
pub fn hour_bucket(now: DateTime<Utc>) -> String {
    now.format(HOUR_FORMAT).to_string()
}

/// Location of one file in the partitioned dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub column: &'static str,
    pub value: String,
    pub hour: String,
    pub index: u64,
}

impl PartitionDescriptor {
    pub fn new(value: impl Into<String>, hour: impl Into<String>, index: u64) -> Self {
        Self {
            column: PARTITION_COLUMN,
            value: value.into(),
            hour: hour.into(),
            index,
        }
    }

    /// `region=<value>`
    pub fn directory(&self) -> String {
        partition_directory(&self.value)
    }

    /// `events-<hour>-<index>.parquet`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            FILE_PREFIX, self.hour, self.index, FILE_EXTENSION
        )
    }

    /// Path relative to the dataset root.
    pub fn path(&self) -> String {
        format!("{}/{}", self.directory(), self.file_name())
    }
}

pub fn partition_directory(value: &str) -> String {
    format!("{}={}", PARTITION_COLUMN, value)
}

/// Extract the index from a file name written for `hour`, if it is one of ours.
pub fn parse_index(file_name: &str, hour: &str) -> Option<u64> {
    file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_prefix('-')?
        .strip_prefix(hour)?
        .strip_prefix('-')?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// Allocates file indexes per partition for the current hour.
#[derive(Debug, Default)]
pub struct FileSequencer {
    hour: Option<String>,
    next: HashMap<String, u64>,
}

impl FileSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `hour`, forgetting all counters if it changed.
    pub fn roll_hour(&mut self, hour: &str) {
        if self.hour.as_deref() != Some(hour) {
            self.hour = Some(hour.to_string());
            self.next.clear();
        }
    }

    pub fn is_seeded(&self, partition: &str) -> bool {
        self.next.contains_key(partition)
    }

    /// Start the counter for `partition` at `next_index`.
    pub fn seed(&mut self, partition: &str, next_index: u64) {
        self.next.insert(partition.to_string(), next_index);
    }

    /// Hand out the next index for `partition`.
    pub fn allocate(&mut self, partition: &str) -> u64 {
        let next = self.next.entry(partition.to_string()).or_insert(0);
        let index = *next;
        *next += 1;
        index
    }

    /// Record that `index` is taken, so it is never handed out again.
    pub fn observe(&mut self, partition: &str, index: u64) {
        let next = self.next.entry(partition.to_string()).or_insert(0);
        *next = (*next).max(index + 1);
    }
}
