//! Per-flush monitoring summary.
//!
//! Groups a transformed batch by bucket and reports the count and mean
//! rounded amount of each, largest group first. Summaries are delivered to a
//! [`SummarySink`].

use arrow::array::AsArray;
use arrow::datatypes::Float64Type;
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

use crate::batch::FlushTrigger;
use crate::batch::encoder::AMOUNT_COLUMN;
use crate::emit;
use crate::error::{MonitorColumnSnafu, MonitorError};
use crate::metrics::events::BucketObserved;
use crate::transform::{BUCKET_COLUMN, Bucket, TransformedBatch};

/// One row of an [`AggregateSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSummary {
    pub bucket: String,
    pub count: u64,
    pub avg_amount: f64,
}

/// Bucket summaries ordered by count descending, then label ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSummary {
    pub rows: Vec<BucketSummary>,
}

impl AggregateSummary {
    pub fn get(&self, bucket: Bucket) -> Option<&BucketSummary> {
        self.rows.iter().find(|r| r.bucket == bucket.as_str())
    }

    /// Total number of rows summarized.
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for AggregateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<8} {:>10} {:>12}", "bucket", "n", "avg_amount")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<8} {:>10} {:>12.4}",
                row.bucket, row.count, row.avg_amount
            )?;
        }
        Ok(())
    }
}

/// Computes [`AggregateSummary`] values. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorAggregator;

impl MonitorAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize(&self, batch: &TransformedBatch) -> Result<AggregateSummary, MonitorError> {
        let rb = batch.record_batch();
        let buckets = rb
            .column_by_name(BUCKET_COLUMN)
            .and_then(|c| c.as_string_opt::<i32>())
            .context(MonitorColumnSnafu {
                name: BUCKET_COLUMN,
            })?;
        let amounts = rb
            .column_by_name(AMOUNT_COLUMN)
            .and_then(|c| c.as_primitive_opt::<Float64Type>())
            .context(MonitorColumnSnafu {
                name: AMOUNT_COLUMN,
            })?;

        let mut groups: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
        for (bucket, amount) in buckets.iter().zip(amounts.values().iter()) {
            let bucket = bucket.context(MonitorColumnSnafu {
                name: BUCKET_COLUMN,
            })?;
            let entry = groups.entry(bucket).or_default();
            entry.0 += 1;
            entry.1 += amount;
        }

        let mut rows: Vec<BucketSummary> = groups
            .into_iter()
            .map(|(bucket, (count, sum))| BucketSummary {
                bucket: bucket.to_string(),
                count,
                avg_amount: sum / count as f64,
            })
            .collect();
        // BTreeMap iteration is label-ascending; the stable sort keeps that
        // order among equal counts.
        rows.sort_by(|a, b| b.count.cmp(&a.count));

        Ok(AggregateSummary { rows })
    }
}

/// Flush metadata delivered alongside a summary.
#[derive(Debug, Clone, Copy)]
pub struct FlushInfo {
    pub flush_id: u64,
    pub trigger: FlushTrigger,
    pub rows: usize,
}

/// Destination for per-flush summaries.
pub trait SummarySink: Send + Sync {
    fn publish(&self, flush: &FlushInfo, summary: &AggregateSummary);
}

/// Logs each summary as a table.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSummarySink;

impl SummarySink for LogSummarySink {
    fn publish(&self, flush: &FlushInfo, summary: &AggregateSummary) {
        info!(
            flush_id = flush.flush_id,
            trigger = flush.trigger.as_str(),
            rows = flush.rows,
            "Flush summary\n{}",
            summary
        );
    }
}

/// Records each summary as per-bucket metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSummarySink;

impl SummarySink for MetricsSummarySink {
    fn publish(&self, _flush: &FlushInfo, summary: &AggregateSummary) {
        for row in &summary.rows {
            let Some(bucket) = Bucket::from_label(&row.bucket) else {
                continue;
            };
            emit!(BucketObserved {
                bucket: bucket.as_str(),
                count: row.count,
                avg_amount: row.avg_amount,
            });
        }
    }
}
