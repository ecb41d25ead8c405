//! Row-preserving derivation pass over columnar batches.
//!
//! Output columns, in order:
//! - `ts`: epoch seconds widened to `Timestamp(Microsecond, "UTC")`
//! - `user_id`: unchanged
//! - `region`: dictionary decoded to plain `Utf8`
//! - `amount`: widened to `Float64` and rounded to two decimals
//! - `sku`: unchanged
//! - `bucket`: `high` / `medium` / `low` derived from the unrounded amount

use arrow::array::{ArrayRef, AsArray, PrimitiveArray, RecordBatch, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int64Type, Schema, SchemaRef, TimeUnit,
    TimestampMicrosecondType,
};
use arrow::error::ArrowError;
use snafu::prelude::*;
use std::sync::{Arc, LazyLock};

use crate::batch::encoder::{AMOUNT_COLUMN, REGION_COLUMN, SKU_COLUMN, TS_COLUMN, USER_ID_COLUMN};
use crate::batch::{ColumnarBatch, columnar_schema};
use crate::error::{
    CastColumnSnafu, RowCountMismatchSnafu, SchemaMismatchSnafu, TransformColumnSnafu,
    TransformError,
};

pub const BUCKET_COLUMN: &str = "bucket";

/// Amounts strictly above this are `high`.
pub const HIGH_THRESHOLD: f64 = 80.0;
/// Amounts strictly above this (and not high) are `medium`.
pub const MEDIUM_THRESHOLD: f64 = 30.0;

static TRANSFORMED_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new(
            TS_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new(USER_ID_COLUMN, DataType::Int64, false),
        Field::new(REGION_COLUMN, DataType::Utf8, false),
        Field::new(AMOUNT_COLUMN, DataType::Float64, false),
        Field::new(SKU_COLUMN, DataType::Utf8, false),
        Field::new(BUCKET_COLUMN, DataType::Utf8, false),
    ]))
});

pub fn transformed_schema() -> SchemaRef {
    TRANSFORMED_SCHEMA.clone()
}

/// Spend category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    High,
    Medium,
    Low,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::High, Bucket::Medium, Bucket::Low];

    /// Classify an amount. Thresholds are exclusive: 80.0 is medium, 30.0 is low.
    pub fn for_amount(amount: f64) -> Self {
        if amount > HIGH_THRESHOLD {
            Bucket::High
        } else if amount > MEDIUM_THRESHOLD {
            Bucket::Medium
        } else {
            Bucket::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::High => "high",
            Bucket::Medium => "medium",
            Bucket::Low => "low",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Bucket::ALL.into_iter().find(|b| b.as_str() == label)
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round to two decimals, halves away from zero.
pub fn round_amount(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// A record batch guaranteed to carry [`transformed_schema`].
#[derive(Debug, Clone)]
pub struct TransformedBatch(RecordBatch);

impl TransformedBatch {
    pub fn try_new(batch: RecordBatch) -> Result<Self, TransformError> {
        ensure!(
            batch.schema() == transformed_schema(),
            SchemaMismatchSnafu {
                message: format!("unexpected output schema {:?}", batch.schema()),
            }
        );
        Ok(Self(batch))
    }

    pub fn num_rows(&self) -> usize {
        self.0.num_rows()
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.0
    }

    pub fn into_inner(self) -> RecordBatch {
        self.0
    }
}

/// Applies the derivation to columnar batches. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformEngine;

impl TransformEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn transform(&self, batch: &ColumnarBatch) -> Result<TransformedBatch, TransformError> {
        self.transform_record_batch(batch.record_batch())
    }

    /// Transform an arbitrary record batch, which must carry the columnar schema.
    pub fn transform_record_batch(
        &self,
        batch: &RecordBatch,
    ) -> Result<TransformedBatch, TransformError> {
        ensure!(
            batch.schema() == columnar_schema(),
            SchemaMismatchSnafu {
                message: format!(
                    "expected {:?}, got {:?}",
                    columnar_schema().fields(),
                    batch.schema().fields()
                ),
            }
        );

        let ts = seconds_to_micros(batch.column(0))?;
        let region = cast(batch.column(2), &DataType::Utf8).context(CastColumnSnafu {
            column: REGION_COLUMN,
        })?;
        let raw_amount = widened_amounts(batch.column(3))?;
        let bucket = StringArray::from_iter_values(
            raw_amount
                .values()
                .iter()
                .map(|&a| Bucket::for_amount(a).as_str()),
        );
        let amount = raw_amount.unary::<_, Float64Type>(round_amount);

        let columns: Vec<ArrayRef> = vec![
            Arc::new(ts),
            batch.column(1).clone(),
            region,
            Arc::new(amount),
            batch.column(4).clone(),
            Arc::new(bucket),
        ];

        let output =
            RecordBatch::try_new(transformed_schema(), columns).context(TransformColumnSnafu)?;
        ensure!(
            output.num_rows() == batch.num_rows(),
            RowCountMismatchSnafu {
                expected: batch.num_rows(),
                actual: output.num_rows(),
            }
        );

        TransformedBatch::try_new(output)
    }
}

fn seconds_to_micros(
    column: &ArrayRef,
) -> Result<PrimitiveArray<TimestampMicrosecondType>, TransformError> {
    let seconds = column
        .as_primitive_opt::<Int64Type>()
        .context(SchemaMismatchSnafu {
            message: "ts is not Int64",
        })?;

    let micros = seconds
        .try_unary::<_, TimestampMicrosecondType, _>(|s| {
            s.checked_mul(1_000_000).ok_or_else(|| {
                ArrowError::ComputeError(format!("timestamp {s} overflows microseconds"))
            })
        })
        .context(CastColumnSnafu { column: TS_COLUMN })?;

    Ok(micros.with_timezone("UTC"))
}

fn widened_amounts(column: &ArrayRef) -> Result<PrimitiveArray<Float64Type>, TransformError> {
    let amounts = column
        .as_primitive_opt::<Float32Type>()
        .context(SchemaMismatchSnafu {
            message: "amount is not Float32",
        })?;
    Ok(amounts.unary::<_, Float64Type>(f64::from))
}
