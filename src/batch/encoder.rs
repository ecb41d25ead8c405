//! Columnar encoding of event batches.
//!
//! Projects each event field into its own Arrow builder, preserving row order.
//! `region` is dictionary-encoded since it has very few distinct values, and
//! `amount` is narrowed to 32-bit float.

use arrow::array::{
    ArrayRef, Float32Builder, Int64Builder, RecordBatch, StringBuilder, StringDictionaryBuilder,
};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use snafu::prelude::*;
use std::sync::{Arc, LazyLock};

use super::Batch;
use crate::config::DEFAULT_SKU_LENGTH;
use crate::error::{EmptyBatchSnafu, EncodeColumnSnafu, EncodeError, MalformedEventSnafu};
use crate::source::Event;

pub const TS_COLUMN: &str = "ts";
pub const USER_ID_COLUMN: &str = "user_id";
pub const REGION_COLUMN: &str = "region";
pub const AMOUNT_COLUMN: &str = "amount";
pub const SKU_COLUMN: &str = "sku";

static COLUMNAR_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new(TS_COLUMN, DataType::Int64, false),
        Field::new(USER_ID_COLUMN, DataType::Int64, false),
        Field::new(
            REGION_COLUMN,
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            false,
        ),
        Field::new(AMOUNT_COLUMN, DataType::Float32, false),
        Field::new(SKU_COLUMN, DataType::Utf8, false),
    ]))
});

/// Schema of every [`ColumnarBatch`]: `ts`, `user_id`, `region`, `amount`, `sku`.
pub fn columnar_schema() -> SchemaRef {
    COLUMNAR_SCHEMA.clone()
}

/// A record batch guaranteed to carry [`columnar_schema`].
#[derive(Debug, Clone)]
pub struct ColumnarBatch(RecordBatch);

impl ColumnarBatch {
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

/// Converts batches of events into [`ColumnarBatch`]es.
///
/// Any malformed event rejects the whole batch; no partial batch is produced.
#[derive(Debug, Clone)]
pub struct ColumnarEncoder {
    sku_length: usize,
}

impl Default for ColumnarEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_SKU_LENGTH)
    }
}

impl ColumnarEncoder {
    pub fn new(sku_length: usize) -> Self {
        Self { sku_length }
    }

    pub fn encode(&self, batch: &Batch) -> Result<ColumnarBatch, EncodeError> {
        self.encode_events(&batch.events)
    }

    pub fn encode_events(&self, events: &[Event]) -> Result<ColumnarBatch, EncodeError> {
        ensure!(!events.is_empty(), EmptyBatchSnafu);

        let rows = events.len();
        let mut ts = Int64Builder::with_capacity(rows);
        let mut user_id = Int64Builder::with_capacity(rows);
        let mut region = StringDictionaryBuilder::<Int32Type>::new();
        let mut amount = Float32Builder::with_capacity(rows);
        let mut sku = StringBuilder::with_capacity(rows, rows * self.sku_length);

        for (row, event) in events.iter().enumerate() {
            self.validate(row, event)?;

            ts.append_value(event.timestamp);
            user_id.append_value(event.user_id);
            region.append(&event.region).context(EncodeColumnSnafu)?;
            amount.append_value(event.amount as f32);
            sku.append_value(&event.sku);
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(ts.finish()),
            Arc::new(user_id.finish()),
            Arc::new(region.finish()),
            Arc::new(amount.finish()),
            Arc::new(sku.finish()),
        ];

        let batch = RecordBatch::try_new(columnar_schema(), columns).context(EncodeColumnSnafu)?;
        Ok(ColumnarBatch(batch))
    }

    fn validate(&self, row: usize, event: &Event) -> Result<(), EncodeError> {
        ensure!(
            !event.region.is_empty(),
            MalformedEventSnafu {
                row,
                field: REGION_COLUMN,
                reason: "is empty",
            }
        );
        // The region becomes a directory name.
        ensure!(
            event
                .region
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            MalformedEventSnafu {
                row,
                field: REGION_COLUMN,
                reason: format!("'{}' contains characters outside [A-Za-z0-9_-]", event.region),
            }
        );
        ensure!(
            event.sku.len() == self.sku_length,
            MalformedEventSnafu {
                row,
                field: SKU_COLUMN,
                reason: format!(
                    "has length {} (expected {})",
                    event.sku.len(),
                    self.sku_length
                ),
            }
        );
        ensure!(
            event.sku.chars().all(|c| c.is_ascii_alphanumeric()),
            MalformedEventSnafu {
                row,
                field: SKU_COLUMN,
                reason: format!("'{}' is not alphanumeric", event.sku),
            }
        );
        ensure!(
            event.amount.is_finite() && event.amount.abs() <= f32::MAX as f64,
            MalformedEventSnafu {
                row,
                field: AMOUNT_COLUMN,
                reason: format!("{} is not representable as a 32-bit float", event.amount),
            }
        );
        ensure!(
            event.timestamp.checked_mul(1_000_000).is_some(),
            MalformedEventSnafu {
                row,
                field: TS_COLUMN,
                reason: format!("{} overflows a microsecond timestamp", event.timestamp),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FlushTrigger;
    use arrow::array::{AsArray, DictionaryArray, Float32Array, Int64Array, StringArray};

    fn event(region: &str, amount: f64) -> Event {
        Event {
            timestamp: 1_700_000_000,
            user_id: 7,
            region: region.to_string(),
            amount,
            sku: "AB12CD34".to_string(),
        }
    }

    fn batch(events: Vec<Event>) -> Batch {
        Batch {
            flush_id: 1,
            trigger: FlushTrigger::Size,
            events,
        }
    }

    #[test]
    fn test_encode_schema_and_values() {
        let encoder = ColumnarEncoder::default();
        let encoded = encoder
            .encode(&batch(vec![
                event("eu", 12.5),
                event("us", 99.99),
                event("eu", 0.0),
            ]))
            .unwrap();

        let rb = encoded.record_batch();
        assert_eq!(rb.schema(), columnar_schema());
        assert_eq!(rb.num_rows(), 3);

        let ts = rb.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ts.value(0), 1_700_000_000);

        let region = rb
            .column(2)
            .as_any()
            .downcast_ref::<DictionaryArray<Int32Type>>()
            .unwrap();
        // Two distinct values, three keys.
        assert_eq!(region.values().len(), 2);
        let values = region.values().as_string::<i32>();
        let decoded: Vec<&str> = region
            .keys()
            .iter()
            .map(|k| values.value(k.unwrap() as usize))
            .collect();
        assert_eq!(decoded, vec!["eu", "us", "eu"]);

        let amount = rb.column(3).as_any().downcast_ref::<Float32Array>().unwrap();
        assert_eq!(amount.value(1), 99.99_f32);

        let sku = rb.column(4).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(sku.value(2), "AB12CD34");
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err = ColumnarEncoder::default().encode_events(&[]).unwrap_err();
        assert!(matches!(err, EncodeError::EmptyBatch));
    }

    #[test]
    fn test_malformed_sku_rejects_whole_batch() {
        let mut bad = event("eu", 1.0);
        bad.sku = "SHORT".to_string();

        let err = ColumnarEncoder::default()
            .encode_events(&[event("us", 2.0), bad])
            .unwrap_err();
        match err {
            EncodeError::MalformedEvent { row, field, .. } => {
                assert_eq!(row, 1);
                assert_eq!(field, SKU_COLUMN);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_alphanumeric_sku_rejected() {
        let mut bad = event("eu", 1.0);
        bad.sku = "AB12-D34".to_string();
        assert!(matches!(
            ColumnarEncoder::default().encode_events(&[bad]),
            Err(EncodeError::MalformedEvent { field: SKU_COLUMN, .. })
        ));
    }

    #[test]
    fn test_custom_sku_length() {
        let mut long = event("eu", 1.0);
        long.sku = "ABCDEF123456".to_string();
        assert!(ColumnarEncoder::new(12).encode_events(&[long.clone()]).is_ok());
        assert!(ColumnarEncoder::new(8).encode_events(&[long]).is_err());
    }

    #[test]
    fn test_region_validation() {
        let encoder = ColumnarEncoder::default();
        assert!(matches!(
            encoder.encode_events(&[event("", 1.0)]),
            Err(EncodeError::MalformedEvent { field: REGION_COLUMN, .. })
        ));
        assert!(matches!(
            encoder.encode_events(&[event("eu/west", 1.0)]),
            Err(EncodeError::MalformedEvent { field: REGION_COLUMN, .. })
        ));
        assert!(encoder.encode_events(&[event("eu-west_1", 1.0)]).is_ok());
    }

    #[test]
    fn test_amount_must_fit_f32() {
        let encoder = ColumnarEncoder::default();
        for amount in [f64::NAN, f64::INFINITY, 1e39] {
            assert!(matches!(
                encoder.encode_events(&[event("eu", amount)]),
                Err(EncodeError::MalformedEvent { field: AMOUNT_COLUMN, .. })
            ));
        }
    }

    #[test]
    fn test_timestamp_overflow_rejected() {
        let mut bad = event("eu", 1.0);
        bad.timestamp = i64::MAX / 10;
        assert!(matches!(
            ColumnarEncoder::default().encode_events(&[bad]),
            Err(EncodeError::MalformedEvent { field: TS_COLUMN, .. })
        ));
    }
}
