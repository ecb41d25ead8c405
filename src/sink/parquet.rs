//! In-memory Parquet encoding.
//!
//! Each partition of a flush becomes exactly one file, so the whole file is
//! encoded into a buffer before anything touches storage.

use arrow::array::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;

use crate::config::ParquetCompression;

/// Encodes record batches into complete Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetEncoder {
    properties: WriterProperties,
}

impl Default for ParquetEncoder {
    fn default() -> Self {
        Self::new(ParquetCompression::default())
    }
}

impl ParquetEncoder {
    pub fn new(compression: ParquetCompression) -> Self {
        Self {
            properties: writer_properties(compression),
        }
    }

    pub fn encode(&self, batch: &RecordBatch) -> Result<Bytes, ParquetError> {
        let mut buffer = Vec::new();
        let mut writer =
            ArrowWriter::try_new(&mut buffer, batch.schema(), Some(self.properties.clone()))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(Bytes::from(buffer))
    }
}

fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    let codec = match compression {
        ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
        ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
    };

    WriterProperties::builder().set_compression(codec).build()
}
