//! flurry benchmark suite.
//!
//! Benchmarks for the flush path:
//! - columnar encoding and transform throughput
//! - per-flush summary aggregation
//! - Parquet encoding and partitioned writes

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;


use flurry::batch::ColumnarEncoder;
use flurry::config::ParquetCompression;
use flurry::monitor::MonitorAggregator;
use flurry::sink::parquet::ParquetEncoder;
use flurry::sink::{PartitionedWriter, WriterConfig};
use flurry::storage::StorageProvider;
use flurry::transform::TransformEngine;

/// Event batch to Arrow, then Arrow to the enriched schema.
fn encode_transform_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_transform");
    let encoder = ColumnarEncoder::default();
    let engine = TransformEngine::new();

    for size in [1_000, 10_000, 50_000] {
        let batch = bench_utils::generate_batch(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &batch, |b, batch| {
            b.iter(|| encoder.encode(batch).unwrap());
        });

        let columnar = encoder.encode(&batch).unwrap();
        group.bench_with_input(
            BenchmarkId::new("transform", size),
            &columnar,
            |b, columnar| {
                b.iter(|| engine.transform(columnar).unwrap());
            },
        );
    }

    group.finish();
}

fn summarize_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("summarize");
    let aggregator = MonitorAggregator::new();

    for size in [1_000, 50_000] {
        let columnar = ColumnarEncoder::default()
            .encode(&bench_utils::generate_batch(size))
            .unwrap();
        let transformed = TransformEngine::new().transform(&columnar).unwrap();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &transformed, |b, t| {
            b.iter(|| aggregator.summarize(t).unwrap());
        });
    }

    group.finish();
}

/// Parquet encoding per codec, and a full partitioned write to memory.
fn parquet_writing_benchmarks(c: &mut Criterion) {
    use tokio::runtime::Runtime;

    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("parquet_writing");
    let size = 50_000;

    let columnar = ColumnarEncoder::default()
        .encode(&bench_utils::generate_batch(size))
        .unwrap();
    let transformed = TransformEngine::new().transform(&columnar).unwrap();
    group.throughput(Throughput::Elements(size as u64));

    for compression in [
        ParquetCompression::Uncompressed,
        ParquetCompression::Snappy,
        ParquetCompression::Zstd,
    ] {
        let encoder = ParquetEncoder::new(compression);
        group.bench_function(BenchmarkId::new("encode", format!("{compression:?}")), |b| {
            b.iter(|| encoder.encode(transformed.record_batch()).unwrap());
        });
    }

    group.bench_function("partitioned_write", |b| {
        b.to_async(&rt).iter(|| {
            let batch = transformed.clone();
            async move {
                let storage = Arc::new(StorageProvider::in_memory());
                let mut writer = PartitionedWriter::new(storage, WriterConfig::default());
                writer.write(&batch).await.unwrap()
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    encode_transform_benchmarks,
    summarize_benchmarks,
    parquet_writing_benchmarks,
);
criterion_main!(benches);
