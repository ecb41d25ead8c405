//! flurry: a continuous micro-batch ETL engine.
//!
//! Events are buffered until a size or age trigger fires, converted to Arrow,
//! enriched with a spend bucket, and appended to a Hive-partitioned Parquet
//! dataset. Every flush also produces a small per-bucket summary.
//!
//! # Example
//!
//! ```ignore
//! use flurry::error::{ConfigSnafu, PipelineError};
//! use flurry::{Config, run_pipeline};
//! use snafu::ResultExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("flurry.yaml").context(ConfigSnafu)?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Wrote {} rows", stats.rows_written);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod dlq;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use storage::{StorageProvider, StorageProviderRef};
