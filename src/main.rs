//! flurry: continuous micro-batch ETL from an event stream to a partitioned
//! Parquet dataset.

use clap::Parser;
use snafu::prelude::*;
use tracing::{debug, info};

use flurry::config::CliArgs;
use flurry::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use flurry::logging::init_tracing;
use flurry::{metrics, run_pipeline};

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = CliArgs::parse();

    init_tracing(&args.log_level);
    info!("flurry starting");

    let config = args.load_config().context(ConfigSnafu)?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Source: {:?} ({})", config.source.kind, config.source.path.as_deref().unwrap_or("-"));
        info!("Sink: {} ({:?})", config.sink.path, config.sink.compression);
        info!(
            "Flush policy: {} rows or {}s",
            config.batch.max_rows, config.batch.checkpoint_secs
        );
        if let Ok(yaml) = serde_yaml::to_string(&config) {
            debug!("Effective configuration:\n{}", yaml);
        }
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline completed successfully");
    info!("  Events received: {}", stats.events_received);
    info!("  Events rejected: {}", stats.events_rejected);
    info!(
        "  Flushes: {} completed, {} failed",
        stats.flushes_completed, stats.flushes_failed
    );
    info!("  Rows written: {}", stats.rows_written);
    info!("  Rows dropped: {}", stats.rows_dropped);
    info!("  Parquet files written: {}", stats.files_written);
    info!("  Bytes written: {}", stats.bytes_written);

    Ok(())
}
