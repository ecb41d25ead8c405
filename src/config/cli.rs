//! Command-line arguments.
//!
//! Flags override values from the configuration file; the batching and
//! output flags also fall back to environment variables.

use clap::Parser;
use std::path::PathBuf;

use crate::error::ConfigError;

use super::{Config, SourceKind};

/// Continuous micro-batch ETL: buffer events, derive a bucket column, and
/// append them to a region-partitioned Parquet dataset.
#[derive(Parser, Debug)]
#[command(name = "flurry")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Flush once this many events are buffered.
    #[arg(long, env = "BATCH_ROWS")]
    pub batch_rows: Option<usize>,

    /// Flush once this many seconds have passed since the last flush.
    #[arg(long, env = "CHECKPOINT_SECONDS")]
    pub checkpoint_seconds: Option<u64>,

    /// Root of the output dataset (local path or storage URL).
    #[arg(short, long, env = "OUTPUT_PATH")]
    pub output: Option<String>,

    /// Event source to read from.
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// NDJSON input file ("-" for stdin).
    #[arg(long)]
    pub input: Option<String>,

    /// Stop after this many events.
    #[arg(long)]
    pub limit: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Load the configuration file (if any), apply flag overrides, and validate.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::read_file(path)?,
            None => Config::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if let Some(rows) = self.batch_rows {
            config.batch.max_rows = rows;
        }
        if let Some(secs) = self.checkpoint_seconds {
            config.batch.checkpoint_secs = secs;
        }
        if let Some(output) = &self.output {
            config.sink.path = output.clone();
        }
        if let Some(kind) = self.source {
            config.source.kind = kind;
        }
        if let Some(input) = &self.input {
            config.source.path = Some(input.clone());
            // An input file only makes sense for the NDJSON source.
            if self.source.is_none() {
                config.source.kind = SourceKind::Ndjson;
            }
        }
        if let Some(limit) = self.limit {
            config.source.limit = Some(limit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_defaults() {
        let args = CliArgs::try_parse_from([
            "flurry",
            "--batch-rows",
            "500",
            "--checkpoint-seconds",
            "3",
            "--output",
            "/tmp/out",
            "--limit",
            "10",
        ])
        .unwrap();

        let config = args.load_config().unwrap();
        assert_eq!(config.batch.max_rows, 500);
        assert_eq!(config.batch.checkpoint_secs, 3);
        assert_eq!(config.sink.path, "/tmp/out");
        assert_eq!(config.source.limit, Some(10));
        assert_eq!(config.source.kind, SourceKind::Synthetic);
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batch:\n  max_rows: 0\n  checkpoint_secs: 9").unwrap();

        let args = CliArgs::try_parse_from([
            "flurry",
            "--config",
            file.path().to_str().unwrap(),
            "--batch-rows",
            "7",
        ])
        .unwrap();

        // The file value alone is invalid; the override makes it valid.
        let config = args.load_config().unwrap();
        assert_eq!(config.batch.max_rows, 7);
        assert_eq!(config.batch.checkpoint_secs, 9);
    }

    #[test]
    fn test_input_selects_ndjson_source() {
        let args = CliArgs::try_parse_from(["flurry", "--input", "events.ndjson"]).unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.source.kind, SourceKind::Ndjson);
        assert_eq!(config.source.path.as_deref(), Some("events.ndjson"));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = CliArgs::try_parse_from(["flurry", "--checkpoint-seconds", "0"]).unwrap();
        assert!(matches!(
            args.load_config().unwrap_err(),
            ConfigError::InvalidCheckpointSecs
        ));
    }

    #[test]
    fn test_source_value_enum() {
        let args = CliArgs::try_parse_from(["flurry", "--source", "ndjson"]).unwrap();
        assert_eq!(args.source, Some(SourceKind::Ndjson));
        assert!(CliArgs::try_parse_from(["flurry", "--source", "kafka"]).is_err());
    }
}
