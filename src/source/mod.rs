//! Event sources.
//!
//! An [`EventSource`] yields one [`Event`] at a time until it is exhausted.
//! Two implementations are provided: a random generator for load testing and
//! an NDJSON reader for files or stdin.

pub mod ndjson;
pub mod synthetic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{SourceConfig, SourceKind};
use crate::error::SourceError;

pub use ndjson::NdjsonSource;
pub use synthetic::SyntheticSource;

/// A single purchase event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds since the Unix epoch.
    #[serde(rename = "ts", alias = "timestamp")]
    pub timestamp: i64,
    pub user_id: i64,
    pub region: String,
    pub amount: f64,
    pub sku: String,
}

/// A pull-based producer of events.
///
/// `Ok(None)` means the source is exhausted. Errors for which
/// [`SourceError::is_recoverable`] holds only affect a single record; the
/// source may be polled again afterwards.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Build the event source described by the configuration.
pub async fn from_config(config: &SourceConfig) -> Result<Box<dyn EventSource>, SourceError> {
    let source: Box<dyn EventSource> = match config.kind {
        SourceKind::Synthetic => Box::new(SyntheticSource::from_config(config)),
        SourceKind::Ndjson => Box::new(NdjsonSource::open(config.path.as_deref(), config.limit).await?),
    };
    info!("Reading events from {}", source.describe());
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_uses_ts_key() {
        let event = Event {
            timestamp: 1_700_000_000,
            user_id: 42,
            region: "eu".to_string(),
            amount: 12.5,
            sku: "AB12CD34".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["ts"], 1_700_000_000);
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_event_accepts_timestamp_alias() {
        let event: Event = serde_json::from_str(
            r#"{"timestamp": 5, "user_id": 1, "region": "us", "amount": 1.0, "sku": "AAAAAAAA"}"#,
        )
        .unwrap();
        assert_eq!(event.timestamp, 5);
    }

    #[tokio::test]
    async fn test_from_config_builds_synthetic() {
        let config = SourceConfig {
            limit: Some(2),
            seed: Some(1),
            ..Default::default()
        };
        let mut source = from_config(&config).await.unwrap();
        assert!(source.next_event().await.unwrap().is_some());
        assert!(source.next_event().await.unwrap().is_some());
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_config_missing_ndjson_file() {
        let config = SourceConfig {
            kind: SourceKind::Ndjson,
            path: Some("/nonexistent/events.ndjson".to_string()),
            ..Default::default()
        };
        let err = from_config(&config).await.err().unwrap();
        assert!(matches!(err, SourceError::OpenInput { .. }));
    }
}
