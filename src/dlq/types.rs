//! Dead letter record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlushError, SourceError};
use crate::metrics::events::FailureStage;

/// One failed flush or rejected input record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: FailureStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_id: Option<u64>,
    pub rows: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<String>,
    /// Input line of a rejected record, when the source is line oriented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_flush_error(err: &FlushError) -> Self {
        Self {
            stage: err.stage(),
            flush_id: Some(err.flush_id()),
            rows: err.rows(),
            partitions: err.partitions().to_vec(),
            line: None,
            error: error_chain(err),
            timestamp: Utc::now(),
        }
    }

    pub fn from_source_error(err: &SourceError) -> Self {
        let line = match err {
            SourceError::Decode { line, .. } => Some(*line),
            _ => None,
        };
        Self {
            stage: FailureStage::Ingest,
            flush_id: None,
            rows: 1,
            partitions: Vec::new(),
            line,
            error: error_chain(err),
            timestamp: Utc::now(),
        }
    }
}

/// Render an error and all of its sources on one line.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Failure counts per stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailureStats {
    pub ingest: usize,
    pub encode: usize,
    pub transform: usize,
    pub write: usize,
    pub summarize: usize,
}

impl FailureStats {
    pub fn increment(&mut self, stage: FailureStage) {
        match stage {
            FailureStage::Ingest => self.ingest += 1,
            FailureStage::Encode => self.encode += 1,
            FailureStage::Transform => self.transform += 1,
            FailureStage::Write => self.write += 1,
            FailureStage::Summarize => self.summarize += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ingest + self.encode + self.transform + self.write + self.summarize
    }
}
