//! Newline-delimited JSON event reader.

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::error::{DecodeSnafu, OpenInputSnafu, ReadInputSnafu, SourceError};

use super::{Event, EventSource};

/// Reads one JSON event per line from a file or stdin.
///
/// Blank lines are skipped. A line that does not decode, including one that
/// is not valid UTF-8, yields [`SourceError::Decode`] and the reader moves on
/// to the next line.
pub struct NdjsonSource {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    buf: Vec<u8>,
    name: String,
    line: u64,
    limit: Option<u64>,
    emitted: u64,
}

impl NdjsonSource {
    /// Open `path`, or stdin when the path is absent or `-`.
    pub async fn open(path: Option<&str>, limit: Option<u64>) -> Result<Self, SourceError> {
        match path {
            None | Some("-") => Ok(Self::from_reader(
                BufReader::new(tokio::io::stdin()),
                "stdin",
                limit,
            )),
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .context(OpenInputSnafu { path })?;
                Ok(Self::from_reader(BufReader::new(file), path, limit))
            }
        }
    }

    /// Read events from any buffered reader.
    pub fn from_reader(
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        name: impl Into<String>,
        limit: Option<u64>,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            buf: Vec::new(),
            name: name.into(),
            line: 0,
            limit,
            emitted: 0,
        }
    }
}

#[async_trait]
impl EventSource for NdjsonSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }

        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .context(ReadInputSnafu)?;
            if read == 0 {
                debug!("Reached end of {} after {} lines", self.name, self.line);
                return Ok(None);
            }
            self.line += 1;

            let text = self.buf.trim_ascii();
            if text.is_empty() {
                continue;
            }

            return match serde_json::from_slice::<Event>(text) {
                Ok(event) => {
                    self.emitted += 1;
                    Ok(Some(event))
                }
                Err(e) => DecodeSnafu {
                    line: self.line,
                    message: e.to_string(),
                }
                .fail(),
            };
        }
    }

    fn describe(&self) -> String {
        format!("ndjson input {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_for(input: &'static str) -> NdjsonSource {
        NdjsonSource::from_reader(input.as_bytes(), "test", None)
    }

    #[tokio::test]
    async fn test_reads_events_and_skips_blank_lines() {
        let mut source = source_for(concat!(
            r#"{"ts": 1, "user_id": 1, "region": "eu", "amount": 10.5, "sku": "AAAA1111"}"#,
            "\n\n   \n",
            r#"{"ts": 2, "user_id": 2, "region": "us", "amount": 99.0, "sku": "BBBB2222"}"#,
            "\n",
        ));

        let first = source.next_event().await.unwrap().unwrap();
        assert_eq!(first.region, "eu");
        let second = source.next_event().await.unwrap().unwrap();
        assert_eq!(second.timestamp, 2);
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_is_recoverable() {
        let mut source = source_for(concat!(
            "{not json}\n",
            r#"{"ts": 1, "user_id": 1, "region": "eu", "sku": "AAAA1111"}"#,
            "\n",
            r#"{"ts": 3, "user_id": 3, "region": "apac", "amount": 1.0, "sku": "CCCC3333"}"#,
            "\n",
        ));

        let err = source.next_event().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, SourceError::Decode { line: 1, .. }));

        // Missing `amount`.
        let err = source.next_event().await.unwrap_err();
        match err {
            SourceError::Decode { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("amount"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.region, "apac");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_recoverable() {
        let mut input = Vec::new();
        input.extend_from_slice(
            br#"{"ts": 1, "user_id": 1, "region": "eu", "amount": 1.0, "sku": "AAAA1111"}"#,
        );
        input.extend_from_slice(b"\n\xff\xfe\n");
        input.extend_from_slice(
            br#"{"ts": 2, "user_id": 2, "region": "us", "amount": 2.0, "sku": "BBBB2222"}"#,
        );
        input.push(b'\n');
        let mut source = NdjsonSource::from_reader(std::io::Cursor::new(input), "test", None);

        assert_eq!(source.next_event().await.unwrap().unwrap().user_id, 1);

        let err = source.next_event().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, SourceError::Decode { line: 2, .. }));

        assert_eq!(source.next_event().await.unwrap().unwrap().user_id, 2);
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_limit_stops_reading() {
        let mut source = NdjsonSource::from_reader(
            concat!(
                r#"{"ts": 1, "user_id": 1, "region": "eu", "amount": 1.0, "sku": "AAAA1111"}"#,
                "\n",
                r#"{"ts": 2, "user_id": 2, "region": "eu", "amount": 2.0, "sku": "AAAA1111"}"#,
                "\n",
            )
            .as_bytes(),
            "test",
            Some(1),
        );

        assert!(source.next_event().await.unwrap().is_some());
        assert!(source.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"timestamp": 5, "user_id": 9, "region": "latam", "amount": 3.25, "sku": "ZZZZ9999"}}"#
        )
        .unwrap();

        let mut source = NdjsonSource::open(file.path().to_str(), None).await.unwrap();
        let event = source.next_event().await.unwrap().unwrap();
        assert_eq!(event.timestamp, 5);
        assert_eq!(event.user_id, 9);
        assert!(source.describe().contains("ndjson"));
    }
}
