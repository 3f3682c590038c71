//! Megaphone wire types and the line codec.
//!
//! The server pushes one JSON object per line:
//!
//! ```text
//! {"sid":"orders","eid":"8f1c","ts":"2024-05-01T12:00:00Z","body":{...}}
//! ```
//!
//! Reads do not respect line boundaries, so raw bytes go through a
//! [`LineSplitter`] before each complete line is handed to [`decode_line`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Identifies one read channel: the producer side is handed back to the
/// factory on later calls, the consumer side is what the poller reads from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub producer: String,
    pub consumer: String,
}

impl ChannelAddress {
    pub fn new(producer: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            consumer: consumer.into(),
        }
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.producer, self.consumer)
    }
}

/// One decoded record from the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk<T = Value> {
    #[serde(rename = "sid")]
    pub stream_id: String,
    #[serde(rename = "eid")]
    pub event_id: String,
    #[serde(rename = "ts")]
    pub timestamp: String,
    pub body: T,
}

impl Chunk<Value> {
    /// Interpret the opaque body as `T`.
    pub fn parse_body<T: DeserializeOwned>(self) -> Result<Chunk<T>, DecodeError> {
        let body = serde_json::from_value(self.body).map_err(|e| DecodeError::Body(e.to_string()))?;
        Ok(Chunk {
            stream_id: self.stream_id,
            event_id: self.event_id,
            timestamp: self.timestamp,
            body,
        })
    }
}

/// Decode a single line into a chunk with an opaque body.
///
/// Unknown fields are ignored. `sid`, `eid` and `ts` must be strings;
/// `body` must be present but may be any JSON value, including `null`.
pub fn decode_line(line: &str) -> Result<Chunk<Value>, DecodeError> {
    let value: Value = serde_json::from_str(line).map_err(|e| DecodeError::Json(e.to_string()))?;
    let Value::Object(mut obj) = value else {
        return Err(DecodeError::NotAnObject);
    };

    Ok(Chunk {
        stream_id: take_string(&mut obj, "sid")?,
        event_id: take_string(&mut obj, "eid")?,
        timestamp: take_string(&mut obj, "ts")?,
        body: obj.remove("body").ok_or(DecodeError::MissingField("body"))?,
    })
}

fn take_string(obj: &mut Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match obj.remove(field) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(DecodeError::MissingField(field)),
    }
}

/// Reassembles newline-terminated lines from arbitrarily split reads.
///
/// Works on bytes so a multi-byte character cut by a read boundary is
/// never decoded half-way.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read and return every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|&b| b == b'\n') {
            let pos = from + offset;
            if let Some(line) = to_line(&self.buf[start..pos]) {
                lines.push(line);
            }
            start = pos + 1;
            from = start;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Take the trailing unterminated line, if any. Call once the read ends.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buf);
        self.scanned = 0;
        to_line(&raw)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn to_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    (!line.is_empty()).then(|| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_full_record() {
        let chunk = decode_line(r#"{"sid":"s1","eid":"e1","ts":"100","body":{"n":1},"extra":true}"#).unwrap();
        assert_eq!(chunk.stream_id, "s1");
        assert_eq!(chunk.event_id, "e1");
        assert_eq!(chunk.timestamp, "100");
        assert_eq!(chunk.body, json!({"n": 1}));
    }

    #[test]
    fn decode_null_body_is_allowed() {
        let chunk = decode_line(r#"{"sid":"s1","eid":"e1","ts":"100","body":null}"#).unwrap();
        assert_eq!(chunk.body, Value::Null);
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert_eq!(
            decode_line(r#"{"eid":"e1","ts":"1","body":1}"#).unwrap_err(),
            DecodeError::MissingField("sid")
        );
        assert_eq!(
            decode_line(r#"{"sid":"s","ts":"1","body":1}"#).unwrap_err(),
            DecodeError::MissingField("eid")
        );
        assert_eq!(
            decode_line(r#"{"sid":"s","eid":"e","ts":1,"body":1}"#).unwrap_err(),
            DecodeError::MissingField("ts")
        );
        assert_eq!(
            decode_line(r#"{"sid":"s","eid":"e","ts":"1"}"#).unwrap_err(),
            DecodeError::MissingField("body")
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_line("{not json"), Err(DecodeError::Json(_))));
        assert_eq!(decode_line("[1,2]").unwrap_err(), DecodeError::NotAnObject);
    }

    #[test]
    fn parse_body_into_typed_chunk() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Price {
            amount: u64,
        }

        let chunk = decode_line(r#"{"sid":"s","eid":"e","ts":"1","body":{"amount":42}}"#).unwrap();
        let typed: Chunk<Price> = chunk.parse_body().unwrap();
        assert_eq!(typed.body, Price { amount: 42 });

        let bad = decode_line(r#"{"sid":"s","eid":"e","ts":"1","body":"nope"}"#).unwrap();
        assert!(matches!(bad.parse_body::<Price>(), Err(DecodeError::Body(_))));
    }

    #[test]
    fn splitter_holds_partial_line_across_reads() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"{\"sid\":\"a\",").is_empty());
        assert!(splitter.pending() > 0);

        let lines = splitter.push(b"\"eid\":\"1\"}\n{\"sid\"");
        assert_eq!(lines, vec![r#"{"sid":"a","eid":"1"}"#.to_string()]);

        let lines = splitter.push(b":\"b\"}\n");
        assert_eq!(lines, vec![r#"{"sid":"b"}"#.to_string()]);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn splitter_skips_blank_lines_and_crlf() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"one\r\n\n  \ntwo\n");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn splitter_keeps_multibyte_chars_intact() {
        let text = "{\"v\":\"héllo\"}\n".as_bytes();
        let cut = text.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut splitter = LineSplitter::new();
        assert!(splitter.push(&text[..cut]).is_empty());
        let lines = splitter.push(&text[cut..]);
        assert_eq!(lines, vec!["{\"v\":\"héllo\"}".to_string()]);
    }

    #[test]
    fn splitter_handles_many_lines_in_one_read() {
        let record = r#"{"sid":"s","eid":"e","ts":"0","body":null}"#;
        let mut read = String::new();
        for _ in 0..50_000 {
            read.push_str(record);
            read.push('\n');
        }
        read.push_str("{\"sid\"");

        let mut splitter = LineSplitter::new();
        let started = std::time::Instant::now();
        let lines = splitter.push(read.as_bytes());
        assert!(
            started.elapsed() < std::time::Duration::from_secs(2),
            "splitting took {:?}",
            started.elapsed()
        );

        assert_eq!(lines.len(), 50_000);
        assert!(lines.iter().all(|l| l == record));
        assert_eq!(splitter.pending(), "{\"sid\"".len());
    }

    #[test]
    fn splitter_long_partial_line_completes_later() {
        let mut splitter = LineSplitter::new();
        let piece = "x".repeat(1024);
        for _ in 0..64 {
            assert!(splitter.push(piece.as_bytes()).is_empty());
        }
        let lines = splitter.push(b"\nnext");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 64 * 1024);
        assert_eq!(splitter.finish().as_deref(), Some("next"));
    }

    #[test]
    fn splitter_finish_flushes_unterminated_line() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"first\nsecond").len() == 1);
        assert_eq!(splitter.finish().as_deref(), Some("second"));
        assert_eq!(splitter.finish(), None);
    }
}
