//! Telemetry wire format
//!
//! One [`TelemetryRecord`] is rendered as one line of newline-delimited
//! JSON on the telemetry channel:
//!
//! ```text
//! {"ts":"...","seq":1,"run_id":"...","test":"smoke","dut":"localhost",
//!  "source":"stdout","stream_id":"stdout-1a2b3c4d","text":"hi\n","encoding":"utf-8"}
//! ```
//!
//! Binary payloads carry `blob_b64` with `"encoding":"base64"` instead of
//! `text`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload of a telemetry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding")]
pub enum Payload {
    #[serde(rename = "utf-8")]
    Text { text: String },
    #[serde(rename = "base64")]
    Blob { blob_b64: String },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    /// Base64-encodes raw bytes
    pub fn blob(bytes: &[u8]) -> Self {
        Payload::Blob {
            blob_b64: STANDARD.encode(bytes),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { text } => Some(text),
            Payload::Blob { .. } => None,
        }
    }
}

/// One sequenced, timestamped unit of captured output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub ts: chrono::DateTime<chrono::Utc>,
    /// Per-multiplexer monotonic sequence number, starting at 1
    pub seq: u64,
    pub run_id: String,
    pub test: String,
    pub dut: String,
    pub source: String,
    pub stream_id: String,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl TelemetryRecord {
    /// Renders the record as one NDJSON line, trailing newline included
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Raw payload bytes; `None` if a base64 payload is corrupt
    pub fn decoded_bytes(&self) -> Option<Vec<u8>> {
        match &self.payload {
            Payload::Text { text } => Some(text.as_bytes().to_vec()),
            Payload::Blob { blob_b64 } => STANDARD.decode(blob_b64).ok(),
        }
    }
}
