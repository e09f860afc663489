//! On-disk record store
//!
//! Every accepted record lands in two places under
//! `<root>/<run_id>/<test>/`:
//! - `<stream_id>_<source>.ndjson`: the raw line, byte for byte
//! - `<source>.log`: the decoded text, for text payloads only
//!
//! Malformed lines are skipped. Sequence gaps are reported, never
//! rejected.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Replaces path separators and parent references in one path component
pub fn sanitize_component(raw: &str) -> String {
    let cleaned = raw
        .replace("..", "_")
        .replace(['/', '\\', ':', '\0'], "_");
    if cleaned.is_empty() || cleaned == "." {
        "_".to_string()
    } else {
        cleaned
    }
}

fn field(record: &Map<String, Value>, key: &str, default: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

/// Appends incoming records to per-stream files
pub struct RecordStore {
    root: PathBuf,
    /// Last sequence number seen per run; also serialises file appends
    last_seq: Mutex<HashMap<String, u64>>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_seq: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores one NDJSON line
    ///
    /// Returns `Ok(false)` for lines that are not a JSON object and
    /// `Err` only when the files cannot be written.
    pub async fn ingest_line(&self, line: &[u8]) -> Result<bool> {
        let Ok(Value::Object(record)) = serde_json::from_slice::<Value>(line) else {
            return Ok(false);
        };

        let run_id = field(&record, "run_id", "unknown");
        let test = field(&record, "test", "unknown");
        let stream_id = field(&record, "stream_id", "stream");
        let source = field(&record, "source", "src");

        let dir = self
            .root
            .join(sanitize_component(&run_id))
            .join(sanitize_component(&test));
        let source_name = sanitize_component(&source);

        let mut last_seq = self.last_seq.lock().await;
        if let Some(seq) = record.get("seq").and_then(Value::as_u64) {
            check_sequence(&mut last_seq, &run_id, seq);
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let raw_path = dir.join(format!(
            "{}_{}.ndjson",
            sanitize_component(&stream_id),
            source_name
        ));
        if line.ends_with(b"\n") {
            append(&raw_path, line).await?;
        } else {
            let mut terminated = line.to_vec();
            terminated.push(b'\n');
            append(&raw_path, &terminated).await?;
        }

        if let Some(text) = record.get("text").and_then(Value::as_str) {
            append(&dir.join(format!("{}.log", source_name)), text.as_bytes()).await?;
        }

        Ok(true)
    }
}

/// Tracks the sequence of one run
///
/// A record numbered 1 opens a new sequence space for the run (receiver
/// output folded into a run carries its own numbering).
fn check_sequence(last_seq: &mut HashMap<String, u64>, run_id: &str, seq: u64) {
    match last_seq.insert(run_id.to_string(), seq) {
        Some(last) if seq == 1 && last != 0 => {
            debug!("Run {} restarted its sequence after {}", run_id, last);
        }
        Some(last) if seq > last + 1 => {
            warn!(
                "Run {} lost {} telemetry record(s) between {} and {}",
                run_id,
                seq - last - 1,
                last,
                seq
            );
        }
        Some(last) if seq <= last => {
            warn!("Run {} sent record {} after {}", run_id, seq, last);
        }
        _ => {}
    }
}

async fn append(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchtap_core::{Payload, TelemetryRecord};

    fn record(seq: u64, source: &str, payload: Payload) -> TelemetryRecord {
        TelemetryRecord {
            ts: chrono::Utc::now(),
            seq,
            run_id: "run-1".to_string(),
            test: "smoke".to_string(),
            dut: "localhost".to_string(),
            source: source.to_string(),
            stream_id: format!("{}-0011aabb", source),
            payload,
            meta: None,
        }
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("stdout"), "stdout");
        assert_eq!(sanitize_component("../../etc"), "____etc");
        assert_eq!(sanitize_component("artifact:demo.log"), "artifact_demo.log");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component("."), "_");
    }

    #[tokio::test]
    async fn test_text_record_is_stored_raw_and_as_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let first = record(1, "stdout", Payload::text("hello\n")).to_line().unwrap();
        let second = record(2, "stdout", Payload::text("world\n")).to_line().unwrap();

        assert!(store.ingest_line(first.as_bytes()).await.unwrap());
        assert!(store.ingest_line(second.as_bytes()).await.unwrap());

        let run_dir = dir.path().join("run-1").join("smoke");
        let raw = std::fs::read_to_string(run_dir.join("stdout-0011aabb_stdout.ndjson")).unwrap();
        assert_eq!(raw, format!("{}{}", first, second));
        let log = std::fs::read_to_string(run_dir.join("stdout.log")).unwrap();
        assert_eq!(log, "hello\nworld\n");
    }

    #[tokio::test]
    async fn test_binary_record_has_no_text_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let line = record(1, "uart", Payload::blob(&[0xff, 0x00])).to_line().unwrap();

        assert!(store.ingest_line(line.as_bytes()).await.unwrap());

        let run_dir = dir.path().join("run-1").join("smoke");
        assert!(run_dir.join("uart-0011aabb_uart.ndjson").exists());
        assert!(!run_dir.join("uart.log").exists());
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        assert!(!store.ingest_line(b"not json\n").await.unwrap());
        assert!(!store.ingest_line(b"[1,2,3]\n").await.unwrap());
        assert!(!store.ingest_line(b"\n").await.unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        assert!(store.ingest_line(br#"{"text":"x"}"#).await.unwrap());

        let run_dir = dir.path().join("unknown").join("unknown");
        let raw = std::fs::read_to_string(run_dir.join("stream_src.ndjson")).unwrap();
        assert_eq!(raw, "{\"text\":\"x\"}\n");
        assert_eq!(std::fs::read_to_string(run_dir.join("src.log")).unwrap(), "x");
    }

    #[tokio::test]
    async fn test_hostile_ids_stay_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("streams");
        let store = RecordStore::new(&root);

        let line = br#"{"run_id":"../../escape","test":"/etc","source":"x","stream_id":"s"}"#;
        assert!(store.ingest_line(line).await.unwrap());

        assert!(root.join("____escape").join("_etc").join("s_x.ndjson").exists());
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn test_sequence_tracking() {
        let mut last = HashMap::new();
        check_sequence(&mut last, "r", 1);
        check_sequence(&mut last, "r", 2);
        check_sequence(&mut last, "r", 5);
        assert_eq!(last["r"], 5);
        check_sequence(&mut last, "r", 1);
        assert_eq!(last["r"], 1);
    }
}
