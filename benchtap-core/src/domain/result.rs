//! Run result domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Marker appended to previews that were cut short
pub const TRUNCATION_MARKER: &str = "\n...<truncated>...";

/// Outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Command exited with code 0
    Pass,
    /// Command exited non-zero (including timeouts)
    Fail,
    /// The transport itself failed
    Error,
}

impl RunStatus {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            RunStatus::Pass
        } else {
            RunStatus::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pass => "pass",
            RunStatus::Fail => "fail",
            RunStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one collected artifact
///
/// Absent channels are recorded with `exists: false` and an `error`
/// string instead of being left out of the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub exists: bool,
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Channel-specific metadata (e.g. `bytes_captured`, `server`)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ArtifactRecord {
    /// An artifact that was found, with its preview
    pub fn present(path: impl Into<String>, preview: Option<String>) -> Self {
        Self {
            path: path.into(),
            exists: true,
            preview,
            error: None,
            extra: BTreeMap::new(),
        }
    }

    /// An artifact that could not be collected
    pub fn missing(path: impl Into<String>, error: Option<String>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            preview: None,
            error,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// The externally visible outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub test_name: String,
    pub affects: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub rc: i32,
    pub status: RunStatus,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub version: Option<String>,
    pub artifacts: BTreeMap<String, ArtifactRecord>,
    pub dut: Map<String, Value>,
    pub message: String,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Pass
    }

    /// Directory holding this run's logs and artifacts
    pub fn run_dir(&self) -> Option<&std::path::Path> {
        self.stdout_path.parent()
    }

    /// Indented JSON rendering for humans
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Size-capped preview of artifact content
///
/// Content longer than `max_chars` characters is cut and suffixed with
/// [`TRUNCATION_MARKER`].
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => format!("{}{}", &content[..cut], TRUNCATION_MARKER),
    }
}
