//! Per-run execution context
//!
//! Owns the run directory `<root>/<run_id>/<test>/` and its files:
//! - `stdout.log` / `stderr.log`, appended line by line as output arrives
//! - `uart.log`, written by the serial tap
//! - persisted copies of collected artifacts

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::transport::Channel;

/// File names the run itself writes into the run directory
const RESERVED_NAMES: [&str; 3] = ["stdout.log", "stderr.log", "uart.log"];

/// Paths of one run's output
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_dir: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl RunContext {
    /// Computes the paths of a run without touching the filesystem
    pub fn new(root: &Path, run_id: Uuid, test_name: &str) -> Self {
        let run_dir = root.join(run_id.to_string()).join(test_name);
        Self {
            stdout_path: run_dir.join("stdout.log"),
            stderr_path: run_dir.join("stderr.log"),
            run_dir,
        }
    }

    /// Creates the run directory and opens both log files
    pub async fn open_logs(&self) -> std::io::Result<RunLogs> {
        tokio::fs::create_dir_all(&self.run_dir).await?;
        Ok(RunLogs {
            stdout: File::create(&self.stdout_path).await?,
            stderr: File::create(&self.stderr_path).await?,
            write_failed: false,
        })
    }

    pub fn uart_log_path(&self) -> PathBuf {
        self.run_dir.join("uart.log")
    }

    /// Writes collected content under a file name inside the run directory
    pub async fn persist(&self, file_name: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.run_dir.join(file_name);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

/// Local file name for an artifact path
///
/// Names that would clobber the run's own logs are prefixed.
pub fn artifact_file_name(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "artifact".to_string());

    if RESERVED_NAMES.contains(&name.as_str()) {
        format!("artifact-{}", name)
    } else {
        name
    }
}

/// Open stdout/stderr log files of a run
pub struct RunLogs {
    stdout: File,
    stderr: File,
    write_failed: bool,
}

impl RunLogs {
    /// Appends one line to the log of its channel and flushes it
    ///
    /// A failed write is reported once; later lines are still attempted.
    pub async fn append(&mut self, channel: Channel, text: &str) {
        let file = match channel {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
        };
        let written = async {
            file.write_all(text.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            if !self.write_failed {
                warn!("Failed to write {} log: {}", channel.as_str(), e);
                self.write_failed = true;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stdout.sync_all().await;
        let _ = self.stderr.sync_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_paths() {
        let run_id = Uuid::new_v4();
        let ctx = RunContext::new(Path::new("/out"), run_id, "pcie");
        let expected = PathBuf::from("/out").join(run_id.to_string()).join("pcie");
        assert_eq!(ctx.run_dir, expected);
        assert_eq!(ctx.stdout_path, expected.join("stdout.log"));
        assert_eq!(ctx.stderr_path, expected.join("stderr.log"));
        assert_eq!(ctx.uart_log_path(), expected.join("uart.log"));
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(artifact_file_name("/tmp/report.json"), "report.json");
        assert_eq!(artifact_file_name("demo.log"), "demo.log");
        assert_eq!(artifact_file_name("/var/log/stdout.log"), "artifact-stdout.log");
        assert_eq!(artifact_file_name("/"), "artifact");
    }

    #[tokio::test]
    async fn test_logs_are_appended_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(dir.path(), Uuid::new_v4(), "smoke");
        let mut logs = ctx.open_logs().await.unwrap();

        logs.append(Channel::Stdout, "one\n").await;
        logs.append(Channel::Stderr, "oops\n").await;
        logs.append(Channel::Stdout, "two").await;
        logs.close().await;

        assert_eq!(std::fs::read_to_string(&ctx.stdout_path).unwrap(), "one\ntwo");
        assert_eq!(std::fs::read_to_string(&ctx.stderr_path).unwrap(), "oops\n");

        let saved = ctx.persist("report.txt", "ok").await.unwrap();
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "ok");
    }
}
