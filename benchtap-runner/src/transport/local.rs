//! Local transport
//!
//! Runs commands through the host shell (`sh -c`).

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::process::{run_buffered, run_streaming};
use super::{ExecRequest, OutputLine, ProcOutput, Transport, TransportError};

/// Default time given to output readers after the process exits
const DEFAULT_READER_GRACE: Duration = Duration::from_secs(2);

/// Transport that executes on the machine running benchtap
#[derive(Debug, Clone)]
pub struct LocalTransport {
    shell: String,
    reader_grace: Duration,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            reader_grace: DEFAULT_READER_GRACE,
        }
    }

    /// Overrides how long readers may drain after the process exits
    pub fn with_reader_grace(mut self, grace: Duration) -> Self {
        self.reader_grace = grace;
        self
    }

    fn command(&self, request: &ExecRequest) -> Command {
        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(&request.cmd);
        command.envs(&request.env);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn run(&self, request: &ExecRequest) -> Result<ProcOutput, TransportError> {
        run_buffered(
            self.command(request),
            &request.cmd,
            request.stdin.as_deref(),
            request.timeout,
        )
        .await
    }

    async fn stream(
        &self,
        request: &ExecRequest,
        lines: UnboundedSender<OutputLine>,
    ) -> Result<i32, TransportError> {
        run_streaming(
            self.command(request),
            &request.cmd,
            request.stdin.as_deref(),
            request.timeout,
            lines,
            self.reader_grace,
        )
        .await
    }

    async fn read_text(&self, path: &str, max_bytes: usize) -> Option<String> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot open {}: {}", path, e);
                return None;
            }
        };

        let mut data = Vec::new();
        if let Err(e) = file.take(max_bytes as u64).read_to_end(&mut data).await {
            debug!("Cannot read {}: {}", path, e);
            return None;
        }
        Some(String::from_utf8_lossy(&data).into_owned())
    }
}
