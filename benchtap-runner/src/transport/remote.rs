//! Remote transport
//!
//! Wraps commands in `bash -lc` and issues them over ssh with
//! non-interactive, auto-accept-host-key options.

use async_trait::async_trait;
use benchtap_core::DutDescriptor;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::process::{run_buffered, run_streaming};
use super::{ExecRequest, OutputLine, ProcOutput, Transport, TransportError};

const DEFAULT_READER_GRACE: Duration = Duration::from_secs(2);

/// Timeout of the remote `head` used by `read_text`
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Quotes a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(&b))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// Transport that executes on a host reached over ssh
#[derive(Debug, Clone)]
pub struct RemoteTransport {
    target: String,
    options: Vec<String>,
    reader_grace: Duration,
}

impl RemoteTransport {
    pub fn new(host: &str, user: Option<&str>) -> Self {
        let target = match user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        };
        Self {
            target,
            options: Self::default_options(),
            reader_grace: DEFAULT_READER_GRACE,
        }
    }

    pub fn from_dut(dut: &DutDescriptor) -> Self {
        let mut transport = Self::new(&dut.host, dut.user.as_deref());
        if let Some(options) = &dut.ssh_options {
            transport.options = options.clone();
        }
        transport
    }

    pub fn with_reader_grace(mut self, grace: Duration) -> Self {
        self.reader_grace = grace;
        self
    }

    fn default_options() -> Vec<String> {
        ["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// The shell line executed on the remote host
    pub fn remote_command(&self, request: &ExecRequest) -> String {
        let mut script = String::new();
        for (key, value) in &request.env {
            script.push_str(&format!("export {}={}; ", key, shell_quote(value)));
        }
        if let Some(cwd) = &request.cwd {
            script.push_str(&format!("cd {} && ", shell_quote(cwd)));
        }
        script.push_str(&request.cmd);
        format!("bash -lc {}", shell_quote(&script))
    }

    fn command(&self, remote: String) -> Command {
        let mut command = Command::new("ssh");
        command.args(&self.options).arg(&self.target).arg(remote);
        command
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn run(&self, request: &ExecRequest) -> Result<ProcOutput, TransportError> {
        let label = format!("ssh {}: {}", self.target, request.cmd);
        run_buffered(
            self.command(self.remote_command(request)),
            &label,
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
        let label = format!("ssh {}: {}", self.target, request.cmd);
        run_streaming(
            self.command(self.remote_command(request)),
            &label,
            request.stdin.as_deref(),
            request.timeout,
            lines,
            self.reader_grace,
        )
        .await
    }

    async fn read_text(&self, path: &str, max_bytes: usize) -> Option<String> {
        let request = ExecRequest::new(format!("head -c {} {}", max_bytes, shell_quote(path)))
            .with_timeout(READ_TIMEOUT);
        match self.run(&request).await {
            Ok(output) if output.exit_code == 0 => Some(output.stdout),
            Ok(output) => {
                debug!(
                    "Remote read of {} on {} exited {}: {}",
                    path,
                    self.target,
                    output.exit_code,
                    output.stderr.trim()
                );
                None
            }
            Err(e) => {
                debug!("Remote read of {} on {} failed: {}", path, self.target, e);
                None
            }
        }
    }
}
