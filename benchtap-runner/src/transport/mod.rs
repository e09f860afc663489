//! Transport layer
//!
//! Transports execute commands and read files on a DUT. They come in two
//! flavours:
//! - Local: the command runs through the host shell
//! - Remote: the command is wrapped in a remote shell invocation
//!
//! All transports are trait-based so the orchestrator can be driven by
//! alternative implementations.

mod local;
mod process;
mod remote;

pub use local::LocalTransport;
pub use remote::{RemoteTransport, shell_quote};

use async_trait::async_trait;
use benchtap_core::{CommandSpec, DutDescriptor, TransportKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Exit code reported when a command is killed for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Errors raised by a transport
///
/// Only launch and pipe failures are errors. A command that runs and
/// exits non-zero, or is killed on timeout by `stream`, is a normal
/// outcome reported through its exit code.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The process could not be launched
    #[error("failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while talking to a running process
    #[error("process I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A buffered run exceeded its timeout
    #[error("command timed out after {0:?}")]
    TimedOut(Duration),
}

/// Output stream of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    /// Telemetry source name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
        }
    }
}

/// One logical line of process output, newline included when present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub channel: Channel,
    pub text: String,
}

/// Buffered output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A command execution request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub cmd: String,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl ExecRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&CommandSpec> for ExecRequest {
    fn from(spec: &CommandSpec) -> Self {
        Self {
            cmd: spec.cmd.clone(),
            stdin: spec.stdin.clone(),
            timeout: spec.timeout,
            cwd: spec.cwd.clone(),
            env: spec.env.clone(),
        }
    }
}

/// Executes commands and reads files on a target host
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs a command to completion and buffers its whole output
    ///
    /// Exceeding the request timeout yields [`TransportError::TimedOut`].
    async fn run(&self, request: &ExecRequest) -> Result<ProcOutput, TransportError>;

    /// Runs a command, delivering output line by line as it is produced
    ///
    /// Lines are sent on `lines` from background readers, one message per
    /// logical line. Every clone of the sender is dropped before this
    /// returns, so no line can arrive after the exit code is reported.
    /// A command killed on timeout reports [`TIMEOUT_EXIT_CODE`].
    async fn stream(
        &self,
        request: &ExecRequest,
        lines: UnboundedSender<OutputLine>,
    ) -> Result<i32, TransportError>;

    /// Best-effort read of up to `max_bytes` of a file; `None` on any failure
    async fn read_text(&self, path: &str, max_bytes: usize) -> Option<String>;
}

/// Creates a fresh transport for a DUT
///
/// `reader_grace` bounds how long output readers may keep draining after
/// the process has exited.
pub fn transport_for(dut: &DutDescriptor, reader_grace: Duration) -> Arc<dyn Transport> {
    match dut.transport {
        TransportKind::Local => Arc::new(LocalTransport::new().with_reader_grace(reader_grace)),
        TransportKind::Remote => {
            Arc::new(RemoteTransport::from_dut(dut).with_reader_grace(reader_grace))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_request_from_command_spec() {
        let mut spec = CommandSpec::new("make check");
        spec.timeout = Some(Duration::from_secs(30));
        spec.cwd = Some("/src".to_string());
        spec.env.insert("CC".to_string(), "clang".to_string());
        spec.version_cmd = Some("make --version".to_string());

        let request = ExecRequest::from(&spec);
        assert_eq!(request.cmd, "make check");
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
        assert_eq!(request.cwd.as_deref(), Some("/src"));
        assert_eq!(request.env.get("CC").map(String::as_str), Some("clang"));
    }

    #[test]
    fn test_channel_source_names() {
        assert_eq!(Channel::Stdout.as_str(), "stdout");
        assert_eq!(Channel::Stderr.as_str(), "stderr");
    }
}
