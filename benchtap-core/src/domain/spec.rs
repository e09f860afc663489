//! Test specification builder
//!
//! A [`TestSpecification`] is assembled fluently and becomes an immutable
//! [`BoundRun`] when bound to a DUT:
//!
//! ```
//! use benchtap_core::{DutDescriptor, test};
//! use std::time::Duration;
//!
//! let run = test("pcie")
//!     .affects(["pcie", "sys"])
//!     .cmd("lspci -vv")
//!     .timeout(Duration::from_secs(10))
//!     .version("lspci --version")
//!     .bind(DutDescriptor::local())
//!     .unwrap();
//! assert_eq!(run.name(), "pcie");
//! ```

use std::time::Duration;

use crate::domain::command::CommandSpec;
use crate::domain::dut::DutDescriptor;
use crate::domain::serial::SerialCaptureConfig;
use crate::error::ConfigError;

/// Starts a test specification with the given name
pub fn test(name: impl Into<String>) -> TestSpecification {
    TestSpecification::new(name)
}

/// Fluent, not yet validated description of a diagnostic test
#[derive(Debug, Clone, Default)]
pub struct TestSpecification {
    name: String,
    affects: Vec<String>,
    command: CommandSpec,
    serial: Option<SerialCaptureConfig>,
}

impl TestSpecification {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the affected-subsystem tags, replacing earlier ones
    pub fn affects<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affects = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the command line
    pub fn cmd(mut self, command: impl Into<String>) -> Self {
        self.command.cmd = command.into();
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.command.stdin = Some(payload.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    /// Adds one environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.command.cwd = Some(cwd.into());
        self
    }

    /// Sets the version-probe command
    pub fn version(mut self, version_cmd: impl Into<String>) -> Self {
        self.command.version_cmd = Some(version_cmd.into());
        self
    }

    /// Declares a file on the DUT to collect after execution
    pub fn artifact(mut self, path: impl Into<String>) -> Self {
        self.command.artifacts.push(path.into());
        self
    }

    /// Enables serial console capture for the run
    pub fn uart(mut self, config: SerialCaptureConfig) -> Self {
        self.serial = Some(config);
        self
    }

    /// Validates the specification and binds it to a DUT
    pub fn bind(self, dut: DutDescriptor) -> Result<BoundRun, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !is_path_safe(&self.name) {
            return Err(ConfigError::InvalidName(self.name));
        }
        if !self.command.has_command() {
            return Err(ConfigError::MissingCommand(self.name));
        }

        Ok(BoundRun {
            name: self.name,
            affects: self.affects,
            command: self.command,
            serial: self.serial,
            dut,
        })
    }
}

/// Whether a name can be used as a single directory component
fn is_path_safe(name: &str) -> bool {
    name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// A validated specification bound to a DUT
///
/// Immutable; consumed by the run orchestrator.
#[derive(Debug, Clone)]
pub struct BoundRun {
    name: String,
    affects: Vec<String>,
    command: CommandSpec,
    serial: Option<SerialCaptureConfig>,
    dut: DutDescriptor,
}

impl BoundRun {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn affects(&self) -> &[String] {
        &self.affects
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    pub fn serial(&self) -> Option<&SerialCaptureConfig> {
        self.serial.as_ref()
    }

    pub fn dut(&self) -> &DutDescriptor {
        &self.dut
    }
}
