//! Command domain types

use std::collections::BTreeMap;
use std::time::Duration;

/// A command to execute on a DUT
///
/// Assembled by the [`TestSpecification`](crate::TestSpecification) builder
/// and immutable once a run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell command line
    pub cmd: String,
    /// Payload written to the process stdin, if any
    pub stdin: Option<String>,
    /// Wall-clock limit for the command
    pub timeout: Option<Duration>,
    /// Environment overrides applied on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Working directory on the DUT
    pub cwd: Option<String>,
    /// Command whose trimmed output is recorded as the version string
    pub version_cmd: Option<String>,
    /// Paths on the DUT collected after execution, in declaration order
    pub artifacts: Vec<String>,
}

impl CommandSpec {
    /// Creates a command spec for the given command line
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }

    /// Whether a non-blank command line has been set
    pub fn has_command(&self) -> bool {
        !self.cmd.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_command() {
        assert!(CommandSpec::new("echo hi").has_command());
        assert!(!CommandSpec::new("").has_command());
        assert!(!CommandSpec::new("   ").has_command());
    }
}
