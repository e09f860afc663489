//! Error types for benchtap

use thiserror::Error;

/// Errors raised while assembling a run configuration
///
/// These are the only errors that escape to the caller as hard failures.
/// They are reported before any run starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The specification was bound without a command line
    #[error("command not specified for test '{0}'; call .cmd(...) before binding to a DUT")]
    MissingCommand(String),

    /// The specification has an empty name
    #[error("test name cannot be empty")]
    EmptyName,

    /// The test name cannot be used as a run directory component
    #[error("test name '{0}' must not contain path separators or be '.' or '..'")]
    InvalidName(String),
}

/// A non-fatal failure of an optional channel
///
/// Serial capture, version probing, artifact collection and the throughput
/// receiver all report their failures this way. A `Degraded` value is folded
/// into the run result as an absence marker; it never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{channel}: {reason}")]
pub struct Degraded {
    /// Name of the channel that failed (e.g. "uart", "version")
    pub channel: String,
    /// Human-readable failure reason
    pub reason: String,
}

impl Degraded {
    /// Create a degraded marker for a channel
    pub fn new(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}
