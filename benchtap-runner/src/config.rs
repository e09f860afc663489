//! Runner configuration
//!
//! Defines where run output lands and the bounds the orchestrator applies
//! to version probes, output readers, and artifact collection.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root directory for per-run output (`<root>/<run_id>/<test>/`)
    pub artifacts_root: PathBuf,

    /// Timeout of the optional version probe
    pub version_probe_timeout: Duration,

    /// How long output readers may keep draining after the process exits
    pub reader_grace: Duration,

    /// Maximum bytes read from each declared artifact
    pub artifact_read_limit: usize,

    /// Maximum characters kept in an artifact preview
    pub preview_chars: usize,

    /// How long queued telemetry may keep draining once a run is done
    pub telemetry_drain: Duration,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(artifacts_root: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_root: artifacts_root.into(),
            version_probe_timeout: Duration::from_secs(10),
            reader_grace: Duration::from_millis(2000),
            artifact_read_limit: 64_000,
            preview_chars: 2000,
            telemetry_drain: Duration::from_millis(1000),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognised environment variables (all optional):
    /// - BENCHTAP_ARTIFACTS_ROOT (default: artifacts)
    /// - BENCHTAP_VERSION_TIMEOUT (seconds, default: 10)
    /// - BENCHTAP_READER_GRACE_MS (milliseconds, default: 2000)
    /// - BENCHTAP_ARTIFACT_READ_LIMIT (bytes, default: 64000)
    /// - BENCHTAP_PREVIEW_CHARS (default: 2000)
    /// - BENCHTAP_TELEMETRY_DRAIN_MS (milliseconds, default: 1000)
    ///
    /// Unparsable values are logged and replaced by their default.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let artifacts_root = std::env::var("BENCHTAP_ARTIFACTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.artifacts_root);

        let version_probe_timeout = env_parse::<u64>("BENCHTAP_VERSION_TIMEOUT")
            .map(Duration::from_secs)
            .unwrap_or(defaults.version_probe_timeout);

        let reader_grace = env_parse::<u64>("BENCHTAP_READER_GRACE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.reader_grace);

        let artifact_read_limit = env_parse::<usize>("BENCHTAP_ARTIFACT_READ_LIMIT")
            .unwrap_or(defaults.artifact_read_limit);

        let preview_chars =
            env_parse::<usize>("BENCHTAP_PREVIEW_CHARS").unwrap_or(defaults.preview_chars);

        let telemetry_drain = env_parse::<u64>("BENCHTAP_TELEMETRY_DRAIN_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.telemetry_drain);

        let config = Self {
            artifacts_root,
            version_probe_timeout,
            reader_grace,
            artifact_read_limit,
            preview_chars,
            telemetry_drain,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_artifacts_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifacts_root = root.into();
        self
    }

    pub fn with_reader_grace(mut self, grace: Duration) -> Self {
        self.reader_grace = grace;
        self
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn with_telemetry_drain(mut self, drain: Duration) -> Self {
        self.telemetry_drain = drain;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.artifacts_root.as_os_str().is_empty() {
            anyhow::bail!("artifacts_root cannot be empty");
        }

        if self.version_probe_timeout.is_zero() {
            anyhow::bail!("version_probe_timeout must be greater than 0");
        }

        if self.reader_grace.is_zero() {
            anyhow::bail!("reader_grace must be greater than 0");
        }

        if self.artifact_read_limit == 0 {
            anyhow::bail!("artifact_read_limit must be greater than 0");
        }

        if self.preview_chars == 0 {
            anyhow::bail!("preview_chars must be greater than 0");
        }

        if self.telemetry_drain.is_zero() {
            anyhow::bail!("telemetry_drain must be greater than 0");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new("artifacts")
    }
}

/// Parses an optional variable; a malformed value is logged and ignored
fn env_parse<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring invalid {} '{}': {}, using default", name, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.artifacts_root, PathBuf::from("artifacts"));
        assert_eq!(config.version_probe_timeout, Duration::from_secs(10));
        assert_eq!(config.reader_grace, Duration::from_secs(2));
        assert_eq!(config.artifact_read_limit, 64_000);
        assert_eq!(config.preview_chars, 2000);
        assert_eq!(config.telemetry_drain, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunnerConfig::default();
        assert!(config.validate().is_ok());

        config.artifacts_root = PathBuf::new();
        assert!(config.validate().is_err());

        config.artifacts_root = PathBuf::from("/tmp/out");
        config.preview_chars = 0;
        assert!(config.validate().is_err());

        config.preview_chars = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = RunnerConfig::default()
            .with_artifacts_root("/var/lib/benchtap")
            .with_reader_grace(Duration::from_millis(250))
            .with_preview_chars(80);

        assert_eq!(config.artifacts_root, PathBuf::from("/var/lib/benchtap"));
        assert_eq!(config.reader_grace, Duration::from_millis(250));
        assert_eq!(config.preview_chars, 80);
    }

    #[test]
    fn test_config_validation_rejects_zero_durations() {
        let config = RunnerConfig::default().with_reader_grace(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = RunnerConfig::default().with_telemetry_drain(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_ignores_garbage() {
        // Unique name so parallel tests never observe it
        let name = "BENCHTAP_TEST_ENV_PARSE_GARBAGE";
        unsafe { std::env::set_var(name, "ten") };
        assert_eq!(env_parse::<u64>(name), None);
        unsafe { std::env::set_var(name, " 10 ") };
        assert_eq!(env_parse::<u64>(name), Some(10));
        unsafe { std::env::remove_var(name) };
        assert_eq!(env_parse::<u64>(name), None);
    }

    #[test]
    fn test_from_env_falls_back_on_unparsable_values() {
        // The only test in this crate that touches these variables
        unsafe {
            std::env::set_var("BENCHTAP_PREVIEW_CHARS", "lots");
            std::env::set_var("BENCHTAP_READER_GRACE_MS", "250");
        }
        let config = RunnerConfig::from_env();
        unsafe {
            std::env::remove_var("BENCHTAP_PREVIEW_CHARS");
            std::env::remove_var("BENCHTAP_READER_GRACE_MS");
        }

        let config = config.unwrap();
        assert_eq!(config.preview_chars, 2000);
        assert_eq!(config.reader_grace, Duration::from_millis(250));
    }
}
