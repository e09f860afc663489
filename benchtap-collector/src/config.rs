//! Collector configuration

use std::path::PathBuf;

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Address the NDJSON listener binds to (e.g., "0.0.0.0:9901")
    pub bind_addr: String,

    /// Directory receiving `<run_id>/<test>/` stream files
    pub streams_root: PathBuf,
}

impl CollectorConfig {
    pub fn new(bind_addr: impl Into<String>, streams_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            streams_root: streams_root.into(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// - BENCHTAP_COLLECTOR_BIND (optional, default: 0.0.0.0:9901)
    /// - BENCHTAP_STREAMS_ROOT (optional, default: streams)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = std::env::var("BENCHTAP_COLLECTOR_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9901".to_string());
        let streams_root = std::env::var("BENCHTAP_STREAMS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("streams"));

        let config = Self::new(bind_addr, streams_root);
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if !self.bind_addr.contains(':') {
            anyhow::bail!("bind_addr must be host:port");
        }

        if self.streams_root.as_os_str().is_empty() {
            anyhow::bail!("streams_root cannot be empty");
        }

        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::new("0.0.0.0:9901", "streams")
    }
}
