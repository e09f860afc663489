//! Configuration module
//!
//! Handles CLI configuration: where telemetry goes and how runs are set up.

use benchtap_runner::{RunnerConfig, TcpSink, TelemetrySink};
use std::sync::Arc;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host of the telemetry collector
    pub collector_host: String,

    /// Port of the telemetry collector
    pub collector_port: u16,

    /// Disables telemetry streaming entirely
    pub no_stream: bool,

    /// Settings for the run orchestrator
    pub runner: RunnerConfig,
}

impl Config {
    /// Sink for run telemetry, unless streaming is disabled
    pub fn sink(&self) -> Option<Arc<dyn TelemetrySink>> {
        if self.no_stream {
            None
        } else {
            Some(Arc::new(TcpSink::new(
                &self.collector_host,
                self.collector_port,
            )))
        }
    }
}
