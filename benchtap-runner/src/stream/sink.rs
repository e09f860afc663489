//! Telemetry sink abstraction

use async_trait::async_trait;
use benchtap_core::TelemetryRecord;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a sink
///
/// The multiplexer swallows these; a sink can never change a run outcome.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("not reconnecting to {addr} yet after a failed connect")]
    BackingOff { addr: String },

    #[error("failed to write record: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination of telemetry records
///
/// Implementations must be usable from several runs at once and do their
/// own internal locking.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Prepares the sink; sinks that connect lazily may do nothing here
    async fn open(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Releases any held connection
    async fn close(&self) {}

    /// Delivers one record
    async fn send(&self, record: &TelemetryRecord) -> Result<(), SinkError>;
}

/// Sink that discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn send(&self, _record: &TelemetryRecord) -> Result<(), SinkError> {
        Ok(())
    }
}
