//! Telemetry streaming
//!
//! The multiplexer tags, sequences and forwards captured output from
//! several concurrent sources to a pluggable sink:
//! - `NullSink`: drops everything
//! - `TcpSink`: NDJSON over a lazily opened, reconnecting TCP connection

mod mux;
mod sink;
mod tcp;

pub use mux::StreamMux;
pub use sink::{NullSink, SinkError, TelemetrySink};
pub use tcp::TcpSink;
