//! Benchtap Runner
//!
//! The execution-and-streaming engine.
//!
//! This crate contains:
//! - Transports: run and stream commands on local or remote hosts
//! - Stream multiplexing and telemetry sinks
//! - Serial console capture
//! - The per-run orchestrator tying all channels into one timeline
//! - Throughput pairing between hosts

pub mod config;
pub mod context;
pub mod orchestrator;
pub mod pairing;
pub mod serial;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::RunnerConfig;
pub use orchestrator::{LAUNCH_FAILURE_EXIT_CODE, RunOrchestrator};
pub use pairing::{Iperf3, PairCoordinator, ThroughputTool};
pub use serial::{SerialTap, TapState};
pub use stream::{NullSink, SinkError, StreamMux, TcpSink, TelemetrySink};
pub use transport::{
    Channel, ExecRequest, LocalTransport, OutputLine, ProcOutput, RemoteTransport,
    TIMEOUT_EXIT_CODE, Transport, TransportError, transport_for,
};
