//! Benchtap Core
//!
//! Core types for the benchtap diagnostic execution engine.
//!
//! This crate contains:
//! - Domain types: command specifications, DUT descriptors, run results
//! - The fluent test specification builder and its bound form
//! - The telemetry record wire format shared with the collector
//! - Error types for configuration errors and degraded channels

pub mod domain;
pub mod error;

pub use domain::command::CommandSpec;
pub use domain::dut::{DutDescriptor, TransportKind};
pub use domain::result::{ArtifactRecord, RunResult, RunStatus, preview};
pub use domain::serial::{DataBits, Parity, SerialCaptureConfig, StopBits, TextEncoding};
pub use domain::spec::{BoundRun, TestSpecification, test};
pub use domain::telemetry::{Payload, TelemetryRecord};
pub use error::{ConfigError, Degraded};
