//! Core domain types
//!
//! These types describe what to run, where to run it, and what came out.
//! They are shared between the runner (which produces them) and the
//! collector (which consumes telemetry records).

pub mod command;
pub mod dut;
pub mod result;
pub mod serial;
pub mod spec;
pub mod telemetry;
