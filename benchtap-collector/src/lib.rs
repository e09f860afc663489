//! Benchtap Collector
//!
//! Central aggregator for telemetry streams. Sinks connect over TCP and
//! send one NDJSON record per line; the collector files each record by
//! run, test and stream.

pub mod config;
pub mod server;
pub mod store;

pub use config::CollectorConfig;
pub use server::Collector;
pub use store::{RecordStore, sanitize_component};
