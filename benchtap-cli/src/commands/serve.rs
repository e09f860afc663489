//! Serve command handler

use anyhow::Result;
use benchtap_collector::{Collector, CollectorConfig};
use tracing::info;

/// Runs the collector until interrupted
pub async fn handle_serve_command() -> Result<()> {
    let collector = Collector::new(CollectorConfig::from_env()?);

    tokio::select! {
        served = collector.serve() => served,
        _ = tokio::signal::ctrl_c() => {
            info!("Collector interrupted, shutting down");
            Ok(())
        }
    }
}
