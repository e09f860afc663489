//! NDJSON listener
//!
//! Accepts any number of sink connections and hands every received line
//! to the shared [`RecordStore`]. Each connection runs on its own task.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::store::RecordStore;

/// Telemetry aggregator
pub struct Collector {
    config: CollectorConfig,
    store: Arc<RecordStore>,
}

impl Collector {
    pub fn new(config: CollectorConfig) -> Self {
        let store = Arc::new(RecordStore::new(config.streams_root.clone()));
        Self { config, store }
    }

    /// Binds the configured address and serves until an accept fails
    pub async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.config.bind_addr))?;
        self.serve_on(listener).await
    }

    /// Serves connections from an already bound listener
    pub async fn serve_on(&self, listener: TcpListener) -> Result<()> {
        info!(
            "Collector listening on {}, writing to {}",
            listener.local_addr()?,
            self.store.root().display()
        );

        loop {
            let (socket, peer) = listener
                .accept()
                .await
                .context("Failed to accept connection")?;
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                match handle_connection(socket, peer, store).await {
                    Ok(stored) => debug!("Connection from {} closed after {} records", peer, stored),
                    Err(e) => warn!("Connection from {} failed: {:#}", peer, e),
                }
            });
        }
    }
}

/// Reads lines until the peer closes; returns the number stored
async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    store: Arc<RecordStore>,
) -> Result<u64> {
    debug!("Sink connected from {}", peer);
    let mut reader = BufReader::new(socket);
    let mut line = Vec::new();
    let mut stored = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        match store.ingest_line(&line).await {
            Ok(true) => stored += 1,
            Ok(false) => debug!("Skipping malformed line from {}", peer),
            Err(e) => warn!("Failed to store record from {}: {:#}", peer, e),
        }
    }

    Ok(stored)
}
