//! TCP telemetry sink
//!
//! Sends one NDJSON line per record to the collector. The connection is
//! opened on first send. A failed send triggers exactly one
//! reconnect-and-resend; if that fails too the record is dropped.
//!
//! A failed connect puts the sink into back-off: until it expires every
//! send fails at once instead of waiting on another connect timeout.

use async_trait::async_trait;
use benchtap_core::TelemetryRecord;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::sink::{SinkError, TelemetrySink};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Connection {
    stream: Option<TcpStream>,
    /// Set after a failed connect; no connect is attempted before it
    retry_at: Option<Instant>,
}

/// Reconnecting TCP sink
///
/// The connection sits behind an async mutex so one sink can be shared by
/// concurrent runs.
pub struct TcpSink {
    addr: String,
    connect_timeout: Duration,
    backoff: Duration,
    conn: Mutex<Connection>,
}

impl TcpSink {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_addr(format!("{}:{}", host, port))
    }

    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: CONNECT_TIMEOUT,
            backoff: CONNECT_BACKOFF,
            conn: Mutex::new(Connection::default()),
        }
    }

    async fn connect(&self, conn: &mut Connection) -> Result<(), SinkError> {
        if conn.retry_at.is_some_and(|at| Instant::now() < at) {
            return Err(SinkError::BackingOff {
                addr: self.addr.clone(),
            });
        }

        let connected =
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(source)) => Err(SinkError::Connect {
                    addr: self.addr.clone(),
                    source,
                }),
                Err(_) => Err(SinkError::ConnectTimeout {
                    addr: self.addr.clone(),
                    timeout: self.connect_timeout,
                }),
            };

        match connected {
            Ok(stream) => {
                debug!("Telemetry sink connected to {}", self.addr);
                conn.stream = Some(stream);
                conn.retry_at = None;
                Ok(())
            }
            Err(e) => {
                debug!("Telemetry sink backing off {:?}: {}", self.backoff, e);
                conn.retry_at = Some(Instant::now() + self.backoff);
                Err(e)
            }
        }
    }

    async fn write_line(&self, conn: &mut Connection, line: &[u8]) -> Result<(), SinkError> {
        if conn.stream.is_none() {
            self.connect(conn).await?;
        }
        if let Some(stream) = conn.stream.as_mut() {
            stream.write_all(line).await?;
            stream.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for TcpSink {
    async fn open(&self) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().await;
        self.connect(&mut conn).await
    }

    async fn close(&self) {
        if let Some(mut stream) = self.conn.lock().await.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn send(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let line = record.to_line()?;
        let mut conn = self.conn.lock().await;
        let was_connected = conn.stream.is_some();

        match self.write_line(&mut conn, line.as_bytes()).await {
            Ok(()) => Ok(()),
            // The connect itself failed; the back-off now applies
            Err(e) if !was_connected => {
                conn.stream = None;
                Err(e)
            }
            Err(e) => {
                debug!("Telemetry send to {} failed ({}), reconnecting", self.addr, e);
                conn.stream = None;
                let retried = self.write_line(&mut conn, line.as_bytes()).await;
                if retried.is_err() {
                    conn.stream = None;
                }
                retried
            }
        }
    }
}
