//! Stream multiplexer
//!
//! One multiplexer belongs to one run. It assigns every source name a
//! stable stream id on first use and numbers every record it emits with a
//! single gap-free sequence counter.
//!
//! Emitting only queues a record. A forwarder task delivers the queue to
//! the sink in sequence order, so a slow collector never holds up the
//! caller. [`StreamMux::close`] drains what is left within a bound.

use benchtap_core::{Payload, TelemetryRecord};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::sink::TelemetrySink;

#[derive(Default)]
struct MuxState {
    seq: u64,
    streams: HashMap<String, String>,
    queue: Option<UnboundedSender<TelemetryRecord>>,
    forwarder: Option<JoinHandle<()>>,
}

impl MuxState {
    fn stream_id(&mut self, source: &str) -> String {
        self.streams
            .entry(source.to_string())
            .or_insert_with(|| {
                let suffix = Uuid::new_v4().simple().to_string();
                format!("{}-{}", source, &suffix[..8])
            })
            .clone()
    }
}

/// Tags and sequences output from concurrent sources of one run
pub struct StreamMux {
    run_id: String,
    test: String,
    dut: String,
    state: Mutex<MuxState>,
}

impl StreamMux {
    /// Creates a multiplexer; without a sink every emit is a no-op
    ///
    /// With a sink this spawns the forwarder task, so it must be called
    /// from within a Tokio runtime.
    pub fn new(
        sink: Option<Arc<dyn TelemetrySink>>,
        run_id: impl Into<String>,
        test: impl Into<String>,
        dut: impl Into<String>,
    ) -> Self {
        let run_id = run_id.into();
        let mut state = MuxState::default();
        if let Some(sink) = sink {
            let (tx, rx) = mpsc::unbounded_channel();
            state.queue = Some(tx);
            state.forwarder = Some(tokio::spawn(forward(rx, sink, run_id.clone())));
        }

        Self {
            run_id,
            test: test.into(),
            dut: dut.into(),
            state: Mutex::new(state),
        }
    }

    /// Emits a UTF-8 text record
    pub async fn emit_text(&self, source: &str, text: impl Into<String>, meta: Option<Map<String, Value>>) {
        self.emit(source, Payload::text(text), meta).await;
    }

    /// Emits a base64-encoded binary record
    pub async fn emit_binary(&self, source: &str, bytes: &[u8], meta: Option<Map<String, Value>>) {
        self.emit(source, Payload::blob(bytes), meta).await;
    }

    /// Stream id for a source, assigned on first use
    pub async fn stream_id(&self, source: &str) -> String {
        self.state.lock().await.stream_id(source)
    }

    /// Sequence number of the last emitted record (0 before the first)
    pub async fn emitted(&self) -> u64 {
        self.state.lock().await.seq
    }

    /// Stops accepting records and waits up to `drain` for the queue to
    /// reach the sink
    ///
    /// Records still queued when `drain` runs out are dropped. Emits after
    /// close are no-ops.
    pub async fn close(&self, drain: Duration) {
        let forwarder = {
            let mut state = self.state.lock().await;
            state.queue = None;
            state.forwarder.take()
        };
        let Some(mut forwarder) = forwarder else {
            return;
        };

        if tokio::time::timeout(drain, &mut forwarder).await.is_err() {
            debug!(
                "Telemetry of run {} not drained within {:?}, dropping the rest",
                self.run_id, drain
            );
            forwarder.abort();
        }
    }

    async fn emit(&self, source: &str, payload: Payload, meta: Option<Map<String, Value>>) {
        // Numbered and queued under one lock so queue order is sequence order
        let mut state = self.state.lock().await;
        let Some(queue) = state.queue.clone() else {
            return;
        };

        state.seq += 1;
        let record = TelemetryRecord {
            ts: chrono::Utc::now(),
            seq: state.seq,
            run_id: self.run_id.clone(),
            test: self.test.clone(),
            dut: self.dut.clone(),
            source: source.to_string(),
            stream_id: state.stream_id(source),
            payload,
            meta,
        };

        if queue.send(record).is_err() {
            debug!("Telemetry forwarder of run {} is gone", self.run_id);
        }
    }
}

/// Delivers queued records to the sink until the queue closes
async fn forward(
    mut queue: UnboundedReceiver<TelemetryRecord>,
    sink: Arc<dyn TelemetrySink>,
    run_id: String,
) {
    while let Some(record) = queue.recv().await {
        if let Err(e) = sink.send(&record).await {
            debug!(
                "Dropping telemetry record {} of run {}: {}",
                record.seq, run_id, e
            );
        }
    }
}
