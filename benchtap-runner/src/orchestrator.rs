//! Run orchestration
//!
//! Drives one bound test through its whole lifecycle:
//! 1. Create the run directory and its log files
//! 2. Start serial capture when the test declares a UART
//! 3. Probe the tool version
//! 4. Stream the primary command into the logs and the multiplexer
//! 5. Stop serial capture and collect declared artifacts
//! 6. Drain queued telemetry within the configured bound
//! 7. Assemble the [`RunResult`]
//!
//! Only the primary command decides the outcome. Every other step that
//! fails is recorded in the result and the run carries on.

use benchtap_core::{
    ArtifactRecord, BoundRun, RunResult, RunStatus, SerialCaptureConfig, TextEncoding, preview,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::context::{RunContext, RunLogs, artifact_file_name};
use crate::serial::SerialTap;
use crate::stream::{StreamMux, TelemetrySink};
use crate::transport::{ExecRequest, OutputLine, TIMEOUT_EXIT_CODE, Transport, transport_for};

/// Exit code reported when the command could not be executed at all
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 127;

/// Result key and telemetry source of serial capture
const UART_SOURCE: &str = "uart";

/// How long the UART forwarder may drain after capture stops
const FORWARD_DRAIN: Duration = Duration::from_millis(500);

/// How the primary command ended
struct Outcome {
    rc: i32,
    status: RunStatus,
    failure: Option<String>,
}

/// Executes bound tests and assembles their results
pub struct RunOrchestrator {
    config: RunnerConfig,
}

impl RunOrchestrator {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Executes a run over the transport its DUT asks for
    pub async fn execute(
        &self,
        run: &BoundRun,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> RunResult {
        let transport = transport_for(run.dut(), self.config.reader_grace);
        self.execute_with(run, transport, sink).await
    }

    /// Executes a run over an explicit transport
    pub async fn execute_with(
        &self,
        run: &BoundRun,
        transport: Arc<dyn Transport>,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let ctx = RunContext::new(&self.config.artifacts_root, run_id, run.name());
        let mux = Arc::new(StreamMux::new(
            sink,
            run_id.to_string(),
            run.name(),
            run.dut().host.clone(),
        ));

        info!(
            "Starting run {} of '{}' on {} ({})",
            run_id,
            run.name(),
            run.dut().host,
            run.dut().transport
        );

        let mut logs = match ctx.open_logs().await {
            Ok(logs) => logs,
            Err(e) => {
                error!(
                    "Cannot prepare run directory {}: {}",
                    ctx.run_dir.display(),
                    e
                );
                let outcome = Outcome {
                    rc: LAUNCH_FAILURE_EXIT_CODE,
                    status: RunStatus::Error,
                    failure: Some(format!("cannot prepare run directory: {}", e)),
                };
                mux.close(self.config.telemetry_drain).await;
                return self.assemble(run, run_id, started_at, &ctx, outcome, None, BTreeMap::new());
            }
        };

        let uart = run
            .serial()
            .map(|config| UartCapture::start(config, &ctx, Arc::clone(&mux)));

        let version = match &run.command().version_cmd {
            Some(probe) => self.probe_version(probe, transport.as_ref()).await,
            None => None,
        };

        let outcome = self.run_primary(run, transport.as_ref(), &mut logs, &mux).await;
        logs.close().await;

        let mut artifacts = BTreeMap::new();
        if let Some(uart) = uart {
            artifacts.insert(UART_SOURCE.to_string(), uart.finish().await);
        }
        for path in &run.command().artifacts {
            let record = self
                .collect_artifact(path, transport.as_ref(), &ctx, &mux)
                .await;
            artifacts.insert(path.clone(), record);
        }
        mux.close(self.config.telemetry_drain).await;

        let result = self.assemble(run, run_id, started_at, &ctx, outcome, version, artifacts);
        info!(
            "Run {} of '{}' finished: {} (rc={})",
            run_id, result.test_name, result.status, result.rc
        );
        result
    }

    /// Runs the version probe; any failure leaves the version unset
    async fn probe_version(&self, probe: &str, transport: &dyn Transport) -> Option<String> {
        let request = ExecRequest::new(probe).with_timeout(self.config.version_probe_timeout);
        match transport.run(&request).await {
            Ok(output) => {
                let text = if output.stdout.trim().is_empty() {
                    output.stderr.trim()
                } else {
                    output.stdout.trim()
                };
                if text.is_empty() {
                    debug!(
                        "Version probe '{}' exited {} without output",
                        probe, output.exit_code
                    );
                    None
                } else {
                    Some(text.to_string())
                }
            }
            Err(e) => {
                warn!("Version probe '{}' failed: {}", probe, e);
                None
            }
        }
    }

    /// Streams the primary command, writing each line to its log before
    /// queueing it on the multiplexer
    async fn run_primary(
        &self,
        run: &BoundRun,
        transport: &dyn Transport,
        logs: &mut RunLogs,
        mux: &StreamMux,
    ) -> Outcome {
        let request = ExecRequest::from(run.command());
        let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();

        let consume = async {
            while let Some(line) = rx.recv().await {
                logs.append(line.channel, &line.text).await;
                mux.emit_text(line.channel.as_str(), line.text, None).await;
            }
        };
        let (streamed, ()) = tokio::join!(transport.stream(&request, tx), consume);

        match streamed {
            Ok(rc) => {
                if rc == TIMEOUT_EXIT_CODE && request.timeout.is_some() {
                    warn!("Run '{}' hit its {:?} timeout", run.name(), request.timeout);
                }
                Outcome {
                    rc,
                    status: RunStatus::from_exit_code(rc),
                    failure: None,
                }
            }
            Err(e) => {
                error!("Run '{}' could not execute: {}", run.name(), e);
                mux.emit_text("stderr", format!("ERROR: {}\n", e), None).await;
                Outcome {
                    rc: LAUNCH_FAILURE_EXIT_CODE,
                    status: RunStatus::Error,
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    /// Reads one declared artifact, keeps a local copy and streams it
    async fn collect_artifact(
        &self,
        path: &str,
        transport: &dyn Transport,
        ctx: &RunContext,
        mux: &StreamMux,
    ) -> ArtifactRecord {
        let Some(content) = transport
            .read_text(path, self.config.artifact_read_limit)
            .await
        else {
            debug!("Artifact {} is missing or unreadable", path);
            return ArtifactRecord::missing(path, Some("missing or unreadable".to_string()));
        };

        let file_name = artifact_file_name(path);
        let mut record =
            ArtifactRecord::present(path, Some(preview(&content, self.config.preview_chars)));
        match ctx.persist(&file_name, &content).await {
            Ok(saved) => record = record.with_meta("saved_as", saved.to_string_lossy().into_owned()),
            Err(e) => warn!("Failed to keep a copy of artifact {}: {}", path, e),
        }

        let source = format!("artifact:{}", file_name);
        for line in content.split_inclusive('\n') {
            mux.emit_text(&source, line, None).await;
        }
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        run: &BoundRun,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        ctx: &RunContext,
        outcome: Outcome,
        version: Option<String>,
        artifacts: BTreeMap<String, ArtifactRecord>,
    ) -> RunResult {
        let mut message = format!(
            "'{}' rc={}; affects={:?}; cmd={:?}",
            run.name(),
            outcome.rc,
            run.affects(),
            run.command().cmd
        );
        if let Some(reason) = &outcome.failure {
            message.push_str(&format!("; error={}", reason));
        }

        RunResult {
            run_id,
            test_name: run.name().to_string(),
            affects: run.affects().to_vec(),
            started_at,
            ended_at: Utc::now(),
            rc: outcome.rc,
            status: outcome.status,
            stdout_path: ctx.stdout_path.clone(),
            stderr_path: ctx.stderr_path.clone(),
            version,
            artifacts,
            dut: run.dut().snapshot(),
            message,
        }
    }
}

/// Serial capture running alongside a run
struct UartCapture {
    tap: SerialTap,
    forwarder: Option<JoinHandle<()>>,
}

impl UartCapture {
    fn start(config: &SerialCaptureConfig, ctx: &RunContext, mux: Arc<StreamMux>) -> Self {
        let mut tap = SerialTap::new(config.clone(), ctx.uart_log_path());
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = match tap.start(tx) {
            Ok(()) => Some(tokio::spawn(forward_uart(rx, mux, config.encoding))),
            Err(_) => None,
        };
        Self { tap, forwarder }
    }

    /// Stops capture after the configured linger and describes the result
    async fn finish(mut self) -> ArtifactRecord {
        let config = self.tap.config().clone();
        let path = self.tap.log_path().to_string_lossy().into_owned();

        let Some(mut forwarder) = self.forwarder.take() else {
            return ArtifactRecord::missing(path, self.tap.error())
                .with_meta("port", config.device)
                .with_meta("baudrate", config.baud_rate);
        };

        self.tap.stop(config.linger).await;
        if tokio::time::timeout(FORWARD_DRAIN, &mut forwarder)
            .await
            .is_err()
        {
            forwarder.abort();
        }

        let mut record = ArtifactRecord::present(
            path,
            self.tap.preview_text(config.preview_bytes, config.encoding),
        )
        .with_meta("port", config.device)
        .with_meta("baudrate", config.baud_rate)
        .with_meta("bytes_captured", self.tap.bytes_captured());
        record.error = self.tap.error();
        record
    }
}

async fn forward_uart(
    mut chunks: UnboundedReceiver<Vec<u8>>,
    mux: Arc<StreamMux>,
    encoding: TextEncoding,
) {
    while let Some(chunk) = chunks.recv().await {
        match encoding.decode_strict(&chunk) {
            Some(text) => mux.emit_text(UART_SOURCE, text, None).await,
            None => mux.emit_binary(UART_SOURCE, &chunk, None).await,
        }
    }
}
