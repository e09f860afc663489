//! Throughput pairing
//!
//! Coordinates a receiver on one host with a sender on another:
//! 1. Start the receiver in the background with a buffered, timed run
//! 2. Wait a short settle delay so it is listening
//! 3. Run the sender as a normal orchestrated run
//! 4. Join the receiver and fold its output into the sender's result
//!
//! Two modes are offered: the local host against one DUT, and a mesh over
//! every unordered pair of DUTs.

use benchtap_core::{
    ArtifactRecord, ConfigError, DutDescriptor, RunResult, SerialCaptureConfig, preview, test,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::orchestrator::RunOrchestrator;
use crate::stream::{StreamMux, TelemetrySink};
use crate::transport::{
    ExecRequest, LocalTransport, ProcOutput, Transport, TransportError, transport_for,
};

const HOST_SETTLE_DELAY: Duration = Duration::from_millis(400);
const MESH_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Slack added to the measurement duration for each timeout
const SENDER_SLACK: Duration = Duration::from_secs(20);
const RECEIVER_SLACK: Duration = Duration::from_secs(30);
const JOIN_SLACK: Duration = Duration::from_secs(40);

const HOST_RESULT_KEY: &str = "host_iperf_server";
const MESH_RESULT_KEY: &str = "server_iperf";
const RECEIVER_FILE: &str = "iperf_server.json";

/// A receiver/sender throughput measurement tool
pub trait ThroughputTool: Send + Sync {
    /// Command that serves exactly one measurement and prints its report
    fn receiver_command(&self) -> String;

    /// Command that measures against the receiver at `target`
    fn sender_command(&self, target: &str) -> String;

    fn version_command(&self) -> String;

    /// Report file the sender leaves behind, collected as an artifact
    fn client_report(&self) -> String;

    fn measurement_duration(&self) -> Duration;
}

/// iperf3 with JSON reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iperf3 {
    pub port: u16,
    pub duration: Duration,
    pub parallel: u32,
}

impl Iperf3 {
    pub fn new() -> Self {
        Self {
            port: 5201,
            duration: Duration::from_secs(5),
            parallel: 1,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_parallel(mut self, parallel: u32) -> Self {
        self.parallel = parallel;
        self
    }
}

impl Default for Iperf3 {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputTool for Iperf3 {
    fn receiver_command(&self) -> String {
        format!("iperf3 -s -1 -J -p {}", self.port)
    }

    fn sender_command(&self, target: &str) -> String {
        format!(
            "iperf3 -c {} -p {} -J -t {} -P {} | tee {}",
            target,
            self.port,
            self.duration.as_secs(),
            self.parallel,
            self.client_report()
        )
    }

    fn version_command(&self) -> String {
        "iperf3 --version || true".to_string()
    }

    fn client_report(&self) -> String {
        "iperf_client.json".to_string()
    }

    fn measurement_duration(&self) -> Duration {
        self.duration
    }
}

/// Where the receiver's output goes in the sender's result
struct Fold<'a> {
    key: &'a str,
    server: Option<&'a str>,
}

/// Runs throughput measurements between hosts
pub struct PairCoordinator {
    orchestrator: Arc<RunOrchestrator>,
    tool: Arc<dyn ThroughputTool>,
    settle_delay: Option<Duration>,
}

impl PairCoordinator {
    pub fn new(orchestrator: Arc<RunOrchestrator>, tool: Arc<dyn ThroughputTool>) -> Self {
        Self {
            orchestrator,
            tool,
            settle_delay: None,
        }
    }

    /// Overrides the delay between starting the receiver and the sender
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    /// Measures from `dut` to a receiver on the local host
    ///
    /// `server_addr` is the address under which the DUT reaches this host.
    pub async fn host_to_dut(
        &self,
        dut: DutDescriptor,
        server_addr: &str,
        serial: Option<SerialCaptureConfig>,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> Result<RunResult, ConfigError> {
        let receiver_transport: Arc<dyn Transport> = Arc::new(
            LocalTransport::new().with_reader_grace(self.orchestrator.config().reader_grace),
        );
        let settle = self.settle_delay.unwrap_or(HOST_SETTLE_DELAY);
        let fold = Fold {
            key: HOST_RESULT_KEY,
            server: None,
        };

        info!("Throughput run from {} to local receiver at {}", dut.host, server_addr);
        self.measure(
            "iperf-host-dut".to_string(),
            dut,
            server_addr,
            receiver_transport,
            settle,
            serial,
            fold,
            sink,
        )
        .await
    }

    /// Measures every unordered pair `(i, j)`, `i < j`
    ///
    /// DUT `i` receives and DUT `j` sends. Pairs run one after another.
    pub async fn mesh(
        &self,
        duts: &[DutDescriptor],
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> Result<Vec<RunResult>, ConfigError> {
        let settle = self.settle_delay.unwrap_or(MESH_SETTLE_DELAY);
        let mut results = Vec::new();

        for (i, receiver) in duts.iter().enumerate() {
            for sender in &duts[i + 1..] {
                info!("Throughput run from {} to {}", sender.host, receiver.host);
                let receiver_transport =
                    transport_for(receiver, self.orchestrator.config().reader_grace);
                let fold = Fold {
                    key: MESH_RESULT_KEY,
                    server: Some(receiver.host.as_str()),
                };
                let result = self
                    .measure(
                        format!("iperf-{}-to-{}", sender.host, receiver.host),
                        sender.clone(),
                        &receiver.throughput_address(),
                        receiver_transport,
                        settle,
                        None,
                        fold,
                        sink.clone(),
                    )
                    .await?;
                results.push(result);
            }
        }

        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn measure(
        &self,
        name: String,
        sender: DutDescriptor,
        target: &str,
        receiver_transport: Arc<dyn Transport>,
        settle: Duration,
        serial: Option<SerialCaptureConfig>,
        fold: Fold<'_>,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> Result<RunResult, ConfigError> {
        let duration = self.tool.measurement_duration();

        let mut spec = test(name)
            .affects(["net"])
            .cmd(self.tool.sender_command(target))
            .timeout(duration + SENDER_SLACK)
            .version(self.tool.version_command())
            .artifact(self.tool.client_report());
        if let Some(serial) = serial {
            spec = spec.uart(serial);
        }
        let run = spec.bind(sender)?;

        let receiver = self.spawn_receiver(receiver_transport, duration + RECEIVER_SLACK);
        tokio::time::sleep(settle).await;

        let mut result = self.orchestrator.execute(&run, sink.clone()).await;
        let received = join_receiver(receiver, duration + JOIN_SLACK).await;
        self.fold_receiver(&mut result, received, fold, sink).await;
        Ok(result)
    }

    fn spawn_receiver(
        &self,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> JoinHandle<Result<ProcOutput, TransportError>> {
        let request = ExecRequest::new(self.tool.receiver_command()).with_timeout(timeout);
        tokio::spawn(async move { transport.run(&request).await })
    }

    /// Saves the receiver's report next to the sender's logs and streams it
    async fn fold_receiver(
        &self,
        result: &mut RunResult,
        received: Result<ProcOutput, String>,
        fold: Fold<'_>,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) {
        let saved = result
            .run_dir()
            .map(|dir| dir.join(RECEIVER_FILE))
            .unwrap_or_else(|| RECEIVER_FILE.into());
        let saved_str = saved.to_string_lossy().into_owned();

        let mut record = match received {
            Ok(output) => {
                let content = if output.stdout.is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                if let Err(e) = tokio::fs::write(&saved, &content).await {
                    warn!("Failed to save receiver output to {}: {}", saved_str, e);
                }

                let mux = StreamMux::new(
                    sink,
                    result.run_id.to_string(),
                    result.test_name.clone(),
                    host_of(result),
                );
                let meta = fold.server.map(|server| {
                    let mut meta = Map::new();
                    meta.insert("server".to_string(), Value::String(server.to_string()));
                    meta
                });
                for line in content.split_inclusive('\n') {
                    mux.emit_text(fold.key, line, meta.clone()).await;
                }
                mux.close(self.orchestrator.config().telemetry_drain).await;

                ArtifactRecord::present(
                    saved_str,
                    Some(preview(&content, self.orchestrator.config().preview_chars)),
                )
            }
            Err(reason) => {
                warn!("Receiver for '{}' produced no result: {}", result.test_name, reason);
                ArtifactRecord::missing(saved_str, Some(format!("receiver produced no result: {}", reason)))
            }
        };

        if let Some(server) = fold.server {
            record = record.with_meta("server", server);
        }
        result.artifacts.insert(fold.key.to_string(), record);
    }
}

async fn join_receiver(
    mut receiver: JoinHandle<Result<ProcOutput, TransportError>>,
    timeout: Duration,
) -> Result<ProcOutput, String> {
    match tokio::time::timeout(timeout, &mut receiver).await {
        Ok(Ok(Ok(output))) => Ok(output),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(e)) => Err(format!("receiver task failed: {}", e)),
        Err(_) => {
            receiver.abort();
            Err(format!("receiver did not finish within {:?}", timeout))
        }
    }
}

fn host_of(result: &RunResult) -> String {
    result
        .dut
        .get("host")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::test_support::RecordingSink;
    use benchtap_core::{RunStatus, TransportKind};
    use std::path::PathBuf;

    /// Tool whose receiver prints a fixed report and whose sender echoes
    /// its target into a report file
    struct ScriptedTool {
        report: PathBuf,
    }

    impl ThroughputTool for ScriptedTool {
        fn receiver_command(&self) -> String {
            "printf '{\"role\":\"receiver\"}\\n'".to_string()
        }

        fn sender_command(&self, target: &str) -> String {
            format!("echo sent to {} | tee {}", target, self.report.display())
        }

        fn version_command(&self) -> String {
            "echo scripted 1.0".to_string()
        }

        fn client_report(&self) -> String {
            self.report.to_string_lossy().into_owned()
        }

        fn measurement_duration(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    fn coordinator(root: &std::path::Path, report: PathBuf) -> PairCoordinator {
        let orchestrator = Arc::new(RunOrchestrator::new(RunnerConfig::new(root)));
        PairCoordinator::new(orchestrator, Arc::new(ScriptedTool { report }))
            .with_settle_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_iperf3_commands() {
        let tool = Iperf3::new().with_port(5301).with_duration(Duration::from_secs(10)).with_parallel(4);
        assert_eq!(tool.receiver_command(), "iperf3 -s -1 -J -p 5301");
        assert_eq!(
            tool.sender_command("10.0.0.2"),
            "iperf3 -c 10.0.0.2 -p 5301 -J -t 10 -P 4 | tee iperf_client.json"
        );
        assert_eq!(tool.version_command(), "iperf3 --version || true");
        assert_eq!(Iperf3::default().port, 5201);
        assert_eq!(Iperf3::default().measurement_duration(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_host_to_dut_folds_receiver_output() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let report = work.path().join("client.json");
        let sink = Arc::new(RecordingSink::default());

        let result = coordinator(dir.path(), report.clone())
            .host_to_dut(DutDescriptor::local(), "192.168.1.10", None, Some(sink.clone()))
            .await
            .unwrap();

        assert_eq!(result.test_name, "iperf-host-dut");
        assert_eq!(result.affects, vec!["net".to_string()]);
        assert_eq!(result.status, RunStatus::Pass);
        assert_eq!(result.version.as_deref(), Some("scripted 1.0"));
        assert_eq!(
            std::fs::read_to_string(&result.stdout_path).unwrap(),
            "sent to 192.168.1.10\n"
        );

        let folded = &result.artifacts["host_iperf_server"];
        assert!(folded.exists);
        assert_eq!(folded.preview.as_deref(), Some("{\"role\":\"receiver\"}\n"));
        let saved = result.run_dir().unwrap().join("iperf_server.json");
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "{\"role\":\"receiver\"}\n");

        assert_eq!(sink.text_of("host_iperf_server"), "{\"role\":\"receiver\"}\n");
        let folded_record = sink
            .records()
            .into_iter()
            .find(|r| r.source == "host_iperf_server")
            .unwrap();
        assert_eq!(folded_record.run_id, result.run_id.to_string());
        assert!(result.artifacts[&report.to_string_lossy().into_owned()].exists);
    }

    #[tokio::test]
    async fn test_mesh_covers_every_pair_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let duts = vec![
            DutDescriptor::new("dut-a", TransportKind::Local).with_meta("iperf_ip", "10.0.0.1"),
            DutDescriptor::new("dut-b", TransportKind::Local).with_meta("ip", "10.0.0.2"),
            DutDescriptor::new("dut-c", TransportKind::Local),
        ];

        let results = coordinator(dir.path(), work.path().join("client.json"))
            .mesh(&duts, Some(sink.clone()))
            .await
            .unwrap();

        let names: Vec<&str> = results.iter().map(|r| r.test_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["iperf-dut-b-to-dut-a", "iperf-dut-c-to-dut-a", "iperf-dut-c-to-dut-b"]
        );

        let first_stdout = std::fs::read_to_string(&results[0].stdout_path).unwrap();
        assert_eq!(first_stdout, "sent to 10.0.0.1\n");
        let last_stdout = std::fs::read_to_string(&results[2].stdout_path).unwrap();
        assert_eq!(last_stdout, "sent to 10.0.0.2\n");

        let folded = &results[2].artifacts["server_iperf"];
        assert!(folded.exists);
        assert_eq!(folded.extra["server"], "dut-b");

        let tagged: Vec<_> = sink
            .records()
            .into_iter()
            .filter(|r| r.source == "server_iperf")
            .collect();
        assert_eq!(tagged.len(), 3);
        assert_eq!(tagged[0].meta.as_ref().unwrap()["server"], "dut-a");
        assert_eq!(tagged[2].dut, "dut-c");
    }

    #[tokio::test]
    async fn test_mesh_of_one_dut_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let results = coordinator(dir.path(), dir.path().join("client.json"))
            .mesh(&[DutDescriptor::local()], None)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_receiver_is_recorded() {
        let receiver = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, TransportError>(ProcOutput::default())
        });
        let err = join_receiver(receiver, Duration::from_millis(50)).await.unwrap_err();
        assert!(err.contains("did not finish"));
    }
}
