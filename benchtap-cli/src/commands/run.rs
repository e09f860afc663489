//! Run command handler
//!
//! Builds a test specification from flags, binds it to a DUT and runs it.

use anyhow::{Context, Result};
use benchtap_core::{SerialCaptureConfig, TestSpecification, test};
use benchtap_runner::RunOrchestrator;
use clap::Args;
use std::time::Duration;

use super::TargetArgs;
use crate::config::Config;
use crate::output::print_result;

/// Arguments of a single orchestrated run
#[derive(Args)]
pub struct RunArgs {
    /// Test name
    #[arg(long)]
    name: String,

    /// Command line executed on the DUT
    #[arg(long)]
    cmd: String,

    /// DUT host
    #[arg(long, default_value = "localhost")]
    host: String,

    #[command(flatten)]
    target: TargetArgs,

    /// Affected subsystem tag (repeatable)
    #[arg(long = "affects")]
    affects: Vec<String>,

    /// Timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Environment variable KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Working directory on the DUT
    #[arg(long)]
    cwd: Option<String>,

    /// Version probe command
    #[arg(long)]
    version_cmd: Option<String>,

    /// Artifact path to collect after the run (repeatable)
    #[arg(long = "artifact")]
    artifacts: Vec<String>,

    /// Serial device to capture during the run
    #[arg(long)]
    uart: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115200)]
    baud: u32,
}

impl RunArgs {
    fn specification(&self) -> TestSpecification {
        let mut spec = test(&self.name)
            .affects(self.affects.iter().cloned())
            .cmd(&self.cmd);
        if let Some(secs) = self.timeout {
            spec = spec.timeout(Duration::from_secs(secs));
        }
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            spec = spec.cwd(cwd);
        }
        if let Some(probe) = &self.version_cmd {
            spec = spec.version(probe);
        }
        for path in &self.artifacts {
            spec = spec.artifact(path);
        }
        if let Some(device) = &self.uart {
            spec = spec.uart(SerialCaptureConfig::new(device).baud_rate(self.baud));
        }
        spec
    }
}

/// Handle the run command
pub async fn handle_run_command(args: RunArgs, config: &Config) -> Result<()> {
    let run = args
        .specification()
        .bind(args.target.dut(&args.host))
        .context("Invalid test specification")?;

    let orchestrator = RunOrchestrator::new(config.runner.clone());
    let result = orchestrator.execute(&run, config.sink()).await;
    print_result(&result)
}

/// Parses `KEY=VALUE`
fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("MODE=fast=1").unwrap(),
            ("MODE".to_string(), "fast=1".to_string())
        );
        assert!(parse_key_val("MODE").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_specification_from_flags() {
        let args = RunArgs {
            name: "pcie".to_string(),
            cmd: "lspci -vv".to_string(),
            host: "localhost".to_string(),
            target: TargetArgs {
                remote: false,
                user: None,
            },
            affects: vec!["pcie".to_string()],
            timeout: Some(10),
            env: vec![("LC_ALL".to_string(), "C".to_string())],
            cwd: None,
            version_cmd: Some("lspci --version".to_string()),
            artifacts: vec!["/tmp/out.txt".to_string()],
            uart: Some("/dev/ttyUSB0".to_string()),
            baud: 9600,
        };

        let run = args.specification().bind(args.target.dut(&args.host)).unwrap();
        assert_eq!(run.name(), "pcie");
        assert_eq!(run.affects(), ["pcie".to_string()]);
        assert_eq!(run.command().timeout, Some(Duration::from_secs(10)));
        assert_eq!(run.command().env["LC_ALL"], "C");
        assert_eq!(run.command().artifacts, vec!["/tmp/out.txt".to_string()]);
        assert_eq!(run.serial().unwrap().baud_rate, 9600);
    }
}
