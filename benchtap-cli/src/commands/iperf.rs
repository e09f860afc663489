//! Throughput command handlers

use anyhow::{Context, Result};
use benchtap_core::SerialCaptureConfig;
use benchtap_runner::{Iperf3, PairCoordinator, RunOrchestrator};
use clap::{Args, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use super::TargetArgs;
use crate::config::Config;
use crate::output::{print_result, print_results};

/// iperf3 settings
#[derive(Args, Debug, Clone)]
pub struct ToolArgs {
    /// Receiver port
    #[arg(long, default_value_t = 5201)]
    port: u16,

    /// Measurement duration in seconds
    #[arg(long, default_value_t = 5)]
    duration: u64,

    /// Parallel streams
    #[arg(long, default_value_t = 1)]
    parallel: u32,
}

impl ToolArgs {
    fn tool(&self) -> Iperf3 {
        Iperf3::new()
            .with_port(self.port)
            .with_duration(Duration::from_secs(self.duration))
            .with_parallel(self.parallel)
    }
}

/// Throughput subcommands
#[derive(Subcommand)]
pub enum IperfCommands {
    /// Measure from a DUT to a receiver on this host
    HostDut {
        /// DUT host
        #[arg(long)]
        dut: String,

        /// Address under which the DUT reaches this host
        #[arg(long)]
        server_addr: String,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        tool: ToolArgs,

        /// Serial device to capture during the measurement
        #[arg(long)]
        uart: Option<String>,

        /// Serial baud rate
        #[arg(long, default_value_t = 115200)]
        baud: u32,
    },
    /// Measure every pair of DUTs
    Mesh {
        /// DUT host (repeatable, at least two)
        #[arg(long = "dut", required = true, num_args = 1..)]
        duts: Vec<String>,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        tool: ToolArgs,
    },
}

/// Handle throughput commands
pub async fn handle_iperf_command(command: IperfCommands, config: &Config) -> Result<()> {
    let orchestrator = Arc::new(RunOrchestrator::new(config.runner.clone()));

    match command {
        IperfCommands::HostDut {
            dut,
            server_addr,
            target,
            tool,
            uart,
            baud,
        } => {
            let coordinator = PairCoordinator::new(orchestrator, Arc::new(tool.tool()));
            let serial = uart.map(|device| SerialCaptureConfig::new(device).baud_rate(baud));
            let result = coordinator
                .host_to_dut(target.dut(&dut), &server_addr, serial, config.sink())
                .await
                .context("Invalid throughput run")?;
            print_result(&result)
        }
        IperfCommands::Mesh { duts, target, tool } => {
            if duts.len() < 2 {
                anyhow::bail!("mesh needs at least two DUTs");
            }
            let coordinator = PairCoordinator::new(orchestrator, Arc::new(tool.tool()));
            let duts: Vec<_> = duts.iter().map(|host| target.dut(host)).collect();
            let results = coordinator
                .mesh(&duts, config.sink())
                .await
                .context("Invalid throughput run")?;
            print_results(&results)
        }
    }
}
