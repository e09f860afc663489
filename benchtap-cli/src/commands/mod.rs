//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod demo;
mod iperf;
mod run;
mod serve;

pub use iperf::IperfCommands;
pub use run::RunArgs;

use anyhow::Result;
use clap::{Args, Subcommand};
use benchtap_core::{DutDescriptor, TransportKind};

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one diagnostic command against a DUT
    Run(RunArgs),
    /// Throughput measurements
    Iperf {
        #[command(subcommand)]
        command: IperfCommands,
    },
    /// Run the NDJSON collector in the foreground
    Serve,
    /// Run a local demo (lspci or uname)
    Demo,
}

/// How a DUT is reached
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Reach the DUT over the remote shell
    #[arg(long)]
    remote: bool,

    /// Remote login user
    #[arg(long)]
    user: Option<String>,
}

impl TargetArgs {
    pub fn dut(&self, host: &str) -> DutDescriptor {
        let transport = if self.remote {
            TransportKind::Remote
        } else {
            TransportKind::Local
        };
        let dut = DutDescriptor::new(host, transport);
        match &self.user {
            Some(user) => dut.with_user(user),
            None => dut,
        }
    }
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run_command(args, config).await,
        Commands::Iperf { command } => iperf::handle_iperf_command(command, config).await,
        Commands::Serve => serve::handle_serve_command().await,
        Commands::Demo => demo::handle_demo_command(config).await,
    }
}
