//! Benchtap CLI
//!
//! Command-line interface for running diagnostics against DUTs and for
//! hosting the telemetry collector.

mod commands;
mod config;
mod output;

use anyhow::Result;
use benchtap_runner::RunnerConfig;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "benchtap")]
#[command(about = "Diagnostic execution and telemetry streaming", long_about = None)]
struct Cli {
    /// Run the NDJSON collector in the foreground
    #[arg(long)]
    serve: bool,

    /// Run a local demo (lspci or uname) and print its result
    #[arg(long)]
    demo: bool,

    /// Collector host telemetry is streamed to
    #[arg(long, env = "BENCHTAP_COLLECTOR_HOST", default_value = "127.0.0.1")]
    collector_host: String,

    /// Collector port telemetry is streamed to
    #[arg(long, env = "BENCHTAP_COLLECTOR_PORT", default_value_t = 9901)]
    collector_port: u16,

    /// Do not stream telemetry
    #[arg(long)]
    no_stream: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Filter used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "benchtap_runner=info,benchtap_collector=info,benchtap_cli=info";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries result JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        collector_host: cli.collector_host,
        collector_port: cli.collector_port,
        no_stream: cli.no_stream,
        runner: RunnerConfig::from_env()?,
    };

    let command = if cli.serve {
        Commands::Serve
    } else if cli.demo {
        Commands::Demo
    } else {
        match cli.command {
            Some(command) => command,
            None => {
                use clap::CommandFactory;
                Cli::command().print_help()?;
                return Ok(());
            }
        }
    };

    handle_command(command, &config).await
}
