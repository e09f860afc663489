//! Demo command handler
//!
//! Runs `lspci -vv` (or `uname -a` where lspci is not installed) on the
//! local host and streams it to the collector.

use anyhow::{Context, Result};
use benchtap_core::{DutDescriptor, test};
use benchtap_runner::RunOrchestrator;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::output::print_result;

/// Handle the demo command
pub async fn handle_demo_command(config: &Config) -> Result<()> {
    let probe = if on_path("lspci") {
        "lspci -vv"
    } else {
        "uname -a"
    };

    let run = test("demo")
        .affects(["sys"])
        .cmd(format!("{} | tee demo.log", probe))
        .timeout(Duration::from_secs(10))
        .artifact("demo.log")
        .bind(DutDescriptor::local())
        .context("Invalid demo specification")?;

    let orchestrator = RunOrchestrator::new(config.runner.clone());
    let result = orchestrator.execute(&run, config.sink()).await;
    print_result(&result)
}

/// Whether an executable of this name is found on `PATH`
fn on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_file(&dir.join(program))))
        .unwrap_or(false)
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
