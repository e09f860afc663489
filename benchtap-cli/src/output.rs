//! Result output
//!
//! Result JSON goes to stdout; a short coloured status line goes to stderr.

use anyhow::Result;
use benchtap_core::{RunResult, RunStatus};
use colored::*;

/// Prints one result as indented JSON followed by its status line
pub fn print_result(result: &RunResult) -> Result<()> {
    println!("{}", result.to_json_pretty()?);
    print_status(result);
    Ok(())
}

/// Prints several results as one JSON array followed by their status lines
pub fn print_results(results: &[RunResult]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(results)?);
    for result in results {
        print_status(result);
    }
    Ok(())
}

fn print_status(result: &RunResult) {
    let elapsed = result
        .ended_at
        .signed_duration_since(result.started_at)
        .num_milliseconds() as f64
        / 1000.0;
    eprintln!(
        "{} {} {} rc={} in {:.1}s",
        "▸".cyan(),
        result.test_name.bold(),
        colorize_status(result.status),
        result.rc,
        elapsed
    );
    if let Some(dir) = result.run_dir() {
        eprintln!("  {}", dir.display().to_string().dimmed());
    }
    for (key, artifact) in &result.artifacts {
        if let Some(error) = &artifact.error {
            eprintln!("  {} {}: {}", "⚠".yellow(), key, error.yellow());
        }
    }
}

fn colorize_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pass => "PASS".green().bold(),
        RunStatus::Fail => "FAIL".red().bold(),
        RunStatus::Error => "ERROR".magenta().bold(),
    }
}
