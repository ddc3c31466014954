//! # Flow Configuration Check
//!
//! Loads a flow configuration the same way the service does (defaults, TOML
//! file, `LBFLOW__` environment overrides), validates it and prints the
//! effective batch limits and retry policy.

use anyhow::Context;
use clap::Parser;
use lbflow_core::config::FlowConfig;
use lbflow_core::constants::TaskType;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "flow-config-check")]
#[command(about = "Validate lbflow configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML); omit to check defaults plus environment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let config = FlowConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("invalid configuration in {}", path.display()),
        None => "invalid default configuration".to_string(),
    })?;
    info!("Configuration is valid");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("✅ configuration valid");
    println!();
    println!("{:<24} {:>8}", "operation", "limit");
    for task_type in TaskType::all() {
        println!(
            "{:<24} {:>8}",
            task_type.as_str(),
            config.batch_limits.limit_for(*task_type)
        );
    }
    println!();
    println!(
        "retry: {} attempts, sleep {}..={} ms",
        config.retry.max_attempts, config.retry.min_sleep_ms, config.retry.max_sleep_ms
    );
    println!("default source: {}", config.default_source);
    Ok(())
}
