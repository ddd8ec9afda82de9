//! Modernomad E2E CLI - Main Entry Point
//!
//! Runs browser scenarios against a local Modernomad stack, resets its test
//! data and lists the available scenarios.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nomad_e2e::HarnessConfig;

mod commands;
mod output;

use commands::{list, reset, run};

/// Modernomad E2E - cross-origin browser scenarios
#[derive(Parser)]
#[command(name = "nomad-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file
    #[arg(
        long,
        default_value = "nomad-e2e.toml",
        env = "NOMAD_E2E_CONFIG",
        global = true
    )]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios against the application
    Run(run::RunArgs),

    /// Flush and reseed the application's test data
    Reset,

    /// List scenarios
    List(list::ListArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` means the harness worked but a scenario failed.
async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let config = HarnessConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run(args) => run::execute(args, config).await,
        Commands::Reset => reset::execute(config).await,
        Commands::List(args) => list::execute(args, config),
    }
}
