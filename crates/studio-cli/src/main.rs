//! AI Chat Studio access control CLI
//!
//! Administers roles, assignments and policies for the access decision
//! engine and answers ad-hoc access checks against the persisted state.

#![forbid(unsafe_code)]

use std::process::ExitCode;

use clap::Parser;

mod commands;
mod config;
mod output;
mod telemetry;

use commands::Cli;
use config::CliConfig;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    telemetry::init_telemetry(&config.telemetry, cli.verbose)?;

    tracing::debug!(
        backend = %config.storage.backend,
        path = %config.storage.path,
        "Configuration loaded"
    );
    cli.run(config).await
}
