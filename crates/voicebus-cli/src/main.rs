//! VoiceBus CLI entry point.
//!
//! Binary name: `vbus`
//!
//! Parses CLI arguments, sets up tracing, loads configuration, wires the bus
//! and voice protocol, then dispatches to the command handler.

mod cli;
mod state;

use std::time::Duration;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;
use voicebus_observe::tracing_setup::{init_tracing, shutdown_tracing, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json { LogFormat::Json } else { LogFormat::Text };
    init_tracing(format, cli.log_filter(), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        // Showing the config does not need the bus
        Commands::Config => {
            let (config, path) = AppState::load(cli.config.as_deref()).await?;
            cli::config::show(&config, &path, cli.json)?;
        }

        Commands::Demo {
            count,
            reference,
            timeout_secs,
        } => {
            let state = AppState::init(cli.config.as_deref()).await?;
            cli::demo::run(
                &state,
                count,
                reference.as_deref(),
                Duration::from_secs(timeout_secs),
                cli.json,
                cli.quiet,
            )
            .await?;
        }

        Commands::Say {
            text,
            reference,
            style,
            timeout_secs,
        } => {
            let state = AppState::init(cli.config.as_deref()).await?;
            cli::say::run(
                &state,
                &text,
                reference.as_deref(),
                style.as_deref(),
                Duration::from_secs(timeout_secs),
                cli.json,
                cli.quiet,
            )
            .await?;
        }
    }

    Ok(())
}
