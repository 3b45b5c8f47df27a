//! CLI command definitions and dispatch for the `vbus` binary.

pub mod config;
pub mod demo;
pub mod say;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drive the VoiceBus message bus and voice processing pipeline.
#[derive(Parser)]
#[command(name = "vbus", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of `<data dir>/config.toml`.
    #[arg(long, global = true, env = "VOICEBUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit OpenTelemetry spans to stdout.
    #[arg(long, global = true, hide = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a batch of sample requests and report what comes back.
    Demo {
        /// Number of requests to publish.
        #[arg(short = 'n', long, default_value = "3")]
        count: usize,

        /// Reference voice clip passed with every request.
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Seconds to wait for all responses.
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Synthesize one utterance and wait for the result.
    Say {
        /// Text to speak.
        text: String,

        /// Reference voice clip to clone.
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Voice style.
        #[arg(long)]
        style: Option<String>,

        /// Seconds to wait for the response.
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },

    /// Show the effective configuration.
    Config,
}

impl Cli {
    /// Log filter implied by `--quiet` / `-v`.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,voicebus_core=debug,voicebus_infra=debug",
            _ => "trace",
        }
    }
}
