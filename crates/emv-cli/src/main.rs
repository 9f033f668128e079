use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod formatters;
mod sim;

use commands::simulate::SimulateArgs;
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "cless-sim")]
#[command(about = "EMV contactless post-kernel decision flow - simulator and tools")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a hex encoded BER-TLV buffer
    Decode {
        /// BER-TLV data, hex encoded (spaces allowed)
        data: String,

        /// Output format mode
        #[arg(short, long, value_enum, default_value_t = FormatMode::Human)]
        format: FormatMode,
    },
    /// Validate a terminal configuration file
    CheckConfig {
        /// Terminal configuration (JSON)
        file: PathBuf,
    },
    /// Run transactions against a simulated kernel
    Simulate(SimulateArgs),
}

fn main() {
    // Initialize tracing subscriber with environment-based filtering
    // Set RUST_LOG=debug for detailed logs, RUST_LOG=trace for very verbose
    // Default: info level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Decode { data, format } => commands::decode::cmd_decode(&data, format),
        Command::CheckConfig { file } => commands::check_config::cmd_check_config(&file),
        Command::Simulate(args) => commands::simulate::cmd_simulate(&args),
    }
}
