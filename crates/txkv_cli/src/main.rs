//! txkv CLI
//!
//! Command-line driver for the concurrent writer workload.
//!
//! # Commands
//!
//! - `run` - Open a store, run the writers and report what they committed
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::run::RunArgs;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Concurrent transactional writers over an in-memory key-value engine.
#[derive(Parser)]
#[command(name = "txkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the writer workload
    Run(RunArgs),

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(&args),
        Commands::Version => {
            println!("txkv CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("txkv core v{}", txkv_core::VERSION);
            ExitCode::SUCCESS
        }
    }
}
