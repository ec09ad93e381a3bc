//! testbed: run throwaway groups of service containers for integration tests.
//!
//! # Usage
//!
//! ```text
//! testbed validate <file> [--json]
//! testbed up <file> [--json] [--registry-user ...] [--registry-password ...]
//! testbed sweep <group> [--global]
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `info` filter.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{sweep::SweepArgs, up::UpArgs, validate::ValidateArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "testbed",
    version,
    about = "Start, check and tear down ephemeral service containers for tests",
    long_about = None,
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a group file and print the services it would start.
    Validate(ValidateArgs),

    /// Start a group, wait until it is ready, and hold it until Ctrl-C.
    Up(UpArgs),

    /// Kill and remove leftover containers of a group.
    Sweep(SweepArgs),
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Validate(args) => args.run(),
        Commands::Up(args) => args.run().await,
        Commands::Sweep(args) => args.run().await,
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
