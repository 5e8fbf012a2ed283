//! Rollcall: shared-roster coordination daemon and control CLI.
//!
//! # Usage
//!
//! ```text
//! rollcall serve
//! rollcall stop
//! rollcall status
//! rollcall publish <table>
//! rollcall flush
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::cache::PublishArgs;

#[derive(Parser, Debug)]
#[command(
    name = "rollcall",
    version,
    about = "Coordinate reads, writes and change notifications over a shared roster",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground (HTTP + control socket).
    Serve,

    /// Request graceful daemon shutdown over the control socket.
    Stop,

    /// Query daemon runtime status over the control socket.
    Status,

    /// Invalidate a table and tell every subscriber to re-fetch it.
    Publish(PublishArgs),

    /// Drop every cached read in the running daemon.
    Flush,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => commands::daemon::serve(),
        Commands::Stop => commands::daemon::stop(),
        Commands::Status => commands::daemon::status(),
        Commands::Publish(args) => args.run(),
        Commands::Flush => commands::cache::flush(),
    }
}
