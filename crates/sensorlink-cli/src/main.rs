use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// How to identify the target node on the radio.
#[derive(Debug, Clone, Args)]
struct TargetArgs {
    /// Node name fragment (case-insensitive substring match), or use
    /// the SENSORLINK_DEVICE env var
    #[arg(short, long, env = "SENSORLINK_DEVICE")]
    name: Option<String>,

    /// Fixed node address (skips name matching)
    #[arg(short, long)]
    address: Option<String>,

    /// Re-match by name on every reconnect instead of caching the
    /// resolved address
    #[arg(long)]
    no_cache_address: bool,
}

#[derive(Parser)]
#[command(name = "sensorlink")]
#[command(author, version, about = "Connection controller for BLE sensor nodes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit readings as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby nodes and list what is advertising
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Stay connected to a node and stream its telemetry
    Watch {
        #[command(flatten)]
        target: TargetArgs,

        /// Per-attempt scan budget in seconds
        #[arg(long, default_value = "5")]
        scan_timeout: u64,

        /// Per-attempt connect budget in seconds
        #[arg(long, default_value = "10")]
        connect_timeout: u64,
    },

    /// Connect, write a payload to the node's command channel, and exit
    Send {
        #[command(flatten)]
        target: TargetArgs,

        /// Payload text (a newline is appended)
        payload: String,

        /// Give up if no connection within this many seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Scan { timeout } => commands::scan(Duration::from_secs(timeout), cli.json).await,
        Commands::Watch {
            target,
            scan_timeout,
            connect_timeout,
        } => {
            commands::watch(
                target,
                Duration::from_secs(scan_timeout),
                Duration::from_secs(connect_timeout),
                cli.json,
            )
            .await
        }
        Commands::Send {
            target,
            payload,
            timeout,
        } => commands::send(target, payload, Duration::from_secs(timeout)).await,
    }
}
