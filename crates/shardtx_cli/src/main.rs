//! shardtx CLI
//!
//! Runs transactions against a simulated in-memory cluster to show how the
//! transacter retries, backs off and targets shards.
//!
//! # Commands
//!
//! - `simulate` - Run one transaction through a series of write conflicts
//! - `shards` - List the shards of a simulated keyspace and target one
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Command-line tools for the shardtx transaction engine.
#[derive(Parser)]
#[command(name = "shardtx")]
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
    /// Run one transaction that hits write conflicts before succeeding
    Simulate {
        /// Maximum attempts per transaction
        #[arg(short, long, default_value = "3")]
        attempts: u32,

        /// Number of conflicting attempts before the write goes through
        #[arg(short, long, default_value = "1")]
        conflicts: u32,

        /// Minimum delay between attempts in milliseconds
        #[arg(long, default_value = "100")]
        min_delay_ms: u64,

        /// Maximum delay between attempts in milliseconds
        #[arg(long, default_value = "200")]
        max_delay_ms: u64,

        /// Random jitter added to each delay in milliseconds
        #[arg(long, default_value = "400")]
        jitter_ms: u64,

        /// Run the transaction read-only
        #[arg(long)]
        read_only: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the shards of a simulated keyspace
    Shards {
        /// Keyspace name
        #[arg(short, long, default_value = "commerce")]
        keyspace: String,

        /// Comma-separated shard key ranges
        #[arg(short, long, default_value = "-80,80-")]
        ranges: String,

        /// Shard to target, as `<range>` or `<keyspace>/<range>`
        #[arg(short, long)]
        target: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            attempts,
            conflicts,
            min_delay_ms,
            max_delay_ms,
            jitter_ms,
            read_only,
            format,
        } => {
            let args = commands::simulate::SimulateArgs {
                attempts,
                conflicts,
                min_delay_ms,
                max_delay_ms,
                jitter_ms,
                read_only,
            };
            commands::simulate::run(&args, &format)?;
        }
        Commands::Shards {
            keyspace,
            ranges,
            target,
            format,
        } => {
            commands::shards::run(&keyspace, &ranges, target.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("shardtx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("shardtx core v{}", shardtx_core::VERSION);
        }
    }

    Ok(())
}
