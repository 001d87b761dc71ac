//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod geocode;
mod proxy;
mod scrape;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Config, LoadOptions};

#[derive(Parser)]
#[command(name = "dirharvest")]
#[command(about = "Business directory harvesting with proxy rotation and geocoding")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "DIRHARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Ignore environment variable overrides
    #[arg(long, global = true)]
    ignore_env: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured source once and exit
    Scrape {
        /// Only run the named source
        #[arg(short, long)]
        source: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the scheduler until interrupted
    Run {
        /// Run once immediately instead of waiting for the initial delay
        #[arg(long)]
        now: bool,
    },

    /// Proxy pool inspection
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },

    /// Resolve an address, or show geocoding quota usage
    Geocode {
        /// Address to resolve
        #[arg(required_unless_present = "stats")]
        address: Option<String>,
        /// Show today's quota usage
        #[arg(long)]
        stats: bool,
    },
}

#[derive(Subcommand)]
enum ProxyCommands {
    /// Show per-proxy usage counters
    Stats,
    /// Probe every proxy once
    Test,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        ignore_env: cli.ignore_env,
    };
    let config = Config::load(&options).await?;

    match cli.command {
        Commands::Scrape { source, json } => {
            scrape::cmd_scrape(&config, source.as_deref(), json).await
        }
        Commands::Run { now } => serve::cmd_run(&config, now).await,
        Commands::Proxy { command } => match command {
            ProxyCommands::Stats => proxy::cmd_proxy_stats(&config).await,
            ProxyCommands::Test => proxy::cmd_proxy_test(&config).await,
        },
        Commands::Geocode { address, stats } => {
            geocode::cmd_geocode(&config, address.as_deref(), stats).await
        }
    }
}
