//! bleframe — BLE advertisement fragment reassembler.
//!
//! Feeds manufacturer-data fragments through a `FragmentReceiver` from a
//! capture file, stdin, or a synthetic burst. Run `bleframe --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod demo;
mod ingest;
mod record;
mod replay;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // stdout carries completed messages; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        let example = config::GatewayConfig::default_example();
        print!("{}", toml::to_string_pretty(&example)?);
        return Ok(());
    }

    let config = config::GatewayConfig::load(&cli.config)?;

    match cli.command {
        Commands::Init => {}
        Commands::Replay { input, output } => {
            replay::run(&config, &input, output)?;
        }
        Commands::Ingest { workers, stats_interval } => {
            ingest::run(&config, workers, stats_interval)?;
        }
        Commands::Demo => {
            demo::run(&config)?;
        }
    }

    Ok(())
}
