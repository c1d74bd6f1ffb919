//! CLI definitions for bleframe.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "bleframe",
    version,
    about = "BLE advertisement fragment reassembler\n\nRebuilds multi-fragment manufacturer-data messages from a lossy, duplicate-heavy advertisement stream and decodes the completed payloads.",
    long_about = None
)]
pub struct Cli {
    /// Path to bleframe.toml config file
    #[clap(long, short, default_value = "bleframe.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print an example bleframe.toml to stdout
    Init,

    /// Reassemble a JSONL capture file and write completed messages as JSONL
    Replay {
        /// Capture file: one {"device_id", "data", "ts_ms"|"ts"} record per line
        #[clap(long)]
        input: PathBuf,

        /// Write completed messages to this file (default: stdout)
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Read capture records from stdin until EOF or Ctrl-C
    Ingest {
        /// Number of reassembly worker threads
        #[clap(long, default_value = "2")]
        workers: usize,

        /// Seconds between statistics log lines
        #[clap(long, default_value = "10")]
        stats_interval: u64,
    },

    /// Reassemble a synthetic captouch burst with retransmissions
    Demo,
}
