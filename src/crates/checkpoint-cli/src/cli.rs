//! Command-line definition for `checkpointctl`

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "checkpointctl")]
#[command(about = "Inspect, resume and sweep scrape-job checkpoints", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (defaults to ./checkpoint.toml)
    #[arg(short, long, global = true, env = "CHECKPOINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show where a job would resume
    Resume {
        /// Job ID
        job_id: String,
    },

    /// Show the latest checkpoint for a job
    Show {
        /// Job ID
        job_id: String,
    },

    /// List durable checkpoints, newest first
    List {
        /// Only checkpoints for this site
        #[arg(short, long)]
        domain: Option<String>,

        /// Only checkpoints with this status: active, completed, failed
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of checkpoints to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Mark a checkpoint failed
    Fail {
        /// Checkpoint ID
        checkpoint_id: String,

        /// Failure message
        #[arg(short, long)]
        message: String,
    },

    /// Delete expired checkpoints from the durable store
    Sweep {
        /// Keep sweeping every N seconds until interrupted
        #[arg(short, long)]
        every: Option<u64>,
    },

    /// Create the durable store's indexes
    Indexes,

    /// Print the effective configuration
    Config,
}
