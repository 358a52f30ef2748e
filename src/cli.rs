use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "holdfast")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Keep a host in its configured state: watch, report drift, converge on demand",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file
    #[arg(long, global = true, env = "HOLDFAST_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Watch every group and report drift until interrupted
    Run,

    /// Apply a group or a single instruction
    Apply(ApplyArgs),

    /// Show group and instruction statuses
    Status(StatusArgs),

    /// List available command kinds
    Commands {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show global variables
    Variables,

    /// List users from the passwd file
    Users,

    /// Show recent journal entries
    Log {
        /// Number of entries
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Group or instruction id
    pub id: String,

    /// Seconds to wait for the first observations
    #[arg(long, default_value = "30")]
    pub settle_secs: u64,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show detail payloads
    #[arg(short, long)]
    pub detail: bool,

    /// Seconds to wait for the first observations
    #[arg(long, default_value = "30")]
    pub settle_secs: u64,
}
