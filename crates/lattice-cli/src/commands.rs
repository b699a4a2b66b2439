//! CLI command definitions.

use crate::config::OutputFormat;
use clap::builder::RangedU64ValueParser;
use clap::{Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline locally for one triggering event
    Run {
        /// Path to pipeline file
        #[arg(default_value = "lattice.yaml")]
        path: PathBuf,

        /// Kind of event to simulate
        #[arg(long, value_enum, default_value_t = EventKind::Push)]
        event: EventKind,

        /// Branch pushed to, or source branch of the pull request
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Target branch of the pull request
        #[arg(long, default_value = "main")]
        base: String,

        /// Maximum number of instances running at once
        #[arg(short = 'j', long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        max_parallel: Option<usize>,

        /// Report every step as passed without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Directory steps run in (default: current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// dotenv-style file of secrets handed to steps
        #[arg(long)]
        secrets_file: Option<PathBuf>,

        /// Output format (default: from config)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Validate pipeline configuration
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "lattice.yaml")]
        path: PathBuf,
    },

    /// Print the job instances a pipeline compiles to
    Expand {
        /// Path to pipeline file
        #[arg(default_value = "lattice.yaml")]
        path: PathBuf,

        /// Only show this job
        #[arg(long)]
        job: Option<String>,

        /// Output format (default: from config)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Print the JSON Schema of the pipeline file format
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventKind {
    Push,
    PullRequest,
}
