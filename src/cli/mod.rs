//! CLI implementation for herd

mod commands;
mod display;
mod signal;

pub use signal::ExitCode;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use display::BatchFormat;

#[derive(Parser)]
#[command(name = "herd")]
#[command(about = "Batch maintenance for shared dataset archives")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data root holding the dataset directories
    #[arg(long, global = true, env = "HERD_ROOT")]
    root: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show debug info (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Options shared by every batch command.
#[derive(Args)]
struct BatchArgs {
    /// Dataset ids to process
    ids: Vec<String>,

    /// Process every dataset under the data root
    #[arg(long, conflicts_with = "ids")]
    all: bool,

    /// Read dataset ids from a file, one per line (# starts a comment)
    #[arg(long, value_name = "PATH")]
    from_file: Option<PathBuf>,

    /// Redo datasets whose audit history already records a success
    #[arg(short, long)]
    force: bool,

    /// Number of threads to use for batch processing
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Format for the batch summary (default: text, or tsv with --batch-output-file)
    #[arg(long, value_enum)]
    batch_format: Option<BatchFormat>,

    /// Write the batch summary to a file instead of standard output
    #[arg(long, value_name = "PATH")]
    batch_output_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute dataset manifests (sizes + checksums), under exclusive locks
    Refresh {
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Check dataset files against their manifests, under shared locks
    Verify {
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// List held locks under one or more roots
    Locks {
        /// Roots to search (defaults to the data root)
        roots: Vec<PathBuf>,

        /// How many directory levels below each root to search
        #[arg(long, default_value = "2", value_name = "N")]
        max_depth: usize,
    },
    /// Show the audit history for one dataset
    History {
        /// Dataset id
        id: String,

        /// Most recent N events to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    // Config files can turn verbosity on too; the flag just overrides them
    let config = commands::load_config(&cli);
    init_tracing(cli.verbose || config.verbose_or_default());

    match &cli.command {
        Commands::Refresh { batch } => commands::run_batch(&cli, batch, herd::OperationKind::Refresh),
        Commands::Verify { batch } => commands::run_batch(&cli, batch, herd::OperationKind::Verify),
        Commands::Locks { roots, max_depth } => commands::cmd_locks(&cli, roots, *max_depth),
        Commands::History { id, limit } => commands::cmd_history(&cli, id, *limit),
    }
}

/// Log to stderr to keep stdout clean for reports and listings.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "herd=debug" } else { "herd=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::Failure as i32, 1);
        assert_eq!(ExitCode::BatchErrors as i32, 2);
        assert_eq!(ExitCode::Interrupted as i32, 130);
    }
}
