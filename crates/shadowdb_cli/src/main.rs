//! shadowdb CLI
//!
//! Command-line tools for shadowdb databases.
//!
//! # Commands
//!
//! - `dump-log` - Print decoded log records
//! - `verify` - Check the log for damage and ordering problems
//! - `recover` - Open the database, run crash recovery and close it again
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// shadowdb command-line database tools.
#[derive(Parser)]
#[command(name = "shadowdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format shared by the commands that print records or reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print decoded log records
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip records before this byte offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Check the log for damage and ordering problems
    Verify,

    /// Open the database, run crash recovery and close it again
    Recover {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::DumpLog {
            limit,
            offset,
            format,
        } => {
            let path = cli.path.ok_or(commands::CliError::MissingPath("dump-log"))?;
            commands::dump_log::run(&path, limit, offset, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or(commands::CliError::MissingPath("verify"))?;
            commands::verify::run(&path)?;
        }
        Commands::Recover { format } => {
            let path = cli.path.ok_or(commands::CliError::MissingPath("recover"))?;
            commands::recover::run(&path, format)?;
        }
        Commands::Version => {
            println!("shadowdb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("shadowdb core v{}", shadowdb_core::VERSION);
        }
    }

    Ok(())
}
