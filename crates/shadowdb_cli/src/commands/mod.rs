//! CLI command implementations.

pub mod dump_log;
pub mod recover;
pub mod verify;

use shadowdb_core::CoreError;
use shadowdb_storage::{FileBackend, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Log file name inside a database directory.
const WAL_FILE: &str = "wal.log";

/// Errors reported by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A command that needs `--path` was run without it.
    #[error("database path required for {0}")]
    MissingPath(&'static str),

    /// The database directory has no log.
    #[error("log file not found: {}", .0.display())]
    LogNotFound(PathBuf),

    /// `verify` found problems.
    #[error("verification failed with {0} error(s)")]
    VerificationFailed(usize),

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Log device error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Opens the log of the database at `path` without creating it.
fn open_log(path: &Path) -> Result<FileBackend, CliError> {
    let wal_path = path.join(WAL_FILE);
    if !wal_path.is_file() {
        return Err(CliError::LogNotFound(wal_path));
    }
    Ok(FileBackend::open(&wal_path)?)
}
