//! Database directory management.
//!
//! This module handles the file system layout for shadowdb:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                 # Advisory lock for single-writer
//! ├─ wal.log              # Write-ahead log
//! ├─ data/                # Live store directory
//! └─ data-recovery/       # Shadow copy of the last checkpoint
//! ```
//!
//! The log lives beside the live directory rather than inside it, so
//! restoring the shadow copy never rolls the log back.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File names within the database directory.
const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const DATA_DIR: &str = "data";

/// Manages the database directory structure and file locking.
///
/// # Thread Safety
///
/// The `DatabaseDir` holds an exclusive lock on the database directory.
/// Only one `DatabaseDir` instance can exist per directory at a time.
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_layout(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_layout(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the WAL file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Returns the path to the live store directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.path.join(DATA_DIR)
    }

    /// Checks if this is a new (empty) database directory.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.data_dir().exists() && !self.wal_path().exists()
    }
}

/// Syncs a directory so that entries created, renamed or removed in it are
/// durable.
///
/// On Windows, directory fsync is not supported in the same way as Unix and
/// NTFS journals metadata updates, so this is a no-op there.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}
