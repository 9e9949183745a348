//! Error types for log device operations.

use std::io;
use thiserror::Error;

/// Result type for log device operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::LogBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the device.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current device size.
        size: u64,
    },

    /// Attempted to grow the device through `truncate`.
    #[error("cannot truncate log to {requested} bytes, current size is {size}")]
    InvalidTruncate {
        /// The requested size.
        requested: u64,
        /// The current device size.
        size: u64,
    },
}
