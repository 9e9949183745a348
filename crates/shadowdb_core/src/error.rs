//! Error types for shadowdb core.

use crate::types::TransactionId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in shadowdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Log device error.
    #[error("log storage error: {0}")]
    Storage(#[from] shadowdb_storage::StorageError),

    /// I/O error (log append, table flush, directory copy).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A complete log line could not be decoded.
    #[error("malformed log record at offset {offset}: {message}")]
    MalformedRecord {
        /// Byte offset of the offending line in the log.
        offset: u64,
        /// What was wrong with it.
        message: String,
    },

    /// The log contains a record where recovery cannot accept one.
    #[error("unexpected log order: {message}")]
    UnexpectedLogOrder {
        /// Description of the violation.
        message: String,
    },

    /// Rollback of a transaction that has no in-memory log stack.
    #[error("no such transaction: {txid}")]
    NoSuchTransaction {
        /// The transaction that was looked up.
        txid: TransactionId,
    },

    /// Rollback of a transaction whose stack does not begin with a start record.
    #[error("transaction already committed: {txid}")]
    AlreadyCommitted {
        /// The transaction that was looked up.
        txid: TransactionId,
    },

    /// Table not found in the store.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Name of the table.
        name: String,
    },

    /// Table already exists in the store.
    #[error("table already exists: {name}")]
    TableExists {
        /// Name of the table.
        name: String,
    },

    /// Insert of a key that is already present.
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// The key.
        key: i64,
    },

    /// Update or delete of a key that is not present.
    #[error("no such key {key} in table {table}")]
    NoSuchKey {
        /// Table name.
        table: String,
        /// The key.
        key: i64,
    },

    /// A table file on disk could not be read back.
    #[error("invalid table file {path}: {message}")]
    InvalidTableFile {
        /// Path of the file.
        path: String,
        /// What was wrong with it.
        message: String,
    },

    /// `begin` on a transaction that is already active.
    #[error("transaction already active: {txid}")]
    TransactionAlreadyActive {
        /// The transaction.
        txid: TransactionId,
    },

    /// `commit` on a transaction that is not active.
    #[error("transaction not active: {txid}")]
    TransactionNotActive {
        /// The transaction.
        txid: TransactionId,
    },

    /// Database is already open in another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Operation on a closed database.
    #[error("database is closed")]
    DatabaseClosed,

    /// The on-disk directory layout is not usable.
    #[error("invalid database layout: {message}")]
    InvalidLayout {
        /// Description of the problem.
        message: String,
    },

    /// A caller-supplied value cannot be represented.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a malformed record error.
    pub fn malformed_record(offset: u64, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            offset,
            message: message.into(),
        }
    }

    /// Creates an unexpected log order error.
    pub fn unexpected_log_order(message: impl Into<String>) -> Self {
        Self::UnexpectedLogOrder {
            message: message.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(table: impl Into<String>, key: i64) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            key,
        }
    }

    /// Creates a missing key error.
    pub fn no_such_key(table: impl Into<String>, key: i64) -> Self {
        Self::NoSuchKey {
            table: table.into(),
            key,
        }
    }

    /// Creates an invalid table file error.
    pub fn invalid_table_file(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTableFile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid layout error.
    pub fn invalid_layout(message: impl Into<String>) -> Self {
        Self::InvalidLayout {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for failures of the log device or the file system.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Storage(_))
    }
}
