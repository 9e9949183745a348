//! Collaborator interfaces driven by the recovery manager.
//!
//! The recovery manager does not own table data or transaction state. It
//! calls into a [`StorageEngine`] to apply redo and undo, and into a
//! [`TransactionTracker`] to open and close transactions it finds in the log.

use crate::error::CoreResult;
use crate::types::{TableKind, TransactionId};

/// The table store the log is replayed against.
///
/// Mutations take a table name and a single `i64` key. Implementations must
/// be safe to call from several threads.
pub trait StorageEngine: Send + Sync {
    /// Creates an empty table.
    ///
    /// # Errors
    ///
    /// Returns `TableExists` if a table with this name already exists.
    fn create_table(&self, kind: TableKind, name: &str) -> CoreResult<()>;

    /// Inserts a new key.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or `DuplicateKey`.
    fn insert(&self, table: &str, key: i64, value: i64) -> CoreResult<()>;

    /// Replaces the value of an existing key.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or `NoSuchKey`.
    fn update(&self, table: &str, key: i64, value: i64) -> CoreResult<()>;

    /// Removes an existing key.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or `NoSuchKey`.
    fn delete(&self, table: &str, key: i64) -> CoreResult<()>;

    /// Looks up a key.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    fn get(&self, table: &str, key: i64) -> CoreResult<Option<i64>>;

    /// Returns the names of all tables, sorted.
    fn table_names(&self) -> Vec<String>;

    /// Forces one table's dirty state to stable storage.
    ///
    /// Updates to the table are blocked for the duration of the flush.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound` or an I/O error.
    fn flush_table(&self, name: &str) -> CoreResult<()>;
}

/// Tracks which transactions are active.
pub trait TransactionTracker: Send + Sync {
    /// Marks a transaction active.
    ///
    /// # Errors
    ///
    /// Returns `TransactionAlreadyActive` if it already is.
    fn begin(&self, txid: TransactionId) -> CoreResult<()>;

    /// Marks a transaction closed.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive` if it is not active.
    fn commit(&self, txid: TransactionId) -> CoreResult<()>;
}
