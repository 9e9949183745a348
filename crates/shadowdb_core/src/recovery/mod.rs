//! The recovery manager.
//!
//! Owns the log file and the per-transaction log stacks, and provides:
//!
//! - the write path (`table`, `start`, `edit`, `commit`), every call a
//!   durability barrier
//! - [`checkpoint`](RecoveryManager::checkpoint): flush every table, publish
//!   the shadow copy, log the active set
//! - [`recover`](RecoveryManager::recover): analysis, redo from the last
//!   checkpoint, undo of losers
//! - [`rollback`](RecoveryManager::rollback): live abort of one transaction
//!
//! ## Locking
//!
//! One mutex guards the log file and the stack map. Every write-path call
//! holds it for its whole duration, including the sync, so file order is a
//! total order of the calls. `checkpoint` also takes each table's update
//! lock, one table at a time, while flushing it.

mod checkpoint;
mod prime;
mod replay;
mod rollback;
mod shadow;
mod undo;

pub use prime::{prime, PrimeOutcome};
pub use replay::RecoveryReport;
pub use shadow::ShadowCopy;

use crate::engine::{StorageEngine, TransactionTracker};
use crate::error::CoreResult;
use crate::types::{Action, TableKind, TransactionId};
use crate::wal::{LogFile, LogRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Log file plus the records written per open transaction.
struct LogState {
    log: LogFile,
    /// Records written for each open transaction since its start record.
    /// Checkpoint records are shared between stacks.
    stacks: HashMap<TransactionId, Vec<Arc<LogRecord>>>,
}

/// Write-ahead logging, checkpointing and crash recovery over a storage
/// engine and a transaction tracker.
pub struct RecoveryManager {
    engine: Arc<dyn StorageEngine>,
    tracker: Arc<dyn TransactionTracker>,
    shadow: Option<ShadowCopy>,
    state: Mutex<LogState>,
}

impl RecoveryManager {
    /// Creates a recovery manager that owns `log`.
    ///
    /// Checkpoints only flush until a shadow copy is attached with
    /// [`with_shadow_copy`](Self::with_shadow_copy).
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        tracker: Arc<dyn TransactionTracker>,
        log: LogFile,
    ) -> Self {
        Self {
            engine,
            tracker,
            shadow: None,
            state: Mutex::new(LogState {
                log,
                stacks: HashMap::new(),
            }),
        }
    }

    /// Makes every checkpoint publish a shadow copy of the live directory.
    #[must_use]
    pub fn with_shadow_copy(mut self, shadow: ShadowCopy) -> Self {
        self.shadow = Some(shadow);
        self
    }

    /// Logs the creation of a table.
    ///
    /// Table creation belongs to no transaction and is never rolled back.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unrepresentable name, or an I/O error.
    pub fn table(&self, kind: TableKind, name: &str) -> CoreResult<()> {
        let record = LogRecord::Table {
            kind,
            name: name.to_string(),
        };
        self.state.lock().log.append(&record)?;
        Ok(())
    }

    /// Logs a single-key mutation and pushes it onto the transaction's stack.
    ///
    /// The caller must already have logged a start record for `txid`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unrepresentable table name, or an
    /// I/O error. The stack is only extended once the record is durable.
    pub fn edit(
        &self,
        txid: TransactionId,
        table: &str,
        action: Action,
        key: i64,
        old_value: i64,
        new_value: i64,
    ) -> CoreResult<()> {
        let record = LogRecord::Edit {
            txid,
            table: table.to_string(),
            action,
            key,
            old_value,
            new_value,
        };
        let mut state = self.state.lock();
        state.log.append(&record)?;
        state.stacks.entry(txid).or_default().push(Arc::new(record));
        Ok(())
    }

    /// Logs the start of a transaction and resets its stack to that record.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub fn start(&self, txid: TransactionId) -> CoreResult<()> {
        let record = LogRecord::Start { txid };
        let mut state = self.state.lock();
        state.log.append(&record)?;
        state.stacks.insert(txid, vec![Arc::new(record)]);
        Ok(())
    }

    /// Logs the end of a transaction and drops its stack.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, in which case the stack is kept.
    pub fn commit(&self, txid: TransactionId) -> CoreResult<()> {
        let record = LogRecord::Commit { txid };
        let mut state = self.state.lock();
        state.log.append(&record)?;
        state.stacks.remove(&txid);
        Ok(())
    }

    /// Returns the transactions that currently have records on their stack.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self
            .state
            .lock()
            .stacks
            .iter()
            .filter(|(_, stack)| !stack.is_empty())
            .map(|(txid, _)| *txid)
            .collect();
        ids.sort();
        ids
    }

    /// Returns the number of records on a transaction's stack.
    #[must_use]
    pub fn stack_len(&self, txid: TransactionId) -> usize {
        self.state.lock().stacks.get(&txid).map_or(0, Vec::len)
    }

    /// Returns the current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be read.
    pub fn log_size(&self) -> CoreResult<u64> {
        self.state.lock().log.size()
    }

    /// Returns every record in the log, in file order.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` or an I/O error.
    pub fn read_log(&self) -> CoreResult<Vec<LogRecord>> {
        Ok(self
            .state
            .lock()
            .log
            .read_all()?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }
}
