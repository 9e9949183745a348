//! Live rollback of a single transaction.

use super::RecoveryManager;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use crate::wal::LogRecord;

impl RecoveryManager {
    /// Aborts an open transaction during normal operation.
    ///
    /// Walks the transaction's stack newest first. Each edit's inverse is
    /// logged as a compensation record and then applied, so replaying the
    /// log later reproduces the rollback. Finally a commit record closes the
    /// transaction here and in the tracker.
    ///
    /// Other transactions' stacks and data are not touched.
    ///
    /// # Errors
    ///
    /// - `NoSuchTransaction` if the transaction has no stack
    /// - `AlreadyCommitted` if the stack does not begin with a start record
    /// - any log or storage engine error; the stack is left in place
    pub fn rollback(&self, txid: TransactionId) -> CoreResult<()> {
        let stack = {
            let state = self.state.lock();
            let stack = state
                .stacks
                .get(&txid)
                .filter(|stack| !stack.is_empty())
                .ok_or(CoreError::NoSuchTransaction { txid })?;
            if !matches!(
                stack.first().map(|record| &**record),
                Some(LogRecord::Start { .. } | LogRecord::Table { .. })
            ) {
                return Err(CoreError::AlreadyCommitted { txid });
            }
            stack.clone()
        };

        let mut undone = 0usize;
        for record in stack.iter().rev() {
            let Some(compensation) = record.compensation() else {
                continue;
            };
            self.state.lock().log.append(&compensation)?;
            self.apply(&compensation)?;
            undone += 1;
        }

        self.commit(txid)?;
        self.tracker.commit(txid)?;
        tracing::info!(%txid, undone, "transaction rolled back");
        Ok(())
    }
}
