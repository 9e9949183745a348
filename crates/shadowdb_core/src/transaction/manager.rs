//! Transaction manager.

use crate::engine::TransactionTracker;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Tracks the set of active transactions.
///
/// `begin` and `commit` must alternate per id: beginning an active
/// transaction or committing an unknown one is an error, so a recovery pass
/// that would double-open or double-close a transaction fails loudly.
#[derive(Debug, Default)]
pub struct TransactionManager {
    active: RwLock<HashSet<TransactionId>>,
}

impl TransactionManager {
    /// Creates a manager with no active transactions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `txid` is active.
    #[must_use]
    pub fn is_active(&self, txid: TransactionId) -> bool {
        self.active.read().contains(&txid)
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Returns the active transactions in sorted order.
    #[must_use]
    pub fn active_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.active.read().iter().copied().collect();
        ids.sort();
        ids
    }
}

impl TransactionTracker for TransactionManager {
    fn begin(&self, txid: TransactionId) -> CoreResult<()> {
        if !self.active.write().insert(txid) {
            return Err(CoreError::TransactionAlreadyActive { txid });
        }
        tracing::trace!(%txid, "transaction begun");
        Ok(())
    }

    fn commit(&self, txid: TransactionId) -> CoreResult<()> {
        if !self.active.write().remove(&txid) {
            return Err(CoreError::TransactionNotActive { txid });
        }
        tracing::trace!(%txid, "transaction closed");
        Ok(())
    }
}
