//! Checkpointing.

use super::RecoveryManager;
use crate::error::CoreResult;
use crate::types::TransactionId;
use crate::wal::LogRecord;
use std::collections::BTreeSet;
use std::sync::Arc;

impl RecoveryManager {
    /// Flushes every table, publishes the shadow copy and logs the set of
    /// active transactions.
    ///
    /// Runs entirely under the write-path lock. The shadow is published
    /// before the checkpoint record is appended: a crash in between leaves a
    /// snapshot newer than the replay start, which redo absorbs, whereas the
    /// opposite order would make recovery skip work the snapshot lacks.
    ///
    /// The checkpoint record is also pushed onto every active transaction's
    /// stack. Returns the active set.
    ///
    /// # Errors
    ///
    /// Returns the first flush, copy or append error. The checkpoint record
    /// is not written in that case.
    pub fn checkpoint(&self) -> CoreResult<BTreeSet<TransactionId>> {
        let mut state = self.state.lock();

        let tables = self.engine.table_names();
        for name in &tables {
            self.engine.flush_table(name)?;
        }

        let active: BTreeSet<TransactionId> = state
            .stacks
            .iter()
            .filter(|(_, stack)| !stack.is_empty())
            .map(|(txid, _)| *txid)
            .collect();

        if let Some(shadow) = &self.shadow {
            shadow.publish()?;
        }

        let record = Arc::new(LogRecord::Checkpoint {
            active: active.clone(),
        });
        let offset = state.log.append(&record)?;
        for txid in &active {
            if let Some(stack) = state.stacks.get_mut(txid) {
                stack.push(Arc::clone(&record));
            }
        }

        tracing::info!(
            offset,
            tables = tables.len(),
            active = active.len(),
            shadow = self.shadow.is_some(),
            "checkpoint complete"
        );
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::StorageEngine;
    use crate::recovery::tests::Fixture;
    use crate::recovery::ShadowCopy;
    use crate::store::TableStore;
    use crate::wal::LogRecord;
    use std::fs;

    #[test]
    fn checkpoint_records_active_transactions() {
        let f = Fixture::new();
        f.create_table("t");
        let open = f.begin();
        let done = f.begin();
        f.insert(open, 1, 10);
        f.commit(done);

        let active = f.rm.checkpoint().unwrap();
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec![open]);

        let last = f.rm.read_log().unwrap().pop().unwrap();
        assert_eq!(
            last,
            LogRecord::Checkpoint {
                active: [open].into_iter().collect()
            }
        );
        assert_eq!(f.rm.stack_len(open), 3);
    }

    #[test]
    fn checkpoint_flushes_tables() {
        let f = Fixture::new();
        f.create_table("t");
        let txid = f.begin();
        f.insert(txid, 1, 10);
        assert!(f.store.has_dirty_tables());

        f.rm.checkpoint().unwrap();
        assert!(!f.store.has_dirty_tables());

        let reopened = TableStore::open(&f.dir.path().join("data")).unwrap();
        assert_eq!(reopened.get("t", 1).unwrap(), Some(10));
    }

    #[test]
    fn checkpoint_publishes_shadow() {
        let f = Fixture::new();
        let live = f.dir.path().join("data");
        let shadow = ShadowCopy::for_live(&live).unwrap();
        let f = Fixture {
            rm: f.rm.with_shadow_copy(shadow.clone()),
            ..f
        };
        f.create_table("t");
        let txid = f.begin();
        f.insert(txid, 1, 10);
        f.commit(txid);

        f.rm.checkpoint().unwrap();
        assert!(shadow.exists());
        let snapshot = TableStore::open(shadow.shadow()).unwrap();
        assert_eq!(snapshot.get("t", 1).unwrap(), Some(10));
        assert_eq!(
            fs::read(live.join("t.tbl")).unwrap(),
            fs::read(shadow.shadow().join("t.tbl")).unwrap()
        );
    }

    #[test]
    fn failed_flush_writes_no_checkpoint() {
        let f = Fixture::new();
        f.create_table("t");
        let txid = f.begin();
        f.insert(txid, 1, 10);
        let before = f.rm.read_log().unwrap().len();

        fs::remove_dir_all(f.dir.path().join("data")).unwrap();
        assert!(f.rm.checkpoint().is_err());
        assert_eq!(f.rm.read_log().unwrap().len(), before);
        assert_eq!(f.rm.stack_len(txid), 2);
    }
}
