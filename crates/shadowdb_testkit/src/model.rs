//! Reference model for workload testing.
//!
//! [`ModelRunner`] drives a [`TestDatabase`] and a plain in-memory model
//! with the same [`Op`] sequence. The model knows which edits are committed,
//! so after any crash it predicts exactly what recovery must leave behind.
//!
//! The database has no key-level isolation, so the runner keeps workloads
//! serializable itself: a key edited by an open transaction belongs to that
//! transaction until it finishes, and other slots' edits to it are skipped.

use crate::fixtures::TestDatabase;
use crate::generators::Op;
use shadowdb_core::{CoreError, CoreResult, TableKind, TransactionId};
use std::collections::{BTreeMap, HashMap};

/// Table every workload runs against.
pub const MODEL_TABLE: &str = "model";

/// Open transaction tracked by the model.
#[derive(Debug)]
struct ModelTxn {
    txid: TransactionId,
    /// Previous values of edited keys, oldest first.
    undo: Vec<(i64, Option<i64>)>,
}

/// In-memory model of the rows a database should hold.
#[derive(Debug, Default)]
pub struct ModelState {
    rows: BTreeMap<i64, i64>,
    open: HashMap<usize, ModelTxn>,
    owners: HashMap<i64, usize>,
}

impl ModelState {
    /// Returns every row, committed or not, in key order.
    pub fn rows(&self) -> Vec<(i64, i64)> {
        self.rows.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn owned_by_other(&self, slot: usize, key: i64) -> bool {
        self.owners.get(&key).is_some_and(|owner| *owner != slot)
    }

    fn record(&mut self, slot: usize, key: i64, previous: Option<i64>) {
        if let Some(txn) = self.open.get_mut(&slot) {
            txn.undo.push((key, previous));
        }
        self.owners.insert(key, slot);
    }

    fn finish(&mut self, slot: usize) -> Option<ModelTxn> {
        let txn = self.open.remove(&slot)?;
        self.owners.retain(|_, owner| *owner != slot);
        Some(txn)
    }

    fn revert(&mut self, slot: usize) {
        let Some(txn) = self.finish(slot) else {
            return;
        };
        for (key, previous) in txn.undo.into_iter().rev() {
            match previous {
                Some(value) => self.rows.insert(key, value),
                None => self.rows.remove(&key),
            };
        }
    }

    fn revert_all(&mut self) {
        let slots: Vec<usize> = self.open.keys().copied().collect();
        for slot in slots {
            self.revert(slot);
        }
    }
}

/// Runs the same workload against a database and the model.
pub struct ModelRunner {
    db: TestDatabase,
    model: ModelState,
}

impl ModelRunner {
    /// Creates the workload table in `db` and starts an empty model.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be created.
    pub fn new(db: TestDatabase) -> CoreResult<Self> {
        db.create_table(TableKind::BTree, MODEL_TABLE)?;
        Ok(Self {
            db,
            model: ModelState::default(),
        })
    }

    /// Returns the database under test.
    pub fn db(&self) -> &TestDatabase {
        &self.db
    }

    /// Returns the model.
    pub fn model(&self) -> &ModelState {
        &self.model
    }

    fn txid(&mut self, slot: usize) -> CoreResult<TransactionId> {
        if let Some(txn) = self.model.open.get(&slot) {
            return Ok(txn.txid);
        }
        let txid = self.db.begin()?;
        self.model.open.insert(
            slot,
            ModelTxn {
                txid,
                undo: Vec::new(),
            },
        );
        Ok(txid)
    }

    /// Applies one step to both sides.
    ///
    /// # Errors
    ///
    /// Returns any database error the model did not predict.
    ///
    /// # Panics
    ///
    /// Panics if an edit the model expects to fail succeeds.
    pub fn apply(&mut self, op: Op) -> CoreResult<()> {
        match op {
            Op::Insert { slot, key, value } => {
                if self.model.owned_by_other(slot, key) {
                    return Ok(());
                }
                let txid = self.txid(slot)?;
                let result = self.db.insert(txid, MODEL_TABLE, key, value);
                if self.model.rows.contains_key(&key) {
                    expect_error(result, |e| matches!(e, CoreError::DuplicateKey { .. }), op)
                } else {
                    result?;
                    self.model.record(slot, key, None);
                    self.model.rows.insert(key, value);
                    Ok(())
                }
            }
            Op::Update { slot, key, value } => {
                if self.model.owned_by_other(slot, key) {
                    return Ok(());
                }
                let txid = self.txid(slot)?;
                let result = self.db.update(txid, MODEL_TABLE, key, value);
                match self.model.rows.get(&key).copied() {
                    Some(previous) => {
                        result?;
                        self.model.record(slot, key, Some(previous));
                        self.model.rows.insert(key, value);
                        Ok(())
                    }
                    None => expect_error(result, |e| matches!(e, CoreError::NoSuchKey { .. }), op),
                }
            }
            Op::Delete { slot, key } => {
                if self.model.owned_by_other(slot, key) {
                    return Ok(());
                }
                let txid = self.txid(slot)?;
                let result = self.db.delete(txid, MODEL_TABLE, key);
                match self.model.rows.get(&key).copied() {
                    Some(previous) => {
                        result?;
                        self.model.record(slot, key, Some(previous));
                        self.model.rows.remove(&key);
                        Ok(())
                    }
                    None => expect_error(result, |e| matches!(e, CoreError::NoSuchKey { .. }), op),
                }
            }
            Op::Commit { slot } => {
                if let Some(txn) = self.model.finish(slot) {
                    self.db.commit(txn.txid)?;
                }
                Ok(())
            }
            Op::Rollback { slot } => {
                if let Some(txn) = self.model.open.get(&slot) {
                    self.db.rollback(txn.txid)?;
                    self.model.revert(slot);
                }
                Ok(())
            }
            Op::Checkpoint => {
                self.db.checkpoint()?;
                Ok(())
            }
            Op::Crash => {
                self.db.kill();
                self.db.try_reopen()?;
                self.model.revert_all();
                Ok(())
            }
        }
    }

    /// Checks that the database holds exactly the model's rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be scanned.
    ///
    /// # Panics
    ///
    /// Panics on a mismatch.
    pub fn verify(&self) -> CoreResult<()> {
        let actual = self.db.scan(MODEL_TABLE)?;
        assert_eq!(actual, self.model.rows(), "database rows differ from model");
        Ok(())
    }

    /// Crashes, recovers and verifies.
    ///
    /// # Errors
    ///
    /// Returns a recovery error.
    pub fn crash_and_verify(&mut self) -> CoreResult<()> {
        self.apply(Op::Crash)?;
        self.verify()
    }
}

fn expect_error(
    result: CoreResult<()>,
    expected: impl Fn(&CoreError) -> bool,
    op: Op,
) -> CoreResult<()> {
    match result {
        Err(e) if expected(&e) => Ok(()),
        Err(e) => Err(e),
        Ok(()) => panic!("{op:?} succeeded but the model expected it to fail"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_tracks_rollback() {
        let mut runner = ModelRunner::new(TestDatabase::new()).unwrap();
        runner.apply(Op::Insert { slot: 0, key: 1, value: 1 }).unwrap();
        runner.apply(Op::Commit { slot: 0 }).unwrap();
        runner.apply(Op::Update { slot: 1, key: 1, value: 2 }).unwrap();
        runner.apply(Op::Rollback { slot: 1 }).unwrap();
        runner.verify().unwrap();
        assert_eq!(runner.model().rows(), vec![(1, 1)]);
    }

    #[test]
    fn owned_keys_are_skipped() {
        let mut runner = ModelRunner::new(TestDatabase::new()).unwrap();
        runner.apply(Op::Insert { slot: 0, key: 1, value: 1 }).unwrap();
        runner.apply(Op::Delete { slot: 1, key: 1 }).unwrap();
        runner.verify().unwrap();
        assert_eq!(runner.model().rows(), vec![(1, 1)]);
    }

    #[test]
    fn crash_reverts_open_slots() {
        let mut runner = ModelRunner::new(TestDatabase::new()).unwrap();
        runner.apply(Op::Insert { slot: 0, key: 1, value: 1 }).unwrap();
        runner.apply(Op::Commit { slot: 0 }).unwrap();
        runner.apply(Op::Insert { slot: 2, key: 2, value: 2 }).unwrap();
        runner.apply(Op::Delete { slot: 0, key: 1 }).unwrap();
        runner.crash_and_verify().unwrap();
        assert_eq!(runner.model().rows(), vec![(1, 1)]);
    }

    #[test]
    fn duplicate_insert_matches_model() {
        let mut runner = ModelRunner::new(TestDatabase::new()).unwrap();
        runner.apply(Op::Insert { slot: 0, key: 1, value: 1 }).unwrap();
        runner.apply(Op::Insert { slot: 0, key: 1, value: 5 }).unwrap();
        runner.apply(Op::Update { slot: 0, key: 9, value: 5 }).unwrap();
        runner.verify().unwrap();
    }
}
