//! Crash recovery testing for shadowdb.
//!
//! This module provides utilities for testing crash recovery behavior.
//! It simulates crashes at various points during operations and verifies
//! that the database recovers to a transaction-consistent state.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - Committed rows survive
//! 2. **Crash before commit** - Uncommitted edits are undone
//! 3. **Torn commit record** - A half-written commit does not count
//! 4. **Failed sync** - An edit whose sync failed is undone
//! 5. **Crash after rollback** - Rolled back edits stay rolled back
//! 6. **Loser spanning a checkpoint** - Edits flushed by a checkpoint are
//!    still undone
//! 7. **Torn checkpoint after publish** - A shadow newer than the last
//!    checkpoint record still recovers, twice in a row
//! 8. **Lost data directory** - The shadow copy plus the log rebuild it
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shadowdb_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! let results = harness.run_all();
//! assert!(results.iter().all(|r| r.passed));
//! ```

use crate::fixtures::TestDatabase;
use shadowdb_core::{CoreError, TableKind};
use shadowdb_storage::{LogBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Failure switches shared between a test and a [`CrashableBackend`].
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl CrashControl {
    fn new() -> Self {
        Self {
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }

    /// Lets `bytes` more bytes through, then tears the append that crosses
    /// the limit and fails everything after it.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether the next sync fails and takes the device down.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether the device has gone down.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn down(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

/// A log device wrapper that can simulate crashes.
///
/// Once crashed, every mutating call fails, including the truncate a log
/// uses to cut back a failed append, so torn bytes stay on the inner
/// device exactly as a power loss would leave them.
pub struct CrashableBackend {
    inner: Box<dyn LogBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Creates a new crashable device wrapping an inner device.
    pub fn new(inner: Box<dyn LogBackend>) -> Self {
        Self {
            inner,
            control: Arc::new(CrashControl::new()),
        }
    }

    /// Returns the switches controlling this device.
    pub fn control(&self) -> Arc<CrashControl> {
        Arc::clone(&self.control)
    }

    fn ensure_up(&self, what: &str) -> StorageResult<()> {
        if self.control.has_crashed() {
            Err(self.control.down(what))
        } else {
            Ok(())
        }
    }
}

impl LogBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.ensure_up("write")?;
        let len = data.len() as u64;
        let current = self.control.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.control.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.control.down("write"));
        }

        // Write partial data up to the crash point.
        if current + len > threshold {
            let partial = usize::try_from(threshold - current).unwrap_or(data.len());
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
            }
            return Err(self.control.down("partial write"));
        }

        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_up("flush")?;
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_up("sync")?;
        if self.control.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.control.down("sync"));
        }
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_up("truncate")?;
        self.inner.truncate(new_size)
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            error: Some(error.to_string()),
        }
    }

    fn check(description: &str, ok: bool, error: &str) -> Self {
        if ok {
            Self::pass(description)
        } else {
            Self::fail(description, error)
        }
    }
}

const TABLE: &str = "t";

/// Test harness for crash recovery scenarios.
///
/// Every scenario builds its own database, so scenarios are independent.
#[derive(Debug, Default)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        &mut self,
        description: &str,
        result: Result<CrashRecoveryResult, CoreError>,
    ) -> CrashRecoveryResult {
        let result =
            result.unwrap_or_else(|e| CrashRecoveryResult::fail(description, &e.to_string()));
        self.results.push(result.clone());
        result
    }

    /// Tests that committed rows survive a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Committed data survives crash";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let mut db = TestDatabase::new();
            db.create_table(TableKind::BTree, TABLE)?;
            for key in 0..10 {
                db.transaction(|txid| db.insert(txid, TABLE, key, key + 100))?;
            }

            db.kill();
            db.try_reopen()?;

            let rows = db.scan(TABLE)?;
            let expected: Vec<_> = (0..10).map(|key| (key, key + 100)).collect();
            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                rows == expected,
                &format!("expected {expected:?}, found {rows:?}"),
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Tests that uncommitted edits are undone after a crash.
    pub fn test_uncommitted_data_discarded(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Uncommitted data discarded after crash";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let mut db = TestDatabase::new();
            db.create_table(TableKind::BTree, TABLE)?;
            db.transaction(|txid| db.insert(txid, TABLE, 0, 1))?;

            let txid = db.begin()?;
            for key in 1..6 {
                db.insert(txid, TABLE, key, key)?;
            }
            db.update(txid, TABLE, 0, 2)?;

            db.kill();
            db.try_reopen()?;

            let rows = db.scan(TABLE)?;
            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                rows == vec![(0, 1)] && db.recovery_report().losers == vec![txid],
                &format!("found {rows:?}"),
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Tests that a commit record torn by a crash does not commit.
    pub fn test_torn_commit_record(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Torn commit record does not commit";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let (mut db, control) = TestDatabase::crashable();
            db.create_table(TableKind::BTree, TABLE)?;
            db.transaction(|txid| db.insert(txid, TABLE, 1, 1))?;

            let txid = db.begin()?;
            db.insert(txid, TABLE, 2, 2)?;
            control.crash_after(5);
            if db.commit(txid).is_ok() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    "commit succeeded on a crashed device",
                ));
            }

            db.kill();
            db.try_reopen()?;

            let rows = db.scan(TABLE)?;
            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                rows == vec![(1, 1)],
                &format!("found {rows:?}"),
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Tests that an edit whose sync failed is undone.
    pub fn test_failed_sync(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Edit with failed sync is undone";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let (mut db, control) = TestDatabase::crashable();
            db.create_table(TableKind::BTree, TABLE)?;
            let txid = db.begin()?;

            control.set_fail_on_sync(true);
            if db.insert(txid, TABLE, 7, 7).is_ok() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    "insert succeeded without a durable log record",
                ));
            }

            db.kill();
            db.try_reopen()?;

            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                db.get(TABLE, 7)?.is_none(),
                "key 7 survived",
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Tests that a rollback stays rolled back across a crash.
    pub fn test_rollback_then_crash(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Rollback survives crash";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let mut db = TestDatabase::new();
            db.create_table(TableKind::Hash, TABLE)?;
            db.transaction(|txid| db.insert(txid, TABLE, 1, 10))?;

            let txid = db.begin()?;
            db.update(txid, TABLE, 1, 20)?;
            db.insert(txid, TABLE, 2, 20)?;
            db.rollback(txid)?;

            db.kill();
            db.try_reopen()?;

            let rows = db.scan(TABLE)?;
            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                rows == vec![(1, 10)] && !db.recovery_report().had_losers(),
                &format!("found {rows:?}"),
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Tests that a loser whose edits a checkpoint flushed is still undone.
    pub fn test_loser_spanning_checkpoint(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Loser spanning a checkpoint is undone";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let mut db = TestDatabase::new();
            db.create_table(TableKind::BTree, TABLE)?;
            let loser = db.begin()?;
            db.insert(loser, TABLE, 1, 1)?;
            db.checkpoint()?;
            db.insert(loser, TABLE, 2, 2)?;
            db.transaction(|txid| db.insert(txid, TABLE, 3, 3))?;

            db.kill();
            db.try_reopen()?;

            let rows = db.scan(TABLE)?;
            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                rows == vec![(3, 3)],
                &format!("found {rows:?}"),
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Tests that a checkpoint torn after its shadow was published still
    /// recovers from the previous checkpoint.
    pub fn test_torn_checkpoint_after_publish(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Checkpoint torn after shadow publish recovers";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let (mut db, control) = TestDatabase::crashable();
            db.create_table(TableKind::BTree, TABLE)?;
            db.transaction(|txid| db.insert(txid, TABLE, 1, 1))?;
            let loser = db.begin()?;
            db.insert(loser, TABLE, 2, 2)?;
            db.checkpoint()?;
            db.insert(loser, TABLE, 3, 3)?;

            control.crash_after(5);
            if db.checkpoint().is_ok() {
                return Ok(CrashRecoveryResult::fail(
                    DESCRIPTION,
                    "checkpoint succeeded on a crashed device",
                ));
            }

            db.kill();
            db.try_reopen()?;
            let first = db.scan(TABLE)?;
            let first_losers = db.recovery_report().losers.clone();

            db.kill();
            db.try_reopen()?;
            let second = db.scan(TABLE)?;

            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                first == vec![(1, 1)]
                    && first_losers == vec![loser]
                    && second == first
                    && !db.recovery_report().had_losers(),
                &format!("found {first:?} then {second:?}"),
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Tests that a deleted data directory is rebuilt from the shadow copy
    /// and the log.
    pub fn test_lost_data_directory(&mut self) -> CrashRecoveryResult {
        const DESCRIPTION: &str = "Lost data directory rebuilt from shadow";
        let result = (|| -> Result<CrashRecoveryResult, CoreError> {
            let mut db = TestDatabase::new();
            db.create_table(TableKind::BTree, TABLE)?;
            db.transaction(|txid| db.insert(txid, TABLE, 1, 1))?;
            db.checkpoint()?;
            db.transaction(|txid| db.insert(txid, TABLE, 2, 2))?;

            db.kill();
            std::fs::remove_dir_all(db.path().join("data"))?;
            db.try_reopen()?;

            let rows = db.scan(TABLE)?;
            Ok(CrashRecoveryResult::check(
                DESCRIPTION,
                rows == vec![(1, 1), (2, 2)],
                &format!("found {rows:?}"),
            ))
        })();
        self.record(DESCRIPTION, result)
    }

    /// Runs every scenario and returns their results.
    pub fn run_all(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_committed_data_survives(),
            self.test_uncommitted_data_discarded(),
            self.test_torn_commit_record(),
            self.test_failed_sync(),
            self.test_rollback_then_crash(),
            self.test_loser_spanning_checkpoint(),
            self.test_torn_checkpoint_after_publish(),
            self.test_lost_data_directory(),
        ]
    }

    /// Returns a summary of all test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "Crash Recovery Tests: {}/{} passed\n",
            passed,
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "✓" } else { "✗" };
            summary.push_str(&format!("  {status} {}\n", result.description));
            if let Some(error) = &result.error {
                summary.push_str(&format!("      {error}\n"));
            }
        }
        summary
    }
}
