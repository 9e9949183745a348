//! Database facade: startup sequence and execution layer.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::engine::{StorageEngine, TransactionTracker};
use crate::error::{CoreError, CoreResult};
use crate::recovery::{prime, PrimeOutcome, RecoveryManager, RecoveryReport, ShadowCopy};
use crate::store::TableStore;
use crate::transaction::TransactionManager;
use crate::types::{Action, TableKind, TransactionId};
use crate::wal::LogFile;
use parking_lot::{Mutex, RwLock};
use shadowdb_storage::{FileBackend, LogBackend};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// The main database handle.
///
/// Opening a database locks its directory, primes the live store from the
/// shadow copy when needed, and runs crash recovery before any operation is
/// accepted. Every mutation is logged before it is applied.
///
/// # Example
///
/// ```rust,ignore
/// use shadowdb_core::{Database, TableKind};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("my_database"))?;
/// db.create_table(TableKind::BTree, "accounts")?;
///
/// db.transaction(|txid| db.insert(txid, "accounts", 1, 100))?;
/// assert_eq!(db.get("accounts", 1)?, Some(100));
///
/// db.close()?;
/// ```
///
/// # Crashes
///
/// `Database` has no `Drop` behaviour. Dropping it without [`close`]
/// leaves the directory exactly as a crash would, which is what the crash
/// tests rely on.
///
/// [`close`]: Database::close
pub struct Database {
    /// Configuration.
    config: Config,
    /// Database directory (holds the lock).
    dir: DatabaseDir,
    /// Live table store.
    store: Arc<TableStore>,
    /// Active transaction set.
    txn_manager: Arc<TransactionManager>,
    /// Log, checkpoints and rollback.
    recovery: RecoveryManager,
    /// Serializes check-log-apply sequences with checkpoints and rollbacks.
    exec: Mutex<()>,
    /// What startup priming did.
    prime_outcome: PrimeOutcome,
    /// Result of the recovery pass run at open.
    report: RecoveryReport,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens or creates a database in `path` with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked or recovery fails.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked, the log cannot be
    /// opened, or recovery fails.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = Self::open_dir(path, &config)?;
        let backend = FileBackend::open(&dir.wal_path())?;
        Self::open_in_dir(dir, config, Box::new(backend))
    }

    /// Opens a database whose log lives on `backend` instead of `wal.log`.
    ///
    /// Table data still lives under `path`. This is how tests inject a
    /// device that fails or tears writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked or recovery fails.
    pub fn open_with_backend(
        path: &Path,
        config: Config,
        backend: Box<dyn LogBackend>,
    ) -> CoreResult<Self> {
        let dir = Self::open_dir(path, &config)?;
        Self::open_in_dir(dir, config, backend)
    }

    fn open_dir(path: &Path, config: &Config) -> CoreResult<DatabaseDir> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        if !config.create_if_missing && dir.is_new_database() {
            return Err(CoreError::invalid_layout(
                "database does not exist and create_if_missing is false",
            ));
        }
        Ok(dir)
    }

    fn open_in_dir(
        dir: DatabaseDir,
        config: Config,
        backend: Box<dyn LogBackend>,
    ) -> CoreResult<Self> {
        let live = dir.data_dir();
        let prime_outcome = prime(&live, config.shadow_copy)?;

        let store = Arc::new(TableStore::open(&live)?);
        let txn_manager = Arc::new(TransactionManager::new());
        let log = LogFile::open(backend, config.sync_on_write)?;

        let mut recovery = RecoveryManager::new(
            Arc::clone(&store) as Arc<dyn StorageEngine>,
            Arc::clone(&txn_manager) as Arc<dyn TransactionTracker>,
            log,
        );
        if config.shadow_copy {
            recovery = recovery.with_shadow_copy(ShadowCopy::for_live(&live)?);
        }

        let report = recovery.recover()?;
        // Loser closure is already logged; this only shortens the next replay.
        if report.had_losers() && config.checkpoint_after_recovery {
            recovery.checkpoint()?;
        }

        tracing::info!(
            path = %dir.path().display(),
            prime = %prime_outcome,
            tables = store.table_names().len(),
            losers = report.losers.len(),
            "database opened"
        );

        Ok(Self {
            config,
            dir,
            store,
            txn_manager,
            recovery,
            exec: Mutex::new(()),
            prime_outcome,
            report,
            is_open: RwLock::new(true),
        })
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns `TableExists`, `InvalidArgument` for a bad name, or an I/O
    /// error.
    pub fn create_table(&self, kind: TableKind, name: &str) -> CoreResult<()> {
        self.ensure_open()?;
        let _exec = self.exec.lock();
        if self.store.table_names().iter().any(|t| t == name) {
            return Err(CoreError::TableExists {
                name: name.to_string(),
            });
        }
        self.recovery.table(kind, name)?;
        self.store.create_table(kind, name)
    }

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the start record cannot be logged.
    pub fn begin(&self) -> CoreResult<TransactionId> {
        self.ensure_open()?;
        let txid = TransactionId::random();
        let _exec = self.exec.lock();
        self.txn_manager.begin(txid)?;
        if let Err(e) = self.recovery.start(txid) {
            self.txn_manager.commit(txid)?;
            return Err(e);
        }
        Ok(txid)
    }

    /// Inserts a new key.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive`, `TableNotFound`, `DuplicateKey`, or a
    /// log error. Nothing is logged when a precondition fails.
    pub fn insert(&self, txid: TransactionId, table: &str, key: i64, value: i64) -> CoreResult<()> {
        self.ensure_open()?;
        let _exec = self.exec.lock();
        self.ensure_active(txid)?;
        if self.store.get(table, key)?.is_some() {
            return Err(CoreError::duplicate_key(table, key));
        }
        self.recovery.edit(txid, table, Action::Insert, key, 0, value)?;
        self.store.insert(table, key, value)
    }

    /// Replaces the value of an existing key.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive`, `TableNotFound`, `NoSuchKey`, or a
    /// log error.
    pub fn update(&self, txid: TransactionId, table: &str, key: i64, value: i64) -> CoreResult<()> {
        self.ensure_open()?;
        let _exec = self.exec.lock();
        self.ensure_active(txid)?;
        let old = self
            .store
            .get(table, key)?
            .ok_or_else(|| CoreError::no_such_key(table, key))?;
        self.recovery.edit(txid, table, Action::Update, key, old, value)?;
        self.store.update(table, key, value)
    }

    /// Removes an existing key.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive`, `TableNotFound`, `NoSuchKey`, or a
    /// log error.
    pub fn delete(&self, txid: TransactionId, table: &str, key: i64) -> CoreResult<()> {
        self.ensure_open()?;
        let _exec = self.exec.lock();
        self.ensure_active(txid)?;
        let old = self
            .store
            .get(table, key)?
            .ok_or_else(|| CoreError::no_such_key(table, key))?;
        self.recovery.edit(txid, table, Action::Delete, key, old, 0)?;
        self.store.delete(table, key)
    }

    /// Looks up a key.
    ///
    /// Reads see every applied edit, committed or not.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn get(&self, table: &str, key: i64) -> CoreResult<Option<i64>> {
        self.ensure_open()?;
        self.store.get(table, key)
    }

    /// Returns all rows of a table in key order.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn scan(&self, table: &str) -> CoreResult<Vec<(i64, i64)>> {
        self.ensure_open()?;
        self.store.rows(table)
    }

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive` or a log error.
    pub fn commit(&self, txid: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        let _exec = self.exec.lock();
        self.ensure_active(txid)?;
        self.recovery.commit(txid)?;
        self.txn_manager.commit(txid)
    }

    /// Rolls back a transaction, undoing all of its edits.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchTransaction` for an unknown or finished transaction, or
    /// a log or storage error.
    pub fn rollback(&self, txid: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        let _exec = self.exec.lock();
        self.recovery.rollback(txid)
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back and the error
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the function's error, or an error from begin, commit or
    /// rollback.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(TransactionId) -> CoreResult<T>,
    {
        let txid = self.begin()?;
        match f(txid) {
            Ok(value) => {
                self.commit(txid)?;
                Ok(value)
            }
            Err(e) => {
                self.rollback(txid)?;
                Err(e)
            }
        }
    }

    /// Takes a checkpoint and returns the transactions active at it.
    ///
    /// # Errors
    ///
    /// Returns a flush, copy or log error.
    pub fn checkpoint(&self) -> CoreResult<BTreeSet<TransactionId>> {
        self.ensure_open()?;
        let _exec = self.exec.lock();
        self.recovery.checkpoint()
    }

    /// Closes the database after a final checkpoint.
    ///
    /// Transactions still open are recorded as active by that checkpoint and
    /// undone by the next open.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint fails; the database stays open.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        {
            let _exec = self.exec.lock();
            self.recovery.checkpoint()?;
        }
        *is_open = false;
        tracing::info!(path = %self.dir.path().display(), "database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns the names of all tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.store.table_names()
    }

    /// Returns the transactions with unfinished work.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.recovery.active_transactions()
    }

    /// Returns the report of the recovery pass run at open.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// Returns what startup priming did.
    #[must_use]
    pub fn prime_outcome(&self) -> PrimeOutcome {
        self.prime_outcome
    }

    /// Returns the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    fn ensure_active(&self, txid: TransactionId) -> CoreResult<()> {
        if self.txn_manager.is_active(txid) {
            Ok(())
        } else {
            Err(CoreError::TransactionNotActive { txid })
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.dir.path())
            .field("is_open", &self.is_open())
            .field("tables", &self.table_names())
            .field("active", &self.txn_manager.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(path: &Path) -> Database {
        Database::open(path).unwrap()
    }

    #[test]
    fn fresh_database() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        assert!(db.is_open());
        assert_eq!(db.prime_outcome(), PrimeOutcome::Initialized);
        assert_eq!(db.recovery_report().records_scanned, 0);
        assert!(temp.path().join("data").is_dir());
        assert!(temp.path().join("data-recovery").is_dir());
        assert!(temp.path().join("wal.log").is_file());
    }

    #[test]
    fn missing_database_without_create() {
        let temp = tempdir().unwrap();
        let config = Config::new().create_if_missing(false);
        let result = Database::open_with_config(temp.path(), config);
        assert!(matches!(result, Err(CoreError::InvalidLayout { .. })));
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _db = open(temp.path());
        assert!(matches!(
            Database::open(temp.path()),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn crud_in_a_transaction() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        db.create_table(TableKind::BTree, "t").unwrap();

        let txid = db.begin().unwrap();
        db.insert(txid, "t", 1, 10).unwrap();
        db.insert(txid, "t", 2, 20).unwrap();
        db.update(txid, "t", 1, 11).unwrap();
        db.delete(txid, "t", 2).unwrap();
        db.commit(txid).unwrap();

        assert_eq!(db.scan("t").unwrap(), vec![(1, 11)]);
        assert!(db.active_transactions().is_empty());
    }

    #[test]
    fn preconditions_are_checked_before_logging() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        db.create_table(TableKind::Hash, "t").unwrap();
        let txid = db.begin().unwrap();
        db.insert(txid, "t", 1, 10).unwrap();
        let log_size = db.recovery.log_size().unwrap();

        assert!(matches!(
            db.insert(txid, "t", 1, 11),
            Err(CoreError::DuplicateKey { .. })
        ));
        assert!(matches!(
            db.update(txid, "t", 2, 0),
            Err(CoreError::NoSuchKey { .. })
        ));
        assert!(matches!(
            db.delete(txid, "t", 2),
            Err(CoreError::NoSuchKey { .. })
        ));
        assert!(matches!(
            db.insert(txid, "missing", 1, 1),
            Err(CoreError::TableNotFound { .. })
        ));
        assert!(matches!(
            db.create_table(TableKind::Hash, "t"),
            Err(CoreError::TableExists { .. })
        ));
        assert!(matches!(
            db.insert(TransactionId::random(), "t", 3, 3),
            Err(CoreError::TransactionNotActive { .. })
        ));
        assert_eq!(db.recovery.log_size().unwrap(), log_size);
    }

    #[test]
    fn transaction_helper_commits_or_rolls_back() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        db.create_table(TableKind::BTree, "t").unwrap();

        db.transaction(|txid| db.insert(txid, "t", 1, 10)).unwrap();
        let result: CoreResult<()> = db.transaction(|txid| {
            db.update(txid, "t", 1, 99)?;
            db.insert(txid, "t", 1, 0)
        });

        assert!(matches!(result, Err(CoreError::DuplicateKey { .. })));
        assert_eq!(db.get("t", 1).unwrap(), Some(10));
        assert!(db.active_transactions().is_empty());
    }

    #[test]
    fn data_survives_close_and_reopen() {
        let temp = tempdir().unwrap();
        {
            let db = open(temp.path());
            db.create_table(TableKind::BTree, "t").unwrap();
            db.transaction(|txid| db.insert(txid, "t", 5, 100)).unwrap();
            db.close().unwrap();
            assert!(matches!(db.get("t", 5), Err(CoreError::DatabaseClosed)));
        }

        let db = open(temp.path());
        assert_eq!(db.prime_outcome(), PrimeOutcome::RestoredFromShadow);
        assert_eq!(db.get("t", 5).unwrap(), Some(100));
        assert_eq!(db.recovery_report().redone, 0);
    }

    #[test]
    fn drop_behaves_like_a_crash() {
        let temp = tempdir().unwrap();
        let loser;
        {
            let db = open(temp.path());
            db.create_table(TableKind::BTree, "t").unwrap();
            db.transaction(|txid| db.insert(txid, "t", 1, 10)).unwrap();
            loser = db.begin().unwrap();
            db.update(loser, "t", 1, 20).unwrap();
        }

        let db = open(temp.path());
        assert_eq!(db.get("t", 1).unwrap(), Some(10));
        assert_eq!(db.recovery_report().losers, vec![loser]);
    }

    #[test]
    fn recovery_with_losers_checkpoints() {
        let temp = tempdir().unwrap();
        {
            let db = open(temp.path());
            db.create_table(TableKind::BTree, "t").unwrap();
            let txid = db.begin().unwrap();
            db.insert(txid, "t", 1, 10).unwrap();
        }
        {
            let db = open(temp.path());
            assert!(db.recovery_report().had_losers());
            assert_eq!(db.get("t", 1).unwrap(), None);
            db.transaction(|txid| db.insert(txid, "t", 1, 11)).unwrap();
        }

        // The second open's checkpoint moves the replay start past the
        // undone loser.
        let db = open(temp.path());
        assert!(db.recovery_report().losers.is_empty());
        assert_eq!(db.recovery_report().redone, 1);
        assert_eq!(db.get("t", 1).unwrap(), Some(11));
    }

    #[test]
    fn loser_closure_is_durable_without_checkpoint_after_recovery() {
        let temp = tempdir().unwrap();
        let config = Config::new().checkpoint_after_recovery(false);
        let loser;
        {
            let db = Database::open_with_config(temp.path(), config.clone()).unwrap();
            db.create_table(TableKind::BTree, "t").unwrap();
            loser = db.begin().unwrap();
            db.insert(loser, "t", 1, 10).unwrap();
        }
        {
            let db = Database::open_with_config(temp.path(), config.clone()).unwrap();
            assert_eq!(db.recovery_report().losers, vec![loser]);
            let winner = db.begin().unwrap();
            db.insert(winner, "t", 1, 11).unwrap();
            db.commit(winner).unwrap();
        }

        let db = Database::open_with_config(temp.path(), config).unwrap();
        assert!(!db.recovery_report().had_losers());
        assert_eq!(db.get("t", 1).unwrap(), Some(11));
    }

    #[test]
    fn missing_checkpoint_record_after_recovery_still_opens() {
        let temp = tempdir().unwrap();
        let loser;
        {
            let db = open(temp.path());
            db.create_table(TableKind::BTree, "t").unwrap();
            loser = db.begin().unwrap();
            db.insert(loser, "t", 1, 10).unwrap();
            db.checkpoint().unwrap();
        }
        {
            let db = open(temp.path());
            assert_eq!(db.recovery_report().losers, vec![loser]);
        }

        // Leave the shadow published by the post-recovery checkpoint but cut
        // the checkpoint record, as a crash between the two would.
        let wal = temp.path().join("wal.log");
        let text = std::fs::read_to_string(&wal).unwrap();
        let cut = text.trim_end().rfind('\n').map_or(0, |i| i + 1);
        assert!(text[cut..].starts_with("CHECKPOINT 0|"));
        std::fs::write(&wal, &text[..cut]).unwrap();

        let db = open(temp.path());
        assert_eq!(db.prime_outcome(), PrimeOutcome::RestoredFromShadow);
        assert!(!db.recovery_report().had_losers());
        assert_eq!(db.get("t", 1).unwrap(), None);
    }

    #[test]
    fn works_without_shadow_copy() {
        let temp = tempdir().unwrap();
        let config = Config::new().shadow_copy(false);
        {
            let db = Database::open_with_config(temp.path(), config.clone()).unwrap();
            db.create_table(TableKind::BTree, "t").unwrap();
            db.transaction(|txid| db.insert(txid, "t", 1, 10)).unwrap();
            db.checkpoint().unwrap();
            db.transaction(|txid| db.update(txid, "t", 1, 20)).unwrap();
        }
        assert!(!temp.path().join("data-recovery").exists());

        let db = Database::open_with_config(temp.path(), config).unwrap();
        assert_eq!(db.prime_outcome(), PrimeOutcome::OpenedAsIs);
        assert_eq!(db.get("t", 1).unwrap(), Some(20));
    }
}
