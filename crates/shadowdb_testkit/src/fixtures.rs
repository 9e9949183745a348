//! Test fixtures for database testing.
//!
//! Provides helpers that open a database in a temporary directory and can
//! crash and reopen it in place.

use crate::crash::{CrashControl, CrashableBackend};
use shadowdb_core::{Config, CoreResult, Database, TableKind};
use shadowdb_storage::{LogBackend, MemoryBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A database in a temporary directory that can be crashed and reopened.
///
/// Dropping the inner handle without closing it is a crash: nothing the
/// database held in memory survives, only the directory and the log.
pub struct TestDatabase {
    db: Option<Database>,
    config: Config,
    /// Shared log when the log lives in memory instead of `wal.log`.
    log: Option<MemoryBackend>,
    temp_dir: TempDir,
}

impl TestDatabase {
    /// Opens a database with its log on disk and default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Opens a database with its log on disk.
    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut test_db = Self {
            db: None,
            config,
            log: None,
            temp_dir,
        };
        test_db.try_reopen().expect("Failed to open database");
        test_db
    }

    /// Opens a database whose log lives in memory.
    ///
    /// The log is shared across crashes, so it behaves like a device that
    /// survives the process.
    pub fn in_memory_log() -> Self {
        let log = MemoryBackend::new();
        let device = Box::new(log.clone());
        Self::open_on_device(Config::default(), log, device)
    }

    /// Opens a database whose in-memory log can be made to fail or tear.
    ///
    /// The failure switch only affects the first open; reopening after a
    /// crash reads the same bytes through a healthy device.
    pub fn crashable() -> (Self, Arc<CrashControl>) {
        let log = MemoryBackend::new();
        let device = CrashableBackend::new(Box::new(log.clone()));
        let control = device.control();
        let test_db = Self::open_on_device(Config::default(), log, Box::new(device));
        (test_db, control)
    }

    fn open_on_device(config: Config, log: MemoryBackend, device: Box<dyn LogBackend>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("db");
        let db = Database::open_with_backend(&path, config.clone(), device)
            .expect("Failed to open database");
        Self {
            db: Some(db),
            config,
            log: Some(log),
            temp_dir,
        }
    }

    /// Returns the database directory.
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().join("db")
    }

    /// Returns the raw log bytes when the log lives in memory.
    pub fn log_bytes(&self) -> Option<Vec<u8>> {
        self.log.as_ref().map(MemoryBackend::data)
    }

    /// Drops the database without closing it.
    pub fn kill(&mut self) {
        self.db = None;
    }

    /// Drops the database without closing it and reopens it, running
    /// recovery.
    pub fn crash(&mut self) {
        self.kill();
        self.try_reopen().expect("Failed to recover database");
    }

    /// Closes the database cleanly and reopens it.
    pub fn reopen(&mut self) {
        if let Some(db) = self.db.take() {
            db.close().expect("Failed to close database");
        }
        self.try_reopen().expect("Failed to reopen database");
    }

    /// Opens the database if it is not open, returning the open error.
    ///
    /// # Errors
    ///
    /// Returns whatever locking, priming or recovery reports.
    pub fn try_reopen(&mut self) -> CoreResult<()> {
        if self.db.is_some() {
            return Ok(());
        }
        let path = self.path();
        let db = match &self.log {
            Some(log) => Database::open_with_backend(&path, self.config.clone(), Box::new(log.clone()))?,
            None => Database::open_with_config(&path, self.config.clone())?,
        };
        self.db = Some(db);
        Ok(())
    }

    /// Returns the open database.
    ///
    /// # Panics
    ///
    /// Panics after [`kill`](Self::kill) until the database is reopened.
    pub fn db(&self) -> &Database {
        self.db.as_ref().expect("Database is not open")
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        self.db()
    }
}

/// Runs a test with a temporary database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::new();
    f(test_db.db())
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Name of the table the scenarios populate.
    pub const TABLE: &str = "t";

    /// Creates a database whose table `t` holds `rows` committed keys
    /// `0..rows`, each mapped to ten times its key.
    pub fn populated_database(rows: i64) -> TestDatabase {
        let test_db = TestDatabase::new();
        test_db
            .create_table(TableKind::BTree, TABLE)
            .expect("Failed to create table");
        test_db
            .transaction(|txid| {
                for key in 0..rows {
                    test_db.insert(txid, TABLE, key, key * 10)?;
                }
                Ok(())
            })
            .expect("Failed to populate table");
        test_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_db() {
        with_temp_db(|db| {
            db.create_table(TableKind::Hash, "t").unwrap();
            assert_eq!(db.table_names(), vec!["t".to_string()]);
        });
    }

    #[test]
    fn test_crash_runs_recovery() {
        let mut db = scenarios::populated_database(3);
        let txid = db.begin().unwrap();
        db.update(txid, scenarios::TABLE, 0, 99).unwrap();

        db.crash();
        assert_eq!(db.recovery_report().losers, vec![txid]);
        assert_eq!(db.get(scenarios::TABLE, 0).unwrap(), Some(0));
    }

    #[test]
    fn test_reopen_after_close() {
        let mut db = scenarios::populated_database(2);
        db.reopen();
        assert!(!db.recovery_report().had_losers());
        assert_eq!(db.scan(scenarios::TABLE).unwrap(), vec![(0, 0), (1, 10)]);
    }

    #[test]
    fn test_memory_log_survives_crash() {
        let mut db = TestDatabase::in_memory_log();
        db.create_table(TableKind::BTree, "t").unwrap();
        db.transaction(|txid| db.insert(txid, "t", 1, 1)).unwrap();
        let before = db.log_bytes().unwrap();

        db.crash();
        assert!(db.log_bytes().unwrap().starts_with(&before));
        assert_eq!(db.get("t", 1).unwrap(), Some(1));
        assert!(!db.path().join("wal.log").exists());
    }
}
