//! Directory-backed table store.
//!
//! Each table is kept in memory and persisted as `<name>.tbl` in the live
//! store directory. Files are only rewritten when a table is flushed, so
//! between checkpoints the directory lags behind memory and a crash loses
//! the difference; the log restores it.

mod table;

use crate::dir::sync_directory;
use crate::engine::StorageEngine;
use crate::error::{CoreError, CoreResult};
use crate::types::TableKind;
use crate::wal::validate_table_name;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use table::{table_name_from_path, Table, TABLE_EXTENSION, TEMP_EXTENSION};

/// A [`StorageEngine`] over a directory of table files.
#[derive(Debug)]
pub struct TableStore {
    base: PathBuf,
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
}

impl TableStore {
    /// Opens the store in `base`, loading every table file found there.
    ///
    /// Leftover temporary files from an interrupted flush are removed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTableFile` if a table file cannot be decoded, or an
    /// I/O error.
    pub fn open(base: &Path) -> CoreResult<Self> {
        fs::create_dir_all(base)?;

        let mut tables = BTreeMap::new();
        let mut removed_temp = false;
        for entry in fs::read_dir(base)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.to_string_lossy().ends_with(TEMP_EXTENSION) {
                fs::remove_file(&path)?;
                removed_temp = true;
                continue;
            }
            let Some(name) = table_name_from_path(&path) else {
                continue;
            };
            let name = name.to_string();
            validate_table_name(&name)?;
            let table = Table::load(&name, path)?;
            tables.insert(name, Arc::new(table));
        }
        if removed_temp {
            sync_directory(base)?;
        }

        tracing::debug!(path = %base.display(), tables = tables.len(), "opened table store");
        Ok(Self {
            base: base.to_path_buf(),
            tables: RwLock::new(tables),
        })
    }

    fn table(&self, name: &str) -> CoreResult<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::table_not_found(name))
    }

    /// Returns the kind of a table.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn table_kind(&self, name: &str) -> CoreResult<TableKind> {
        Ok(self.table(name)?.kind())
    }

    /// Returns all rows of a table in key order.
    ///
    /// # Errors
    ///
    /// Returns `TableNotFound`.
    pub fn rows(&self, name: &str) -> CoreResult<Vec<(i64, i64)>> {
        Ok(self.table(name)?.rows())
    }

    /// Returns true if any table has unflushed changes.
    #[must_use]
    pub fn has_dirty_tables(&self) -> bool {
        self.tables.read().values().any(|t| t.is_dirty())
    }
}

impl StorageEngine for TableStore {
    fn create_table(&self, kind: TableKind, name: &str) -> CoreResult<()> {
        validate_table_name(name)?;
        let table = {
            let mut tables = self.tables.write();
            if tables.contains_key(name) {
                return Err(CoreError::TableExists {
                    name: name.to_string(),
                });
            }
            let path = self.base.join(format!("{name}.{TABLE_EXTENSION}"));
            let table = Arc::new(Table::new(name, kind, path));
            tables.insert(name.to_string(), Arc::clone(&table));
            table
        };
        table.flush()
    }

    fn insert(&self, table: &str, key: i64, value: i64) -> CoreResult<()> {
        self.table(table)?.insert(key, value)
    }

    fn update(&self, table: &str, key: i64, value: i64) -> CoreResult<()> {
        self.table(table)?.update(key, value)
    }

    fn delete(&self, table: &str, key: i64) -> CoreResult<()> {
        self.table(table)?.delete(key)
    }

    fn get(&self, table: &str, key: i64) -> CoreResult<Option<i64>> {
        Ok(self.table(table)?.get(key))
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    fn flush_table(&self, name: &str) -> CoreResult<()> {
        self.table(name)?.flush()
    }
}
