//! A single table and its on-disk file.

use crate::dir::sync_directory;
use crate::error::{CoreError, CoreResult};
use crate::types::TableKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of table files in the live directory.
pub(crate) const TABLE_EXTENSION: &str = "tbl";

/// Extension of a table file being written.
pub(crate) const TEMP_EXTENSION: &str = "tbl.tmp";

/// Serialized form of a table.
#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    kind: TableKind,
    rows: Vec<(i64, i64)>,
}

#[derive(Debug)]
struct TableState {
    rows: BTreeMap<i64, i64>,
    dirty: bool,
}

/// An in-memory table backed by one file.
///
/// Mutations only touch memory and mark the table dirty; [`Table::flush`]
/// writes the whole table atomically.
#[derive(Debug)]
pub(crate) struct Table {
    name: String,
    kind: TableKind,
    path: PathBuf,
    state: RwLock<TableState>,
}

impl Table {
    /// Creates an empty, dirty table that will live at `path`.
    pub(crate) fn new(name: &str, kind: TableKind, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            kind,
            path,
            state: RwLock::new(TableState {
                rows: BTreeMap::new(),
                dirty: true,
            }),
        }
    }

    /// Loads a table from its file.
    pub(crate) fn load(name: &str, path: PathBuf) -> CoreResult<Self> {
        let bytes = fs::read(&path)?;
        let file: TableFile = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::invalid_table_file(path.display().to_string(), e.to_string()))?;

        let mut rows = BTreeMap::new();
        for (key, value) in file.rows {
            if rows.insert(key, value).is_some() {
                return Err(CoreError::invalid_table_file(
                    path.display().to_string(),
                    format!("key {key} appears twice"),
                ));
            }
        }

        Ok(Self {
            name: name.to_string(),
            kind: file.kind,
            path,
            state: RwLock::new(TableState { rows, dirty: false }),
        })
    }

    pub(crate) fn kind(&self) -> TableKind {
        self.kind
    }

    pub(crate) fn get(&self, key: i64) -> Option<i64> {
        self.state.read().rows.get(&key).copied()
    }

    pub(crate) fn rows(&self) -> Vec<(i64, i64)> {
        self.state
            .read()
            .rows
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    pub(crate) fn insert(&self, key: i64, value: i64) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.rows.contains_key(&key) {
            return Err(CoreError::duplicate_key(&self.name, key));
        }
        state.rows.insert(key, value);
        state.dirty = true;
        Ok(())
    }

    pub(crate) fn update(&self, key: i64, value: i64) -> CoreResult<()> {
        let mut state = self.state.write();
        let slot = state
            .rows
            .get_mut(&key)
            .ok_or_else(|| CoreError::no_such_key(&self.name, key))?;
        *slot = value;
        state.dirty = true;
        Ok(())
    }

    pub(crate) fn delete(&self, key: i64) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.rows.remove(&key).is_none() {
            return Err(CoreError::no_such_key(&self.name, key));
        }
        state.dirty = true;
        Ok(())
    }

    /// Writes the table if dirty: temp file, fsync, rename, directory fsync.
    ///
    /// Holds the table's write lock throughout, so no update can slip in
    /// between serializing and clearing the dirty flag.
    pub(crate) fn flush(&self) -> CoreResult<()> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(());
        }

        let file = TableFile {
            kind: self.kind,
            rows: state.rows.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        let data = serde_json::to_vec(&file)
            .map_err(|e| CoreError::invalid_table_file(self.path.display().to_string(), e.to_string()))?;

        let temp_path = self.path.with_extension(TEMP_EXTENSION);
        let mut out = File::create(&temp_path)?;
        out.write_all(&data)?;
        out.sync_all()?;
        drop(out);

        fs::rename(&temp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            sync_directory(parent)?;
        }

        state.dirty = false;
        tracing::debug!(table = %self.name, rows = file.rows.len(), "flushed table");
        Ok(())
    }
}

/// Returns the table name encoded in a table file path, if it is one.
pub(crate) fn table_name_from_path(path: &Path) -> Option<&str> {
    if path.extension()? != TABLE_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()
}
