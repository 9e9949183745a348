//! Redo and undo of single records.

use super::RecoveryManager;
use crate::error::{CoreError, CoreResult};
use crate::types::Action;
use crate::wal::LogRecord;

impl RecoveryManager {
    /// Reapplies a table or edit record.
    ///
    /// Redo is idempotent: creating an existing table succeeds, an insert of
    /// a present key becomes an update, an update of a missing key becomes
    /// an insert, and deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedLogOrder` for other record kinds, or any other
    /// storage engine error.
    pub fn redo(&self, record: &LogRecord) -> CoreResult<()> {
        match record {
            LogRecord::Table { kind, name } => match self.engine.create_table(*kind, name) {
                Ok(()) | Err(CoreError::TableExists { .. }) => Ok(()),
                Err(e) => Err(e),
            },
            LogRecord::Edit {
                table,
                action,
                key,
                new_value,
                ..
            } => {
                let (table, key, value) = (table.as_str(), *key, *new_value);
                match action {
                    Action::Insert => match self.engine.insert(table, key, value) {
                        Err(CoreError::DuplicateKey { .. }) => {
                            self.engine.update(table, key, value)
                        }
                        result => result,
                    },
                    Action::Update => match self.engine.update(table, key, value) {
                        Err(CoreError::NoSuchKey { .. }) => self.engine.insert(table, key, value),
                        result => result,
                    },
                    Action::Delete => match self.engine.delete(table, key) {
                        Err(CoreError::NoSuchKey { .. }) => Ok(()),
                        result => result,
                    },
                }
            }
            other => Err(CoreError::unexpected_log_order(format!(
                "cannot redo a {} record",
                other.tag()
            ))),
        }
    }

    /// Reverses an edit record through the storage engine.
    ///
    /// Undoing an insert deletes the key, undoing an update restores the old
    /// value, undoing a delete reinserts the old value. The inverse is
    /// applied with the same fallbacks as redo, so a key that already holds
    /// its pre-edit state is accepted. Nothing is logged here; recovery logs
    /// the inverse before calling this.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedLogOrder` for non-edit records, or the storage
    /// engine's error.
    pub fn undo(&self, record: &LogRecord) -> CoreResult<()> {
        let compensation = record.compensation().ok_or_else(|| {
            CoreError::unexpected_log_order(format!("cannot undo a {} record", record.tag()))
        })?;
        self.redo(&compensation)
    }

    /// Applies an edit exactly as recorded, without any fallback.
    pub(super) fn apply(&self, record: &LogRecord) -> CoreResult<()> {
        let LogRecord::Edit {
            table,
            action,
            key,
            new_value,
            ..
        } = record
        else {
            return Err(CoreError::unexpected_log_order(format!(
                "cannot apply a {} record",
                record.tag()
            )));
        };

        match action {
            Action::Insert => self.engine.insert(table, *key, *new_value),
            Action::Update => self.engine.update(table, *key, *new_value),
            Action::Delete => self.engine.delete(table, *key),
        }
    }
}
