//! Dump log command.

use super::{open_log, CliError};
use crate::Format;
use serde::Serialize;
use shadowdb_core::wal::LogRecordIterator;
use shadowdb_core::LogRecord;
use shadowdb_storage::LogBackend;
use std::path::Path;

/// Decoded log record for display.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Byte offset of the record in the log.
    pub offset: u64,
    /// Record tag.
    pub kind: &'static str,
    /// Owning transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Table name for table and edit records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Index structure for table records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_kind: Option<String>,
    /// Edit action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Edited key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<i64>,
    /// Value before the edit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<i64>,
    /// Value after the edit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<i64>,
    /// Transactions listed by a checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<String>>,
}

impl LogRecordInfo {
    fn new(offset: u64, record: &LogRecord) -> Self {
        let mut info = Self {
            offset,
            kind: record.tag(),
            txid: record.txid().map(|txid| txid.to_string()),
            table: None,
            table_kind: None,
            action: None,
            key: None,
            old_value: None,
            new_value: None,
            active: None,
        };
        match record {
            LogRecord::Table { kind, name } => {
                info.table = Some(name.clone());
                info.table_kind = Some(kind.to_string());
            }
            LogRecord::Edit {
                table,
                action,
                key,
                old_value,
                new_value,
                ..
            } => {
                info.table = Some(table.clone());
                info.action = Some(action.to_string());
                info.key = Some(*key);
                info.old_value = Some(*old_value);
                info.new_value = Some(*new_value);
            }
            LogRecord::Checkpoint { active } => {
                info.active = Some(active.iter().map(ToString::to_string).collect());
            }
            LogRecord::Start { .. } | LogRecord::Commit { .. } => {}
        }
        info
    }

    fn details(&self) -> String {
        match self.kind {
            "TABLE" => format!(
                "{} ({})",
                self.table.as_deref().unwrap_or("?"),
                self.table_kind.as_deref().unwrap_or("?")
            ),
            "EDIT" => format!(
                "{} {} {}[{}] {} -> {}",
                self.txid.as_deref().unwrap_or("?"),
                self.action.as_deref().unwrap_or("?"),
                self.table.as_deref().unwrap_or("?"),
                self.key.unwrap_or_default(),
                self.old_value.unwrap_or_default(),
                self.new_value.unwrap_or_default()
            ),
            "CHECKPOINT" => {
                let active = self.active.as_deref().unwrap_or_default();
                if active.is_empty() {
                    "no active transactions".to_string()
                } else {
                    format!("active: {}", active.join(", "))
                }
            }
            _ => self.txid.clone().unwrap_or_default(),
        }
    }
}

/// Records read from a log, plus where a torn tail starts if one was hit.
#[derive(Debug, Default)]
pub struct LogDump {
    /// Decoded records.
    pub records: Vec<LogRecordInfo>,
    /// Offset of trailing bytes that do not form a complete record.
    pub torn_tail: Option<u64>,
}

/// Decodes up to `limit` records at or after byte `offset`.
///
/// # Errors
///
/// Returns an error if the log cannot be read or a record is malformed.
pub fn read_records(
    backend: &dyn LogBackend,
    limit: Option<usize>,
    offset: u64,
) -> Result<LogDump, CliError> {
    let mut dump = LogDump::default();
    let mut iter = LogRecordIterator::new(backend)?;
    for item in iter.by_ref() {
        let (record_offset, record) = item?;
        if record_offset < offset {
            continue;
        }
        if limit.is_some_and(|limit| dump.records.len() >= limit) {
            return Ok(dump);
        }
        dump.records.push(LogRecordInfo::new(record_offset, &record));
    }
    dump.torn_tail = iter.torn_tail();
    Ok(dump)
}

/// Runs the dump-log command.
pub fn run(path: &Path, limit: Option<usize>, offset: u64, format: Format) -> Result<(), CliError> {
    let backend = open_log(path)?;
    let dump = read_records(&backend, limit, offset)?;

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&dump.records)?);
        }
        Format::Text => {
            println!("Log: {}", backend.path().display());
            println!("Size: {} bytes", backend.size()?);
            println!();
            for info in &dump.records {
                println!("[{:010}] {:10} {}", info.offset, info.kind, info.details());
            }
            println!();
            println!("Total: {} records", dump.records.len());
            if let Some(torn) = dump.torn_tail {
                println!("Torn tail at offset {torn} (discarded on next open)");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowdb_core::{Database, TableKind};
    use shadowdb_storage::MemoryBackend;

    fn sample_log() -> MemoryBackend {
        let dir = tempfile::tempdir().unwrap();
        let log = MemoryBackend::new();
        let db = Database::open_with_backend(
            &dir.path().join("db"),
            shadowdb_core::Config::default(),
            Box::new(log.clone()),
        )
        .unwrap();
        db.create_table(TableKind::BTree, "users").unwrap();
        let txid = db.begin().unwrap();
        db.insert(txid, "users", 1, 100).unwrap();
        db.commit(txid).unwrap();
        log
    }

    #[test]
    fn dumps_every_record() {
        let log = sample_log();
        let dump = read_records(&log, None, 0).unwrap();
        let kinds: Vec<_> = dump.records.iter().map(|info| info.kind).collect();
        assert_eq!(kinds, vec!["TABLE", "START", "EDIT", "COMMIT"]);
        assert_eq!(dump.records[2].key, Some(1));
        assert_eq!(dump.records[2].new_value, Some(100));
        assert!(dump.torn_tail.is_none());
    }

    #[test]
    fn limit_and_offset_narrow_the_dump() {
        let log = sample_log();
        let all = read_records(&log, None, 0).unwrap();
        let second = all.records[1].offset;

        let dump = read_records(&log, Some(2), second).unwrap();
        let kinds: Vec<_> = dump.records.iter().map(|info| info.kind).collect();
        assert_eq!(kinds, vec!["START", "EDIT"]);
    }

    #[test]
    fn torn_tail_is_reported() {
        let mut log = sample_log();
        let size = log.size().unwrap();
        log.append(b"COMMIT 1234").unwrap();

        let dump = read_records(&log, None, 0).unwrap();
        assert_eq!(dump.records.len(), 4);
        assert_eq!(dump.torn_tail, Some(size));
    }

    #[test]
    fn json_output_skips_empty_fields() {
        let log = sample_log();
        let dump = read_records(&log, Some(1), 0).unwrap();
        let json = serde_json::to_value(&dump.records[0]).unwrap();
        assert_eq!(json["kind"], "TABLE");
        assert_eq!(json["table_kind"], "btree");
        assert!(json.get("txid").is_none());
        assert!(json.get("key").is_none());
    }
}
