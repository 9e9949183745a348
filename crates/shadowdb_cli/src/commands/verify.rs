//! Verify command.

use super::{open_log, CliError};
use serde::Serialize;
use shadowdb_core::wal::LogRecordIterator;
use shadowdb_core::{CoreError, LogRecord, TransactionId};
use shadowdb_storage::LogBackend;
use std::collections::BTreeSet;
use std::path::Path;

/// Log verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyResult {
    /// Complete records read.
    pub records: usize,
    /// Start records.
    pub starts: usize,
    /// Table records.
    pub tables: usize,
    /// Edit records.
    pub edits: usize,
    /// Commit records.
    pub commits: usize,
    /// Checkpoint records.
    pub checkpoints: usize,
    /// Offset of an incomplete final record.
    pub torn_tail: Option<u64>,
    /// Transactions recovery would roll back.
    pub open_transactions: Vec<TransactionId>,
    /// Problems that would make recovery fail.
    pub errors: Vec<String>,
    /// Suspicious but recoverable findings.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    /// Returns true if recovery is expected to succeed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Scans the whole log and checks record ordering.
///
/// Open transactions are tracked the way recovery sees them: each checkpoint
/// replaces the open set with its active set, later starts add to it and
/// later commits remove from it. Commit problems before the last checkpoint
/// are never replayed and only count as warnings.
///
/// # Errors
///
/// Returns an error only if the log cannot be read. Damaged records are
/// reported in the result.
pub fn verify_log(backend: &dyn LogBackend) -> Result<VerifyResult, CliError> {
    let mut result = VerifyResult::default();
    let mut started: BTreeSet<TransactionId> = BTreeSet::new();
    let mut open: BTreeSet<TransactionId> = BTreeSet::new();
    let mut replayed_errors: Vec<String> = Vec::new();
    let mut iter = LogRecordIterator::new(backend)?;

    for item in iter.by_ref() {
        let (offset, record) = match item {
            Ok(item) => item,
            Err(CoreError::MalformedRecord { offset, message }) => {
                result
                    .errors
                    .push(format!("malformed record at offset {offset}: {message}"));
                break;
            }
            Err(e) => return Err(e.into()),
        };
        result.records += 1;

        match record {
            LogRecord::Start { txid } => {
                result.starts += 1;
                started.insert(txid);
                if !open.insert(txid) {
                    result
                        .warnings
                        .push(format!("offset {offset}: transaction {txid} started twice"));
                }
            }
            LogRecord::Table { .. } => result.tables += 1,
            LogRecord::Edit { txid, .. } => {
                result.edits += 1;
                if !open.contains(&txid) {
                    result.warnings.push(format!(
                        "offset {offset}: edit for transaction {txid} outside start/commit"
                    ));
                }
            }
            LogRecord::Commit { txid } => {
                result.commits += 1;
                if !open.remove(&txid) {
                    replayed_errors.push(format!(
                        "offset {offset}: commit for transaction {txid} that is not open"
                    ));
                }
            }
            LogRecord::Checkpoint { active } => {
                result.checkpoints += 1;
                result.warnings.append(&mut replayed_errors);
                for txid in active.difference(&open) {
                    result.warnings.push(format!(
                        "offset {offset}: checkpoint lists transaction {txid} that is not open"
                    ));
                }
                for txid in open.difference(&active) {
                    result.warnings.push(format!(
                        "offset {offset}: checkpoint omits open transaction {txid}"
                    ));
                }
                open = active;
            }
        }
    }

    result.errors.append(&mut replayed_errors);
    for txid in open.difference(&started) {
        result
            .errors
            .push(format!("open transaction {txid} has no start record"));
    }
    result.torn_tail = iter.torn_tail();
    result.open_transactions = open.into_iter().collect();
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying log at: {}", path.display());
    println!();

    let backend = open_log(path)?;
    let result = verify_log(&backend)?;

    println!("Records:       {}", result.records);
    println!("  START:       {}", result.starts);
    println!("  TABLE:       {}", result.tables);
    println!("  EDIT:        {}", result.edits);
    println!("  COMMIT:      {}", result.commits);
    println!("  CHECKPOINT:  {}", result.checkpoints);
    if let Some(torn) = result.torn_tail {
        println!("Torn tail:     offset {torn} (discarded on next open)");
    }
    if !result.open_transactions.is_empty() {
        println!(
            "Open:          {} transaction(s) will be rolled back by recovery",
            result.open_transactions.len()
        );
        for txid in &result.open_transactions {
            println!("  - {txid}");
        }
    }
    if !path.join("data").is_dir() {
        println!("Note: no data directory; recovery will rebuild it from the log");
    }

    if !result.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &result.warnings {
            println!("  - {warning}");
        }
    }

    println!();
    if result.passed() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed:");
        for error in &result.errors {
            println!("  - {error}");
        }
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowdb_core::{Action, TableKind};
    use shadowdb_storage::MemoryBackend;

    fn append(log: &mut MemoryBackend, record: &LogRecord) {
        log.append(record.encode().unwrap().as_bytes()).unwrap();
    }

    #[test]
    fn clean_log_passes() {
        let mut log = MemoryBackend::new();
        let txid = TransactionId::random();
        append(
            &mut log,
            &LogRecord::Table {
                kind: TableKind::BTree,
                name: "t".to_string(),
            },
        );
        append(&mut log, &LogRecord::Start { txid });
        append(
            &mut log,
            &LogRecord::Edit {
                txid,
                table: "t".to_string(),
                action: Action::Insert,
                key: 1,
                old_value: 0,
                new_value: 10,
            },
        );
        append(&mut log, &LogRecord::Commit { txid });

        let result = verify_log(&log).unwrap();
        assert!(result.passed());
        assert!(result.warnings.is_empty());
        assert_eq!(result.records, 4);
        assert_eq!(result.edits, 1);
        assert!(result.open_transactions.is_empty());
    }

    #[test]
    fn open_transactions_are_listed() {
        let mut log = MemoryBackend::new();
        let txid = TransactionId::random();
        append(&mut log, &LogRecord::Start { txid });
        append(
            &mut log,
            &LogRecord::Checkpoint {
                active: [txid].into_iter().collect(),
            },
        );

        let result = verify_log(&log).unwrap();
        assert!(result.passed());
        assert_eq!(result.open_transactions, vec![txid]);
    }

    #[test]
    fn stray_commit_fails() {
        let mut log = MemoryBackend::new();
        append(
            &mut log,
            &LogRecord::Commit {
                txid: TransactionId::random(),
            },
        );

        let result = verify_log(&log).unwrap();
        assert!(!result.passed());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn loser_closed_by_recovery_is_not_open() {
        let mut log = MemoryBackend::new();
        let txid = TransactionId::random();
        let insert = LogRecord::Edit {
            txid,
            table: "t".to_string(),
            action: Action::Insert,
            key: 1,
            old_value: 0,
            new_value: 10,
        };
        append(&mut log, &LogRecord::Start { txid });
        append(&mut log, &insert);
        append(
            &mut log,
            &LogRecord::Checkpoint {
                active: [txid].into_iter().collect(),
            },
        );
        append(&mut log, &insert.compensation().unwrap());
        append(&mut log, &LogRecord::Commit { txid });
        append(
            &mut log,
            &LogRecord::Checkpoint {
                active: BTreeSet::new(),
            },
        );

        let result = verify_log(&log).unwrap();
        assert!(result.passed());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert!(result.open_transactions.is_empty());
    }

    #[test]
    fn checkpoint_resets_the_open_set() {
        let mut log = MemoryBackend::new();
        let txid = TransactionId::random();
        append(&mut log, &LogRecord::Start { txid });
        append(
            &mut log,
            &LogRecord::Checkpoint {
                active: BTreeSet::new(),
            },
        );

        let result = verify_log(&log).unwrap();
        assert!(result.passed());
        assert!(result.open_transactions.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn stray_commit_before_a_checkpoint_is_a_warning() {
        let mut log = MemoryBackend::new();
        append(
            &mut log,
            &LogRecord::Commit {
                txid: TransactionId::random(),
            },
        );
        append(
            &mut log,
            &LogRecord::Checkpoint {
                active: BTreeSet::new(),
            },
        );

        let result = verify_log(&log).unwrap();
        assert!(result.passed());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn checkpoint_listing_unknown_transaction_fails() {
        let mut log = MemoryBackend::new();
        let txid = TransactionId::random();
        append(
            &mut log,
            &LogRecord::Checkpoint {
                active: [txid].into_iter().collect(),
            },
        );

        let result = verify_log(&log).unwrap();
        assert!(!result.passed());
        assert_eq!(result.open_transactions, vec![txid]);
    }

    #[test]
    fn checksum_mismatch_fails() {
        let mut log = MemoryBackend::new();
        let txid = TransactionId::random();
        let line = LogRecord::Start { txid }.encode().unwrap();
        let damaged = line.replacen("START", "START ", 1);
        log.append(damaged.as_bytes()).unwrap();

        let result = verify_log(&log).unwrap();
        assert!(!result.passed());
        assert_eq!(result.records, 0);
    }

    #[test]
    fn torn_tail_is_not_an_error() {
        let mut log = MemoryBackend::new();
        let txid = TransactionId::random();
        append(&mut log, &LogRecord::Start { txid });
        let size = log.size().unwrap();
        log.append(b"COMMIT").unwrap();

        let result = verify_log(&log).unwrap();
        assert!(result.passed());
        assert_eq!(result.torn_tail, Some(size));
        assert_eq!(result.open_transactions, vec![txid]);
    }
}
