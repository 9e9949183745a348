//! Crash recovery: analysis, redo and undo.

use super::RecoveryManager;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use crate::wal::LogRecord;
use serde::Serialize;
use std::collections::HashSet;

/// Summary of a recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Records read from the log.
    pub records_scanned: usize,
    /// Byte offset of the checkpoint replay started from, if any.
    pub replay_start: Option<u64>,
    /// Table and edit records reapplied by redo.
    pub redone: usize,
    /// Edit records reversed by undo.
    pub undone: usize,
    /// Transactions closed by a commit record during redo.
    pub committed: usize,
    /// Transactions that had no commit record and were undone, sorted.
    pub losers: Vec<TransactionId>,
}

impl RecoveryReport {
    /// Returns true if recovery had to undo any transaction.
    #[must_use]
    pub fn had_losers(&self) -> bool {
        !self.losers.is_empty()
    }
}

impl RecoveryManager {
    /// Brings the store back to a transaction-consistent state after a crash.
    ///
    /// 1. **Analysis**: read the whole log and find the last checkpoint.
    ///    Every transaction it lists is begun and presumed open.
    /// 2. **Redo**: from that checkpoint to the end of the log, reapply table
    ///    and edit records, begin transactions at their start record and close
    ///    them at their commit record.
    /// 3. **Undo**: walk the whole log backwards, reversing every edit of a
    ///    transaction still open and closing it at its start record. Each
    ///    reversal is logged as a compensation edit and each closure as a
    ///    commit record, so the next recovery redoes them.
    ///
    /// Must run before the store takes any traffic. All in-memory log stacks
    /// are cleared afterwards.
    ///
    /// # Errors
    ///
    /// Any error aborts recovery: `MalformedRecord` for a damaged log,
    /// `UnexpectedLogOrder` for a checkpoint after the replay start or an
    /// open transaction without a start record, and any storage engine or
    /// transaction tracker error.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let mut state = self.state.lock();

        let records: Vec<(u64, LogRecord)> = state.log.read_all()?;
        let checkpoint = records
            .iter()
            .rposition(|(_, record)| matches!(record, LogRecord::Checkpoint { .. }));

        let mut report = RecoveryReport {
            records_scanned: records.len(),
            replay_start: checkpoint.map(|index| records[index].0),
            ..RecoveryReport::default()
        };
        let mut open: HashSet<TransactionId> = HashSet::new();

        if let Some((_, LogRecord::Checkpoint { active })) = checkpoint.map(|i| &records[i]) {
            for txid in active {
                self.tracker.begin(*txid)?;
                open.insert(*txid);
            }
        }
        tracing::info!(
            records = report.records_scanned,
            replay_start = ?report.replay_start,
            open_at_checkpoint = open.len(),
            "recovery analysis complete"
        );

        let start = checkpoint.unwrap_or(0);
        for (index, (offset, record)) in records.iter().enumerate().skip(start) {
            match record {
                LogRecord::Start { txid } => {
                    if open.insert(*txid) {
                        self.tracker.begin(*txid)?;
                    }
                }
                LogRecord::Table { .. } | LogRecord::Edit { .. } => {
                    self.redo(record)?;
                    report.redone += 1;
                }
                LogRecord::Commit { txid } => {
                    self.tracker.commit(*txid)?;
                    open.remove(txid);
                    report.committed += 1;
                }
                LogRecord::Checkpoint { .. } => {
                    if Some(index) != checkpoint {
                        return Err(CoreError::unexpected_log_order(format!(
                            "checkpoint at offset {offset} follows the replay start"
                        )));
                    }
                }
            }
        }
        tracing::info!(
            redone = report.redone,
            committed = report.committed,
            open = open.len(),
            "recovery redo complete"
        );

        let mut losers: Vec<_> = open.iter().copied().collect();
        losers.sort();

        let started: HashSet<TransactionId> = records
            .iter()
            .filter_map(|(_, record)| match record {
                LogRecord::Start { txid } => Some(*txid),
                _ => None,
            })
            .collect();
        let missing: Vec<_> = losers
            .iter()
            .filter(|txid| !started.contains(txid))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::unexpected_log_order(format!(
                "no start record for open transactions {}",
                missing.join(", ")
            )));
        }

        // Loser closure is logged like a rollback so later recoveries redo
        // it instead of undoing the loser again.
        for (_, record) in records.iter().rev() {
            if open.is_empty() {
                break;
            }
            match record {
                LogRecord::Start { txid } if open.contains(txid) => {
                    state.log.append(&LogRecord::Commit { txid: *txid })?;
                    self.tracker.commit(*txid)?;
                    open.remove(txid);
                }
                LogRecord::Edit { txid, .. } if open.contains(txid) => {
                    if let Some(compensation) = record.compensation() {
                        state.log.append(&compensation)?;
                    }
                    self.undo(record)?;
                    report.undone += 1;
                }
                _ => {}
            }
        }

        state.stacks.clear();
        report.losers = losers;
        tracing::info!(
            undone = report.undone,
            losers = report.losers.len(),
            "recovery undo complete"
        );
        Ok(report)
    }
}
