//! Log record types and their line encoding.

use crate::error::{CoreError, CoreResult};
use crate::types::{Action, TableKind, TransactionId};
use std::collections::BTreeSet;
use std::fmt;

/// Separates a record body from its checksum.
pub const CHECKSUM_SEPARATOR: char = '|';

/// Hex digits in an encoded checksum.
const CHECKSUM_HEX_LEN: usize = 8;

/// A durable event in the write-ahead log.
///
/// Every variant carries enough information to be redone or undone without
/// looking at any other record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A transaction has begun.
    Start {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// A table was created. Not part of any transaction.
    Table {
        /// Index structure of the table.
        kind: TableKind,
        /// Table name.
        name: String,
    },

    /// A single-key mutation.
    ///
    /// `old_value` drives undo and `new_value` drives redo. For an insert
    /// the old value is unused, for a delete the new value is unused.
    Edit {
        /// Transaction ID.
        txid: TransactionId,
        /// Table the key lives in.
        table: String,
        /// Kind of mutation.
        action: Action,
        /// The key.
        key: i64,
        /// Value before the mutation.
        old_value: i64,
        /// Value after the mutation.
        new_value: i64,
    },

    /// A transaction has finished.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
    },

    /// All dirty pages were flushed while these transactions were active.
    Checkpoint {
        /// Transactions still open at the checkpoint.
        active: BTreeSet<TransactionId>,
    },
}

impl LogRecord {
    /// Returns the leading tag of the encoded record.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Start { .. } => "START",
            Self::Table { .. } => "TABLE",
            Self::Edit { .. } => "EDIT",
            Self::Commit { .. } => "COMMIT",
            Self::Checkpoint { .. } => "CHECKPOINT",
        }
    }

    /// Returns the transaction this record belongs to, if any.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Start { txid } | Self::Edit { txid, .. } | Self::Commit { txid } => Some(*txid),
            Self::Table { .. } | Self::Checkpoint { .. } => None,
        }
    }

    /// Returns the edit that reverses this one, or `None` for non-edits.
    ///
    /// Rollback and recovery log these as compensation records before applying them.
    #[must_use]
    pub fn compensation(&self) -> Option<Self> {
        let Self::Edit {
            txid,
            table,
            action,
            key,
            old_value,
            new_value,
        } = self
        else {
            return None;
        };

        let (action, old_value, new_value) = match action {
            Action::Insert => (Action::Delete, *new_value, 0),
            Action::Update => (Action::Update, *new_value, *old_value),
            Action::Delete => (Action::Insert, 0, *old_value),
        };
        Some(Self::Edit {
            txid: *txid,
            table: table.clone(),
            action,
            key: *key,
            old_value,
            new_value,
        })
    }

    /// Encodes the record as one checksummed, newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a table name cannot be represented.
    pub fn encode(&self) -> CoreResult<String> {
        match self {
            Self::Table { name, .. } | Self::Edit { table: name, .. } => {
                validate_table_name(name)?;
            }
            _ => {}
        }

        let body = self.to_string();
        let crc = crc32fast::hash(body.as_bytes());
        Ok(format!("{body}{CHECKSUM_SEPARATOR}{crc:08x}\n"))
    }

    /// Decodes one line (without its trailing newline).
    ///
    /// `offset` is only used to locate the line in error messages.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` on a checksum mismatch, an unknown tag, a
    /// missing or surplus field, or a field that does not parse.
    pub fn decode(line: &str, offset: u64) -> CoreResult<Self> {
        let malformed = |message: String| CoreError::malformed_record(offset, message);

        let (body, crc_hex) = line
            .rsplit_once(CHECKSUM_SEPARATOR)
            .ok_or_else(|| malformed("missing checksum".to_string()))?;
        if crc_hex.len() != CHECKSUM_HEX_LEN {
            return Err(malformed(format!("bad checksum field {crc_hex:?}")));
        }
        let stored = u32::from_str_radix(crc_hex, 16)
            .map_err(|_| malformed(format!("bad checksum field {crc_hex:?}")))?;
        let computed = crc32fast::hash(body.as_bytes());
        if stored != computed {
            return Err(malformed(format!(
                "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
            )));
        }

        let fields: Vec<&str> = body.split(' ').collect();
        let tag = fields[0];
        let expect_fields = |n: usize| {
            if fields.len() == n {
                Ok(())
            } else {
                Err(malformed(format!(
                    "{tag} record has {} fields, expected {n}",
                    fields.len()
                )))
            }
        };
        let parse_txid = |s: &str| {
            s.parse::<TransactionId>()
                .map_err(|e| malformed(e.to_string()))
        };
        let parse_i64 = |s: &str| {
            s.parse::<i64>()
                .map_err(|_| malformed(format!("invalid integer {s:?}")))
        };
        let parse_name = |s: &str| {
            validate_table_name(s)
                .map(|()| s.to_string())
                .map_err(|e| malformed(e.to_string()))
        };

        match tag {
            "START" => {
                expect_fields(2)?;
                Ok(Self::Start {
                    txid: parse_txid(fields[1])?,
                })
            }
            "TABLE" => {
                expect_fields(3)?;
                let kind = fields[1]
                    .parse::<TableKind>()
                    .map_err(|e| malformed(e.to_string()))?;
                Ok(Self::Table {
                    kind,
                    name: parse_name(fields[2])?,
                })
            }
            "EDIT" => {
                expect_fields(7)?;
                let action = fields[3]
                    .parse::<Action>()
                    .map_err(|e| malformed(e.to_string()))?;
                Ok(Self::Edit {
                    txid: parse_txid(fields[1])?,
                    table: parse_name(fields[2])?,
                    action,
                    key: parse_i64(fields[4])?,
                    old_value: parse_i64(fields[5])?,
                    new_value: parse_i64(fields[6])?,
                })
            }
            "COMMIT" => {
                expect_fields(2)?;
                Ok(Self::Commit {
                    txid: parse_txid(fields[1])?,
                })
            }
            "CHECKPOINT" => {
                if fields.len() < 2 {
                    return Err(malformed("CHECKPOINT record has no count".to_string()));
                }
                let count: usize = fields[1]
                    .parse()
                    .map_err(|_| malformed(format!("invalid count {:?}", fields[1])))?;
                if fields.len() - 2 != count {
                    return Err(malformed(format!(
                        "CHECKPOINT record lists {} transactions, count says {count}",
                        fields.len() - 2
                    )));
                }
                let active = fields[2..]
                    .iter()
                    .map(|s| parse_txid(s))
                    .collect::<CoreResult<BTreeSet<_>>>()?;
                if active.len() != count {
                    return Err(malformed("duplicate transaction in checkpoint".to_string()));
                }
                Ok(Self::Checkpoint { active })
            }
            other => Err(malformed(format!("unknown record tag {other:?}"))),
        }
    }
}

/// Writes the record body (no checksum, no newline).
impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { txid } => write!(f, "START {txid}"),
            Self::Table { kind, name } => write!(f, "TABLE {kind} {name}"),
            Self::Edit {
                txid,
                table,
                action,
                key,
                old_value,
                new_value,
            } => write!(
                f,
                "EDIT {txid} {table} {action} {key} {old_value} {new_value}"
            ),
            Self::Commit { txid } => write!(f, "COMMIT {txid}"),
            Self::Checkpoint { active } => {
                write!(f, "CHECKPOINT {}", active.len())?;
                for txid in active {
                    write!(f, " {txid}")?;
                }
                Ok(())
            }
        }
    }
}

/// Checks that a table name survives the line encoding unchanged.
pub(crate) fn validate_table_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_argument("table name is empty"));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c == CHECKSUM_SEPARATOR || c == '/' || c == '\\')
    {
        return Err(CoreError::invalid_argument(format!(
            "table name {name:?} contains whitespace, '|' or a path separator"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn edit(action: Action, key: i64, old_value: i64, new_value: i64) -> LogRecord {
        LogRecord::Edit {
            txid: TransactionId::random(),
            table: "accounts".to_string(),
            action,
            key,
            old_value,
            new_value,
        }
    }

    fn roundtrip(record: &LogRecord) -> LogRecord {
        let line = record.encode().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        LogRecord::decode(line.trim_end_matches('\n'), 0).unwrap()
    }

    #[test]
    fn start_and_commit_roundtrip() {
        let txid = TransactionId::random();
        for record in [LogRecord::Start { txid }, LogRecord::Commit { txid }] {
            assert_eq!(roundtrip(&record), record);
            assert_eq!(record.txid(), Some(txid));
        }
    }

    #[test]
    fn table_roundtrip() {
        let record = LogRecord::Table {
            kind: TableKind::Hash,
            name: "orders_2024".to_string(),
        };
        assert_eq!(roundtrip(&record), record);
        assert_eq!(record.txid(), None);
    }

    #[test]
    fn edit_keeps_negative_and_extreme_values() {
        let record = edit(Action::Update, i64::MIN, -1, i64::MAX);
        assert_eq!(roundtrip(&record), record);
    }

    #[test]
    fn checkpoint_roundtrip_and_canonical_order() {
        let a = TransactionId::random();
        let b = TransactionId::random();
        let record = LogRecord::Checkpoint {
            active: [a, b].into_iter().collect(),
        };
        let swapped = LogRecord::Checkpoint {
            active: [b, a].into_iter().collect(),
        };
        assert_eq!(record.encode().unwrap(), swapped.encode().unwrap());
        assert_eq!(roundtrip(&record), record);

        let empty = LogRecord::Checkpoint {
            active: BTreeSet::new(),
        };
        assert_eq!(empty.to_string(), "CHECKPOINT 0");
        assert_eq!(roundtrip(&empty), empty);
    }

    #[test]
    fn encoding_is_tagged_text() {
        let txid = TransactionId::random();
        let line = LogRecord::Start { txid }.encode().unwrap();
        assert!(line.starts_with(&format!("START {txid}|")));
    }

    #[test]
    fn bad_table_names_are_rejected_on_encode() {
        for name in ["", "two words", "pipe|name", "tab\tname", "../escape"] {
            let record = LogRecord::Table {
                kind: TableKind::BTree,
                name: name.to_string(),
            };
            assert!(matches!(
                record.encode(),
                Err(CoreError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn checksum_mismatch_is_malformed() {
        let line = edit(Action::Insert, 5, 0, 100).encode().unwrap();
        let tampered = line.trim_end().replacen(" 100|", " 101|", 1);
        assert!(matches!(
            LogRecord::decode(&tampered, 42),
            Err(CoreError::MalformedRecord { offset: 42, .. })
        ));
    }

    #[test]
    fn structural_errors_are_malformed() {
        let with_crc = |body: &str| format!("{body}|{:08x}", crc32fast::hash(body.as_bytes()));
        let txid = TransactionId::random();
        let cases = [
            "START".to_string(),
            format!("START {txid} extra"),
            format!("ABORT {txid}"),
            "TABLE heap accounts".to_string(),
            format!("EDIT {txid} accounts UPSERT 1 2 3"),
            format!("EDIT {txid} accounts INSERT one 2 3"),
            format!("EDIT {txid} accounts INSERT 1 2"),
            "COMMIT 1234".to_string(),
            format!("CHECKPOINT 2 {txid}"),
            format!("CHECKPOINT 2 {txid} {txid}"),
            "CHECKPOINT x".to_string(),
        ];
        for body in cases {
            let result = LogRecord::decode(&with_crc(&body), 0);
            assert!(
                matches!(result, Err(CoreError::MalformedRecord { .. })),
                "{body} decoded as {result:?}"
            );
        }
        assert!(LogRecord::decode("START no-checksum", 0).is_err());
        assert!(LogRecord::decode("START x|zz", 0).is_err());
    }

    #[test]
    fn checkpoint_count_at_usize_max_is_malformed() {
        let body = format!("CHECKPOINT {}", usize::MAX);
        let line = format!("{body}|{:08x}", crc32fast::hash(body.as_bytes()));
        assert!(matches!(
            LogRecord::decode(&line, 7),
            Err(CoreError::MalformedRecord { offset: 7, .. })
        ));
    }

    #[test]
    fn compensation_reverses_each_action() {
        let cases = [
            ((Action::Insert, 0, 100), (Action::Delete, 100, 0)),
            ((Action::Update, 100, 200), (Action::Update, 200, 100)),
            ((Action::Delete, 100, 0), (Action::Insert, 0, 100)),
        ];
        for ((action, old_value, new_value), expected) in cases {
            let record = edit(action, 5, old_value, new_value);
            let LogRecord::Edit { txid, table, key, .. } = record.clone() else {
                unreachable!();
            };
            assert_eq!(
                record.compensation(),
                Some(LogRecord::Edit {
                    txid,
                    table,
                    action: expected.0,
                    key,
                    old_value: expected.1,
                    new_value: expected.2,
                })
            );
        }

        assert!(LogRecord::Commit { txid: TransactionId::random() }
            .compensation()
            .is_none());
    }

    proptest! {
        #[test]
        fn any_edit_decodes_to_itself(
            key in any::<i64>(),
            old_value in any::<i64>(),
            new_value in any::<i64>(),
            table in "[a-z][a-z0-9_]{0,15}",
            action in prop_oneof![Just(Action::Insert), Just(Action::Update), Just(Action::Delete)],
        ) {
            let record = LogRecord::Edit {
                txid: TransactionId::random(),
                table,
                action,
                key,
                old_value,
                new_value,
            };
            prop_assert_eq!(roundtrip(&record), record);
        }
    }
}
