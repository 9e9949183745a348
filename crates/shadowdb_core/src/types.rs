//! Core type definitions for shadowdb.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a transaction (one per client session).
///
/// Identifiers are random UUIDs and are never reused, so a closed transaction
/// can never be mistaken for an active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TransactionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::invalid_argument(format!("invalid transaction id {s:?}: {e}")))
    }
}

/// Index structure backing a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Ordered B+tree index.
    BTree,
    /// Hash index.
    Hash,
}

impl TableKind {
    /// Returns the log spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::Hash => "hash",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btree" => Ok(Self::BTree),
            "hash" => Ok(Self::Hash),
            other => Err(CoreError::invalid_argument(format!(
                "unknown table kind {other:?}"
            ))),
        }
    }
}

/// Kind of single-key mutation carried by an edit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// A new key was inserted; only the new value is meaningful.
    Insert,
    /// An existing key changed from the old value to the new value.
    Update,
    /// A key was removed; only the old value is meaningful.
    Delete,
}

impl Action {
    /// Returns the log spelling of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(CoreError::invalid_argument(format!(
                "unknown edit action {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_text_roundtrip() {
        let id = TransactionId::random();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn transaction_ids_are_unique() {
        assert_ne!(TransactionId::random(), TransactionId::random());
    }

    #[test]
    fn bad_transaction_id_rejected() {
        assert!("not-a-uuid".parse::<TransactionId>().is_err());
    }

    #[test]
    fn table_kind_spelling() {
        assert_eq!(TableKind::BTree.to_string(), "btree");
        assert_eq!("hash".parse::<TableKind>().unwrap(), TableKind::Hash);
        assert!("heap".parse::<TableKind>().is_err());
    }

    #[test]
    fn action_spelling() {
        for action in [Action::Insert, Action::Update, Action::Delete] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("insert".parse::<Action>().is_err());
    }
}
