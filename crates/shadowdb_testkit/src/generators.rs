//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random workloads: table names that
//! the log accepts, and operation sequences spread over a few concurrent
//! transaction slots.

use proptest::prelude::*;
use shadowdb_core::{Action, TableKind, TransactionId};
use uuid::Uuid;

/// One step of a generated workload.
///
/// `slot` picks one of a few concurrent transactions; a slot with no open
/// transaction begins one on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Insert `key` with `value`.
    Insert {
        /// Transaction slot.
        slot: usize,
        /// Key.
        key: i64,
        /// Value.
        value: i64,
    },
    /// Replace the value of `key`.
    Update {
        /// Transaction slot.
        slot: usize,
        /// Key.
        key: i64,
        /// Value.
        value: i64,
    },
    /// Remove `key`.
    Delete {
        /// Transaction slot.
        slot: usize,
        /// Key.
        key: i64,
    },
    /// Commit the slot's transaction.
    Commit {
        /// Transaction slot.
        slot: usize,
    },
    /// Roll back the slot's transaction.
    Rollback {
        /// Transaction slot.
        slot: usize,
    },
    /// Take a checkpoint.
    Checkpoint,
    /// Drop the database without closing it and reopen it.
    Crash,
}

/// Strategy for generating transaction IDs.
pub fn transaction_id_strategy() -> impl Strategy<Value = TransactionId> {
    any::<u128>().prop_map(|bits| TransactionId::from_uuid(Uuid::from_u128(bits)))
}

/// Strategy for generating table names the log accepts.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_.-]{0,31}").expect("Invalid regex")
}

/// Strategy for generating table kinds.
pub fn table_kind_strategy() -> impl Strategy<Value = TableKind> {
    prop_oneof![Just(TableKind::BTree), Just(TableKind::Hash)]
}

/// Strategy for generating edit actions.
pub fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Insert),
        Just(Action::Update),
        Just(Action::Delete)
    ]
}

/// Strategy for generating one workload step.
///
/// Keys are drawn from `0..keys` so edits collide often enough to exercise
/// duplicate and missing-key paths.
pub fn op_strategy(slots: usize, keys: i64) -> impl Strategy<Value = Op> {
    let slot = 0..slots.max(1);
    let key = 0..keys.max(1);
    let value = -1000i64..1000;
    prop_oneof![
        4 => (slot.clone(), key.clone(), value.clone())
            .prop_map(|(slot, key, value)| Op::Insert { slot, key, value }),
        3 => (slot.clone(), key.clone(), value)
            .prop_map(|(slot, key, value)| Op::Update { slot, key, value }),
        2 => (slot.clone(), key).prop_map(|(slot, key)| Op::Delete { slot, key }),
        2 => slot.clone().prop_map(|slot| Op::Commit { slot }),
        1 => slot.prop_map(|slot| Op::Rollback { slot }),
        1 => Just(Op::Checkpoint),
        1 => Just(Op::Crash),
    ]
}

/// Strategy for generating a workload of up to `max_len` steps.
pub fn workload_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(3, 8), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowdb_core::LogRecord;

    proptest! {
        #[test]
        fn generated_table_names_encode(name in table_name_strategy(), kind in table_kind_strategy()) {
            let record = LogRecord::Table { kind, name };
            prop_assert!(record.encode().is_ok());
        }

        #[test]
        fn generated_ops_stay_in_range(ops in workload_strategy(32)) {
            for op in ops {
                match op {
                    Op::Insert { slot, key, .. }
                    | Op::Update { slot, key, .. }
                    | Op::Delete { slot, key } => {
                        prop_assert!(slot < 3);
                        prop_assert!((0..8).contains(&key));
                    }
                    Op::Commit { slot } | Op::Rollback { slot } => prop_assert!(slot < 3),
                    Op::Checkpoint | Op::Crash => {}
                }
            }
        }

        #[test]
        fn generated_edits_have_compensations(
            txid in transaction_id_strategy(),
            action in action_strategy(),
            key in any::<i64>(),
        ) {
            let record = LogRecord::Edit {
                txid,
                table: "t".to_string(),
                action,
                key,
                old_value: 1,
                new_value: 2,
            };
            prop_assert!(record.compensation().is_some());
        }
    }
}
