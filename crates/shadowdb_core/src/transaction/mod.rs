//! Transaction lifecycle tracking.
//!
//! The recovery manager drives transactions open and closed while it replays
//! the log; the [`TransactionManager`] is the reference tracker that records
//! which ones are active.

mod manager;

pub use manager::TransactionManager;
