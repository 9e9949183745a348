//! # shadowdb core
//!
//! Write-ahead logging and crash recovery for a transactional table store.
//!
//! This crate provides:
//! - The log record model and its line-oriented, checksummed encoding
//! - The append-only log store with per-record durability barriers
//! - The recovery manager: logging API, checkpoints with a shadow copy of the
//!   store directory, three-phase crash recovery and live rollback
//! - Startup priming that picks the live or shadow directory after a crash
//! - Reference collaborators (a directory-backed table store and a
//!   transaction manager) and the [`Database`] facade that wires them together

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod dir;
mod engine;
mod error;
mod types;

pub mod recovery;
pub mod store;
pub mod transaction;
pub mod wal;

pub use config::Config;
pub use database::Database;
pub use dir::DatabaseDir;
pub use engine::{StorageEngine, TransactionTracker};
pub use error::{CoreError, CoreResult};
pub use recovery::{prime, PrimeOutcome, RecoveryManager, RecoveryReport, ShadowCopy};
pub use store::TableStore;
pub use transaction::TransactionManager;
pub use types::{Action, TableKind, TransactionId};
pub use wal::{LogFile, LogRecord};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
