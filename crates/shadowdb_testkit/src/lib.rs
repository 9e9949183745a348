//! # shadowdb Testkit
//!
//! Test utilities for shadowdb.
//!
//! This crate provides:
//! - Test fixtures that open, crash and reopen databases
//! - A log device that tears or fails writes on demand
//! - Property-based operation generators using proptest
//! - A reference model that predicts the state recovery must produce
//! - A crash recovery harness with canned scenarios
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shadowdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     let mut db = TestDatabase::new();
//!     db.create_table(TableKind::BTree, "t").unwrap();
//!     db.crash();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use shadowdb_core::{Config, Database, TableKind, TransactionId};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use model::*;
