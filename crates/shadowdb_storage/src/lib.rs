//! # shadowdb storage
//!
//! The byte device underneath the shadowdb write-ahead log.
//!
//! A [`LogBackend`] is an **opaque, append-only byte store**. It knows nothing
//! about log records, checksums or transactions; `shadowdb_core` owns the
//! record format and decides when an append must be forced to stable storage.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - the log file on disk
//! - [`MemoryBackend`] - shared in-memory bytes, for tests and crash simulation
//!
//! ## Example
//!
//! ```rust
//! use shadowdb_storage::{LogBackend, MemoryBackend};
//!
//! let mut log = MemoryBackend::new();
//! let offset = log.append(b"START a\n").unwrap();
//! log.sync().unwrap();
//! assert_eq!(log.read_at(offset, 8).unwrap(), b"START a\n");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::LogBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
