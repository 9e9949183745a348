//! Write-ahead log.
//!
//! Every mutation is recorded here before it is applied to the store, and
//! every record is forced to stable storage before the call that produced it
//! returns. On startup the log is replayed to rebuild the store.
//!
//! ## Record Format
//!
//! One record per newline-terminated UTF-8 line, a space-separated body
//! followed by the CRC32 of the body in lowercase hex:
//!
//! ```text
//! START <txid>|<crc32>
//! TABLE <kind> <name>|<crc32>
//! EDIT <txid> <table> <INSERT|UPDATE|DELETE> <key> <old> <new>|<crc32>
//! COMMIT <txid>|<crc32>
//! CHECKPOINT <count> [<txid> ...]|<crc32>
//! ```
//!
//! ## Recovery Policy
//!
//! - **Torn tail**: trailing bytes with no newline are a crash mid-append.
//!   Scanning treats them as a clean end of log; opening the log for writing
//!   cuts them away.
//! - **Malformed line**: a complete line with a bad checksum, an unknown tag
//!   or an unparsable field is fatal. Once an append has been synced the log
//!   is trusted, so damage there is corruption, not a crash artefact.
//!
//! ## Invariants
//!
//! - The log is **append-only**; records are never rewritten in place
//! - File order is the single source of truth for event order
//! - Checkpoint transaction ids are written in sorted order

mod iterator;
mod record;
mod writer;

pub use iterator::LogRecordIterator;
pub use record::{LogRecord, CHECKSUM_SEPARATOR};
pub use writer::LogFile;

pub(crate) use record::validate_table_name;
