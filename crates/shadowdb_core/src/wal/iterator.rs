//! Streaming log record iterator.
//!
//! Reads the log in fixed-size chunks and yields one decoded record per
//! complete line, so scanning a large log never loads it whole.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::LogRecord;
use shadowdb_storage::LogBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A streaming iterator over log records.
///
/// Yields `(offset, record)` pairs in file order.
///
/// # Error Handling
///
/// - A complete line that fails to decode yields `MalformedRecord` and ends
///   the iteration
/// - Trailing bytes without a terminating newline are a torn append and are
///   treated as the end of the log; [`torn_tail`](Self::torn_tail) reports
///   where they start
pub struct LogRecordIterator<'a> {
    backend: &'a dyn LogBackend,
    total_size: u64,
    /// Log offset of `buffer[buffer_pos]`.
    offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    torn_tail: Option<u64>,
    finished: bool,
}

impl<'a> LogRecordIterator<'a> {
    /// Creates an iterator over the whole log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log size cannot be read.
    pub fn new(backend: &'a dyn LogBackend) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: 0,
            buffer: Vec::new(),
            buffer_pos: 0,
            torn_tail: None,
            finished: false,
        })
    }

    /// Returns the offset of a torn final record, once iteration has
    /// reached it.
    #[must_use]
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_tail
    }

    fn refill(&mut self) -> CoreResult<bool> {
        self.buffer.drain(..self.buffer_pos);
        self.buffer_pos = 0;

        let read_pos = self.offset + self.buffer.len() as u64;
        if read_pos >= self.total_size {
            return Ok(false);
        }
        let remaining = self.total_size - read_pos;
        let len = usize::try_from(remaining).map_or(READ_BUFFER_SIZE, |r| r.min(READ_BUFFER_SIZE));
        let chunk = self.backend.read_at(read_pos, len)?;
        self.buffer.extend_from_slice(&chunk);
        Ok(true)
    }

    fn next_record(&mut self) -> CoreResult<Option<(u64, LogRecord)>> {
        loop {
            let pending = &self.buffer[self.buffer_pos..];
            if let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                let line_offset = self.offset;
                let line = std::str::from_utf8(&pending[..newline]).map_err(|_| {
                    CoreError::malformed_record(line_offset, "record is not valid UTF-8")
                })?;
                let record = LogRecord::decode(line, line_offset)?;

                self.buffer_pos += newline + 1;
                self.offset += newline as u64 + 1;
                return Ok(Some((line_offset, record)));
            }

            if !self.refill()? {
                if !self.buffer.is_empty() {
                    tracing::warn!(
                        offset = self.offset,
                        bytes = self.buffer.len(),
                        "ignoring torn record at end of log"
                    );
                    self.torn_tail = Some(self.offset);
                }
                return Ok(None);
            }
        }
    }
}

impl Iterator for LogRecordIterator<'_> {
    type Item = CoreResult<(u64, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
