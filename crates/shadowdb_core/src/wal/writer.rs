//! The append-only log file.

use crate::error::CoreResult;
use crate::wal::iterator::LogRecordIterator;
use crate::wal::record::LogRecord;
use shadowdb_storage::LogBackend;

/// Chunk size used when searching backwards for the last complete line.
const TAIL_SCAN_CHUNK: u64 = 4 * 1024;

/// Appends log records and reads them back.
///
/// A `LogFile` is not internally synchronized; the recovery manager owns it
/// behind its write-path lock.
pub struct LogFile {
    backend: Box<dyn LogBackend>,
    sync_on_write: bool,
}

impl LogFile {
    /// Opens a log over `backend`, cutting away a torn final record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or truncated.
    pub fn open(mut backend: Box<dyn LogBackend>, sync_on_write: bool) -> CoreResult<Self> {
        let size = backend.size()?;
        let end = last_line_end(backend.as_ref(), size)?;
        if end < size {
            tracing::warn!(
                offset = end,
                bytes = size - end,
                "truncating torn record at end of log"
            );
            backend.truncate(end)?;
            backend.sync()?;
        }

        Ok(Self {
            backend,
            sync_on_write,
        })
    }

    /// Appends a record and, unless disabled, forces it to stable storage.
    ///
    /// Returns the offset the record was written at. If the append fails the
    /// log is cut back to its previous length so no partial line is left
    /// behind for the next append to run into.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the record cannot be encoded (nothing is
    /// written), or an I/O error from the backend.
    pub fn append(&mut self, record: &LogRecord) -> CoreResult<u64> {
        let line = record.encode()?;
        let start = self.backend.size()?;

        let result = self.write_line(line.as_bytes());
        if let Err(e) = result {
            if let Err(truncate_err) = self.backend.truncate(start) {
                tracing::warn!(
                    offset = start,
                    error = %truncate_err,
                    "could not cut back failed log append"
                );
            }
            return Err(e);
        }

        tracing::debug!(offset = start, tag = record.tag(), "appended log record");
        Ok(start)
    }

    fn write_line(&mut self, line: &[u8]) -> CoreResult<()> {
        self.backend.append(line)?;
        self.backend.flush()?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Returns the current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns a streaming iterator over all records in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<LogRecordIterator<'_>> {
        LogRecordIterator::new(self.backend.as_ref())
    }

    /// Reads every record in file order.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` for a complete line that fails to decode,
    /// or an I/O error.
    pub fn read_all(&self) -> CoreResult<Vec<(u64, LogRecord)>> {
        self.iter()?.collect()
    }
}

/// Returns the offset just past the last newline in the first `size` bytes.
fn last_line_end(backend: &dyn LogBackend, size: u64) -> CoreResult<u64> {
    let mut end = size;
    while end > 0 {
        let start = end.saturating_sub(TAIL_SCAN_CHUNK);
        let len = (end - start) as usize;
        let chunk = backend.read_at(start, len)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::{Action, TableKind, TransactionId};
    use shadowdb_storage::{FileBackend, MemoryBackend};
    use tempfile::tempdir;

    #[test]
    fn append_and_read_back() {
        let backend = MemoryBackend::new();
        let mut log = LogFile::open(Box::new(backend.clone()), true).unwrap();

        let txid = TransactionId::random();
        let records = vec![
            LogRecord::Table {
                kind: TableKind::BTree,
                name: "t".to_string(),
            },
            LogRecord::Start { txid },
            LogRecord::Edit {
                txid,
                table: "t".to_string(),
                action: Action::Insert,
                key: 1,
                old_value: 0,
                new_value: 10,
            },
            LogRecord::Commit { txid },
        ];
        let mut offsets = Vec::new();
        for record in &records {
            offsets.push(log.append(record).unwrap());
        }

        let read: Vec<_> = log.read_all().unwrap();
        assert_eq!(read.len(), 4);
        for ((offset, record), (expected_offset, expected)) in
            read.iter().zip(offsets.iter().zip(&records))
        {
            assert_eq!(offset, expected_offset);
            assert_eq!(record, expected);
        }
        assert_eq!(log.size().unwrap(), backend.data().len() as u64);
    }

    #[test]
    fn invalid_record_writes_nothing() {
        let mut log = LogFile::open(Box::new(MemoryBackend::new()), true).unwrap();
        let result = log.append(&LogRecord::Table {
            kind: TableKind::Hash,
            name: "bad name".to_string(),
        });
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn open_truncates_torn_tail() {
        let txid = TransactionId::random();
        let good = LogRecord::Start { txid }.encode().unwrap();
        let torn = LogRecord::Commit { txid }.encode().unwrap();
        let mut bytes = good.clone().into_bytes();
        bytes.extend_from_slice(&torn.as_bytes()[..torn.len() - 3]);
        let backend = MemoryBackend::with_data(bytes);

        let mut log = LogFile::open(Box::new(backend.clone()), true).unwrap();
        assert_eq!(log.size().unwrap(), good.len() as u64);

        log.append(&LogRecord::Commit { txid }).unwrap();
        let records: Vec<_> = log
            .read_all()
            .unwrap()
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        assert_eq!(
            records,
            vec![LogRecord::Start { txid }, LogRecord::Commit { txid }]
        );
    }

    #[test]
    fn open_truncates_log_with_no_complete_line() {
        let backend = MemoryBackend::with_data(b"START half".to_vec());
        let log = LogFile::open(Box::new(backend), true).unwrap();
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn last_line_end_searches_across_chunks() {
        let mut bytes = b"x\n".to_vec();
        bytes.extend(std::iter::repeat(b'y').take(3 * TAIL_SCAN_CHUNK as usize));
        let backend = MemoryBackend::with_data(bytes);
        let size = backend.size().unwrap();
        assert_eq!(last_line_end(&backend, size).unwrap(), 2);
    }

    #[test]
    fn records_survive_reopen_on_disk() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("wal.log");
        let txid = TransactionId::random();

        {
            let backend = FileBackend::open(&path).unwrap();
            let mut log = LogFile::open(Box::new(backend), true).unwrap();
            log.append(&LogRecord::Start { txid }).unwrap();
            log.append(&LogRecord::Commit { txid }).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        let log = LogFile::open(Box::new(backend), true).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 2);
    }
}
