//! In-memory log device.

use crate::backend::LogBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A log device whose bytes live in memory.
///
/// Clones share the same buffer, so a test can hand one clone to a recovery
/// manager, drop that manager to simulate a crash, and reopen the "same" log
/// from another clone.
///
/// # Example
///
/// ```rust
/// use shadowdb_storage::{LogBackend, MemoryBackend};
///
/// let mut log = MemoryBackend::new();
/// let survivor = log.clone();
/// log.append(b"COMMIT x\n").unwrap();
/// drop(log);
/// assert_eq!(survivor.size().unwrap(), 9);
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device pre-filled with `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the current contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl LogBackend for MemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        // Bounded by `size`, which is a usize.
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
