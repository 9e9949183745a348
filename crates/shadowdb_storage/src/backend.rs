//! Log device trait definition.

use crate::error::StorageResult;

/// An append-only byte device holding the write-ahead log.
///
/// # Invariants
///
/// - `append` writes at the current end and returns that offset
/// - bytes are never rewritten in place; only `truncate` may shorten the device
/// - after `sync` returns, every previously appended byte survives a crash
/// - implementations must be `Send + Sync`; callers serialize writers
pub trait LogBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` at the end of the device and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces all appended data and metadata to stable storage.
    ///
    /// This is the durability barrier used by every log append.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Shortens the device to `new_size` bytes.
    ///
    /// Used only to cut away a torn final record left by a crash mid-append.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidTruncate`] if `new_size` exceeds
    /// the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole device.
    ///
    /// # Errors
    ///
    /// Returns an error if the size or contents cannot be read.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("log of {size} bytes does not fit in memory"),
            )
        })?;
        self.read_at(0, len)
    }
}
