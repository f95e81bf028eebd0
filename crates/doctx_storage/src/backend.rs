//! The backend trait.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Implementations must uphold:
///
/// - `append` returns the offset at which the appended bytes begin
/// - `read_at` returns exactly the bytes previously appended at that range
/// - after `sync` returns, every appended byte survives a power loss
///
/// Backends are shared between threads behind a lock owned by the journal,
/// so they must be `Send + Sync`.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::ReadPastEnd`] if the range is not fully inside
    /// the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` at the tail and returns its starting offset.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered data to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to stable media.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size in bytes; the offset of the next append.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size`.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::TruncateBeyondEnd`] if `new_size` is larger
    /// than the store.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
