//! Backing store contract for fixed-size records.
//!
//! A [`RecordStore`] holds `size()` records of exactly `record_size()` bytes,
//! addressed by index `0..size()`. New records are only ever added at the
//! end and only the last record can be removed, so the index space stays
//! dense.
//!
//! Buffers passed to the store must be at least `record_size()` bytes long;
//! only the first `record_size()` bytes are read or written. Callers that
//! keep records inside a larger buffer pass the sub-slice starting at the
//! record's offset.

mod file;
mod memory;

pub use file::RecordFile;
pub use memory::MemoryRecordStore;

use crate::Result;
use std::path::Path;

/// Fixed-size record storage addressed by a dense index.
pub trait RecordStore {
    /// Bytes per record. Fixed for the lifetime of the store.
    fn record_size(&self) -> usize;

    /// Number of records currently stored.
    fn size(&self) -> Result<u64>;

    /// Read record `index` into `buf[..record_size]`.
    fn get(&mut self, index: u64, buf: &mut [u8]) -> Result<()>;

    /// Overwrite the existing record `index` in place with
    /// `record[..record_size]`.
    fn write(&mut self, index: u64, record: &[u8]) -> Result<()>;

    /// Add `record[..record_size]` as the new last record.
    fn append(&mut self, record: &[u8]) -> Result<()>;

    /// Remove the last record.
    fn truncate_last(&mut self) -> Result<()>;

    /// Remove the last record, copying its content into `buf[..record_size]`
    /// first.
    fn truncate_last_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let size = self.size()?;
        if size == 0 {
            return Err(crate::RecordStoreError::Empty);
        }
        self.get(size - 1, buf)?;
        self.truncate_last()
    }

    /// Location of the store.
    fn filename(&self) -> &Path;

    /// Remove the store's data once the handle is released.
    fn mark_for_deletion_on_exit(&mut self);

    /// Release the handle, persisting whatever the store keeps pending.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Panic unless a caller buffer can hold a whole record.
#[inline]
pub(crate) fn assert_record_len(len: usize, record_size: usize) {
    assert!(
        len >= record_size,
        "buffer of {len} bytes cannot hold a {record_size}-byte record"
    );
}
