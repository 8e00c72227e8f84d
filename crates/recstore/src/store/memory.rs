//! In-memory record store

use super::{RecordStore, assert_record_len};
use crate::{RecordStoreError, Result};
use std::path::{Path, PathBuf};

/// Record store kept entirely in memory.
///
/// Records are laid out back to back in a single byte vector. The name
/// given at construction is reported as the store's filename.
#[derive(Debug, Clone)]
pub struct MemoryRecordStore {
    name: PathBuf,
    record_size: usize,
    data: Vec<u8>,
    delete_on_exit: bool,
}

impl MemoryRecordStore {
    /// Create an empty store for records of `record_size` bytes.
    pub fn new<P: AsRef<Path>>(name: P, record_size: usize) -> Self {
        assert!(record_size > 0, "record size must be greater than 0");
        Self {
            name: name.as_ref().to_path_buf(),
            record_size,
            data: Vec::new(),
            delete_on_exit: false,
        }
    }

    /// Create a store pre-filled with `records`.
    pub fn with_records<P, I, R>(name: P, record_size: usize, records: I) -> Self
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let mut store = Self::new(name, record_size);
        for record in records {
            let record = record.as_ref();
            assert_record_len(record.len(), record_size);
            store.data.extend_from_slice(&record[..record_size]);
        }
        store
    }

    /// Borrow record `index`, if present.
    pub fn record(&self, index: u64) -> Option<&[u8]> {
        let start = usize::try_from(index).ok()?.checked_mul(self.record_size)?;
        self.data.get(start..start.checked_add(self.record_size)?)
    }

    /// Iterate over all records in index order.
    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.record_size)
    }

    /// Number of records.
    pub fn len(&self) -> u64 {
        (self.data.len() / self.record_size) as u64
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the store was marked for deletion.
    pub const fn is_marked_for_deletion(&self) -> bool {
        self.delete_on_exit
    }

    fn range(&self, index: u64) -> Result<std::ops::Range<usize>> {
        let size = self.len();
        if index >= size {
            return Err(RecordStoreError::OutOfBounds { index, size });
        }
        let start = index as usize * self.record_size;
        Ok(start..start + self.record_size)
    }
}

impl RecordStore for MemoryRecordStore {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len())
    }

    fn get(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        assert_record_len(buf.len(), self.record_size);
        let range = self.range(index)?;
        buf[..self.record_size].copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, index: u64, record: &[u8]) -> Result<()> {
        assert_record_len(record.len(), self.record_size);
        let range = self.range(index)?;
        self.data[range].copy_from_slice(&record[..self.record_size]);
        Ok(())
    }

    fn append(&mut self, record: &[u8]) -> Result<()> {
        assert_record_len(record.len(), self.record_size);
        self.data.extend_from_slice(&record[..self.record_size]);
        Ok(())
    }

    fn truncate_last(&mut self) -> Result<()> {
        if self.is_empty() {
            return Err(RecordStoreError::Empty);
        }
        self.data.truncate(self.data.len() - self.record_size);
        Ok(())
    }

    fn filename(&self) -> &Path {
        &self.name
    }

    fn mark_for_deletion_on_exit(&mut self) {
        self.delete_on_exit = true;
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}
