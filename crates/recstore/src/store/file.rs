//! File-backed record store.
//!
//! Records are stored back to back without a header, so record `i` lives at
//! byte offset `i * record_size` and the record count is derived from the
//! file length:
//!
//! ```text
//! +----------+----------+-----+------------+
//! | record_0 | record_1 | ... | record_n-1 |
//! +----------+----------+-----+------------+
//! ```
//!
//! A file whose length is not a multiple of the record size ends in a torn
//! append; the partial record is cut off when the file is opened.

use super::{RecordStore, assert_record_len};
use crate::{RecordFileConfig, RecordStoreError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Record store persisted in a single file.
#[derive(Debug)]
pub struct RecordFile {
    file: File,
    path: PathBuf,
    record_size: usize,
    /// Record count, kept in step with the file length
    len: u64,
    delete_on_exit: bool,
}

impl RecordFile {
    /// Open (or create) the record file described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the file cannot be
    /// opened or repaired
    pub fn open(config: &RecordFileConfig) -> Result<Self> {
        config.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(config.truncate)
            .open(&config.path)?;

        let record_size = config.record_size as u64;
        let file_len = file.metadata()?.len();
        let torn = file_len % record_size;
        if torn != 0 {
            warn!(
                "Record file {} ends with a partial record ({} of {} bytes), truncating",
                config.path.display(),
                torn,
                record_size
            );
            file.set_len(file_len - torn)?;
        }

        let len = file_len / record_size;
        info!(
            "Opened record file {} with {} records of {} bytes",
            config.path.display(),
            len,
            record_size
        );

        Ok(Self {
            file,
            path: config.path.clone(),
            record_size: config.record_size,
            len,
            delete_on_exit: false,
        })
    }

    /// Create an empty record file at `path`, discarding any existing
    /// content
    pub fn create<P: AsRef<Path>>(path: P, record_size: usize) -> Result<Self> {
        Self::open(&RecordFileConfig::new(path, record_size).with_truncate(true))
    }

    /// Flush file data to the storage device
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    const fn offset(&self, index: u64) -> u64 {
        index * self.record_size as u64
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.len {
            return Err(RecordStoreError::OutOfBounds {
                index,
                size: self.len,
            });
        }
        Ok(())
    }
}

impl RecordStore for RecordFile {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn get(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        assert_record_len(buf.len(), self.record_size);
        self.check_index(index)?;

        self.file.seek(SeekFrom::Start(self.offset(index)))?;
        self.file.read_exact(&mut buf[..self.record_size])?;
        Ok(())
    }

    fn write(&mut self, index: u64, record: &[u8]) -> Result<()> {
        assert_record_len(record.len(), self.record_size);
        self.check_index(index)?;

        self.file.seek(SeekFrom::Start(self.offset(index)))?;
        self.file.write_all(&record[..self.record_size])?;
        Ok(())
    }

    fn append(&mut self, record: &[u8]) -> Result<()> {
        assert_record_len(record.len(), self.record_size);

        self.file.seek(SeekFrom::Start(self.offset(self.len)))?;
        self.file.write_all(&record[..self.record_size])?;
        self.len += 1;
        Ok(())
    }

    fn truncate_last(&mut self) -> Result<()> {
        if self.len == 0 {
            return Err(RecordStoreError::Empty);
        }

        self.file.set_len(self.offset(self.len - 1))?;
        self.len -= 1;
        Ok(())
    }

    fn filename(&self) -> &Path {
        &self.path
    }

    fn mark_for_deletion_on_exit(&mut self) {
        self.delete_on_exit = true;
    }

    fn close(self) -> Result<()> {
        if !self.delete_on_exit {
            self.sync()?;
        }
        debug!("Closed record file {}", self.path.display());
        Ok(())
    }
}

impl Drop for RecordFile {
    fn drop(&mut self) {
        if self.delete_on_exit {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("Deleted record file {}", self.path.display()),
                Err(e) => warn!("Failed to delete record file {}: {e}", self.path.display()),
            }
        }
    }
}
