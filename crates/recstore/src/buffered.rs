//! Write-coalescing buffer in front of a [`RecordStore`].
//!
//! Overwrites of records that already exist are held in an ordered
//! in-memory buffer and written back in ascending index order when the
//! buffer grows past its threshold, on [`BufferedRecordStore::flush`], or at
//! close. Writes that extend the store (index equal to the current size) go
//! straight to the backing store, which is expected to handle trailing
//! writes efficiently on its own.
//!
//! Buffered entries always refer to existing indices, so they never change
//! the record count: `size()` is always the backing store's size.
//!
//! Every operation runs under one lock and completes before the next one
//! starts. Record bytes are copied in and out; callers never hold a reference
//! into the buffer.
//!
//! A store must be closed with [`BufferedRecordStore::close`] (or unwrapped
//! with [`BufferedRecordStore::into_inner`]). Dropping an open store logs a
//! warning and closes it as a last resort.
//!
//! A flush during normal operation stops at the first failed write and keeps
//! the rest buffered for a retry. The flush at close has no later retry, so
//! it writes every entry it can and only gives up on the ones that failed.

use crate::store::{RecordStore, assert_record_len};
use crate::{BufferConfig, BufferStats, RecordStoreError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Record store decorator that coalesces overwrites of existing records.
pub struct BufferedRecordStore<S: RecordStore> {
    inner: Mutex<Inner<S>>,
    record_size: usize,
    max_entries: usize,
}

struct Inner<S> {
    /// Backing store, `None` once closed
    store: Option<S>,
    /// Pending overwrites keyed by record index
    buffer: BTreeMap<u64, Box<[u8]>>,
    stats: BufferStats,
}

/// Outcome of closing a [`BufferedRecordStore`].
///
/// Closing never fails outright: the backing store is released even when
/// writing back the buffer fails. Failures are reported here instead.
#[derive(Debug, Default)]
#[must_use = "a close report carries flush and close failures"]
pub struct CloseReport {
    /// The store was already closed; nothing was done
    pub already_closed: bool,
    /// Buffered records written back before the backing store was closed
    pub flushed: usize,
    /// Buffered records discarded because their own write-back failed
    pub unflushed: usize,
    /// First write-back failure
    pub flush_error: Option<RecordStoreError>,
    /// Failure reported by the backing store's own close
    pub close_error: Option<RecordStoreError>,
}

impl CloseReport {
    const fn already_closed() -> Self {
        Self {
            already_closed: true,
            flushed: 0,
            unflushed: 0,
            flush_error: None,
            close_error: None,
        }
    }

    /// Whether every buffered write reached the backing store and the
    /// backing store closed cleanly
    pub const fn is_clean(&self) -> bool {
        self.flush_error.is_none() && self.close_error.is_none()
    }

    /// Convert into a `Result`, yielding the number of records written back
    ///
    /// The flush failure takes precedence over the close failure.
    pub fn into_result(self) -> Result<usize> {
        if let Some(err) = self.flush_error {
            return Err(err);
        }
        if let Some(err) = self.close_error {
            return Err(err);
        }
        Ok(self.flushed)
    }
}

impl<S: RecordStore> Inner<S> {
    fn store(&mut self) -> Result<&mut S> {
        self.store.as_mut().ok_or(RecordStoreError::Closed)
    }

    /// Write every buffered record back in ascending index order.
    ///
    /// An entry leaves the buffer only once its write succeeded; on failure
    /// the failed entry and all later ones stay buffered.
    fn flush_buffer(&mut self) -> Result<usize> {
        let store = self.store.as_mut().ok_or(RecordStoreError::Closed)?;

        let mut written = 0usize;
        let mut outcome = Ok(());
        while let Some(entry) = self.buffer.first_entry() {
            match store.write(*entry.key(), entry.get()) {
                Ok(()) => {
                    entry.remove();
                    written += 1;
                }
                Err(err) => {
                    warn!(
                        "Flush of {} stopped at record {}: {err}",
                        store.filename().display(),
                        entry.key()
                    );
                    outcome = Err(err);
                    break;
                }
            }
        }

        record_flush(&mut self.stats, written, store.filename());
        outcome.map(|()| written)
    }

    fn close(&mut self) -> CloseReport {
        let Some(store) = self.store.as_mut() else {
            return CloseReport::already_closed();
        };

        // Nothing is retried after close, so a failed entry does not hold
        // back the ones after it.
        let mut flushed = 0usize;
        let mut unflushed = 0usize;
        let mut flush_error = None;
        for (index, record) in std::mem::take(&mut self.buffer) {
            match store.write(index, &record) {
                Ok(()) => flushed += 1,
                Err(err) => {
                    warn!(
                        "Write-back of record {index} to {} failed at close: {err}",
                        store.filename().display()
                    );
                    unflushed += 1;
                    flush_error.get_or_insert(err);
                }
            }
        }
        record_flush(&mut self.stats, flushed, store.filename());

        let close_error = self.store.take().and_then(|store| {
            let name = store.filename().display().to_string();
            let result = store.close();
            debug!("Closed buffered record store {name}");
            result.err()
        });

        if unflushed > 0 {
            warn!("Discarded {unflushed} buffered records that could not be written back");
        }

        CloseReport {
            already_closed: false,
            flushed,
            unflushed,
            flush_error,
            close_error,
        }
    }
}

fn record_flush(stats: &mut BufferStats, written: usize, filename: &Path) {
    if written > 0 {
        stats.flushes += 1;
        stats.flushed_records += written as u64;
        debug!(
            "Flushed {} buffered records to {}",
            written,
            filename.display()
        );
    }
}

/// Error returned by [`BufferedRecordStore::into_inner`], carrying the
/// still-open store so no buffered write is lost.
#[derive(Error)]
#[error("failed to unwrap buffered record store: {error}")]
pub struct IntoInnerError<S: RecordStore> {
    store: BufferedRecordStore<S>,
    #[source]
    error: RecordStoreError,
}

impl<S: RecordStore> IntoInnerError<S> {
    /// Failure that prevented unwrapping
    pub const fn error(&self) -> &RecordStoreError {
        &self.error
    }

    /// The buffered store, with its pending writes intact
    pub fn into_store(self) -> BufferedRecordStore<S> {
        self.store
    }

    /// Split into the failure and the buffered store
    pub fn into_parts(self) -> (RecordStoreError, BufferedRecordStore<S>) {
        (self.error, self.store)
    }
}

impl<S: RecordStore> std::fmt::Debug for IntoInnerError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntoInnerError")
            .field("store", &self.store)
            .field("error", &self.error)
            .finish()
    }
}

impl<S: RecordStore> BufferedRecordStore<S> {
    /// Wrap `store` with an overwrite buffer configured by `config`
    pub fn new(store: S, config: BufferConfig) -> Self {
        Self {
            record_size: store.record_size(),
            max_entries: config.max_entries,
            inner: Mutex::new(Inner {
                store: Some(store),
                buffer: BTreeMap::new(),
                stats: BufferStats::default(),
            }),
        }
    }

    /// Wrap `store` with a buffer holding up to `max_entries` overwrites
    pub fn with_max_entries(store: S, max_entries: usize) -> Self {
        Self::new(store, BufferConfig::new().with_max_entries(max_entries))
    }

    /// Bytes per record
    pub const fn record_size(&self) -> usize {
        self.record_size
    }

    /// Buffer threshold
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of records, or 0 once closed
    pub fn size(&self) -> Result<u64> {
        let inner = self.inner.lock();
        inner.store.as_ref().map_or(Ok(0), RecordStore::size)
    }

    /// Read record `index` into `buf[..record_size]`
    ///
    /// A pending buffered value takes precedence over the backing store.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than one record.
    pub fn get(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        assert_record_len(buf.len(), self.record_size);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let store = inner.store.as_mut().ok_or(RecordStoreError::Closed)?;

        let size = store.size()?;
        if index >= size {
            return Err(RecordStoreError::OutOfBounds { index, size });
        }

        if let Some(record) = inner.buffer.get(&index) {
            buf[..self.record_size].copy_from_slice(record);
            inner.stats.buffer_hits += 1;
            return Ok(());
        }

        inner.stats.buffer_misses += 1;
        store.get(index, buf)
    }

    /// Write `record[..record_size]` at `index`
    ///
    /// `index == size()` appends straight to the backing store. Smaller
    /// indices are buffered, replacing any pending value for the same index;
    /// if the buffer then holds more than `max_entries` records it is flushed
    /// before returning.
    ///
    /// # Panics
    ///
    /// Panics if `record` is shorter than one record.
    pub fn put(&self, index: u64, record: &[u8]) -> Result<()> {
        assert_record_len(record.len(), self.record_size);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let store = inner.store.as_mut().ok_or(RecordStoreError::Closed)?;

        let size = store.size()?;
        if index > size {
            return Err(RecordStoreError::OutOfBounds { index, size });
        }

        if index == size {
            store.append(&record[..self.record_size])?;
            inner.stats.appends += 1;
            trace!("put at {index} appended to {}", store.filename().display());
            return Ok(());
        }

        let copy: Box<[u8]> = record[..self.record_size].into();
        if inner.buffer.insert(index, copy).is_some() {
            inner.stats.coalesced_writes += 1;
        }
        inner.stats.buffered_writes += 1;
        trace!("put at {index} buffered ({} pending)", inner.buffer.len());

        if inner.buffer.len() > self.max_entries {
            inner.flush_buffer()?;
        }
        Ok(())
    }

    /// Append `record[..record_size]` as the new last record, bypassing the
    /// buffer
    ///
    /// # Panics
    ///
    /// Panics if `record` is shorter than one record.
    pub fn add(&self, record: &[u8]) -> Result<()> {
        assert_record_len(record.len(), self.record_size);

        let mut inner = self.inner.lock();
        inner.store()?.append(&record[..self.record_size])?;
        inner.stats.appends += 1;
        Ok(())
    }

    /// Remove the last record, copying its content into `buf[..record_size]`
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than one record.
    pub fn truncate_last_into(&self, buf: &mut [u8]) -> Result<()> {
        assert_record_len(buf.len(), self.record_size);
        self.truncate(Some(buf))
    }

    /// Remove the last record
    pub fn truncate_last(&self) -> Result<()> {
        self.truncate(None)
    }

    fn truncate(&self, out: Option<&mut [u8]>) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let store = inner.store.as_mut().ok_or(RecordStoreError::Closed)?;

        let size = store.size()?;
        if size == 0 {
            return Err(RecordStoreError::Empty);
        }
        let last = size - 1;

        // A pending value is the authoritative content; the backing store only
        // has to shrink.
        match inner.buffer.remove(&last) {
            Some(record) => {
                if let Err(err) = store.truncate_last() {
                    inner.buffer.insert(last, record);
                    return Err(err);
                }
                if let Some(buf) = out {
                    buf[..self.record_size].copy_from_slice(&record);
                }
            }
            None => match out {
                Some(buf) => store.truncate_last_into(buf)?,
                None => store.truncate_last()?,
            },
        }

        inner.stats.truncations += 1;
        Ok(())
    }

    /// Write all buffered records back in ascending index order
    ///
    /// Returns the number of records written.
    pub fn flush(&self) -> Result<usize> {
        self.inner.lock().flush_buffer()
    }

    /// Number of overwrites waiting in the buffer
    pub fn buffered_len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Whether the store has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().store.is_none()
    }

    /// Snapshot of the store's counters
    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            buffered: inner.buffer.len(),
            ..inner.stats
        }
    }

    /// Location of the backing store
    pub fn filename(&self) -> Result<PathBuf> {
        let inner = self.inner.lock();
        inner
            .store
            .as_ref()
            .map(|store| store.filename().to_path_buf())
            .ok_or(RecordStoreError::Closed)
    }

    /// Have the backing store removed once it is released
    pub fn mark_for_deletion_on_exit(&self) -> Result<()> {
        self.inner.lock().store()?.mark_for_deletion_on_exit();
        Ok(())
    }

    /// Flush the buffer and close the backing store
    ///
    /// Calling `close` on a closed store does nothing and reports
    /// `already_closed`.
    pub fn close(&self) -> CloseReport {
        self.inner.lock().close()
    }

    /// Flush the buffer and return the backing store without closing it
    ///
    /// # Errors
    ///
    /// Returns the flush error if write-back fails, or
    /// [`RecordStoreError::Closed`] if the store was already closed. The
    /// error hands the buffered store back untouched apart from the entries
    /// that were written, so the caller can retry or close it.
    pub fn into_inner(mut self) -> std::result::Result<S, IntoInnerError<S>> {
        if let Err(error) = self.inner.get_mut().flush_buffer() {
            return Err(IntoInnerError { store: self, error });
        }
        match self.inner.get_mut().store.take() {
            Some(store) => Ok(store),
            None => Err(IntoInnerError {
                store: self,
                error: RecordStoreError::Closed,
            }),
        }
    }
}

impl<S: RecordStore> Drop for BufferedRecordStore<S> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let Some(store) = inner.store.as_ref() else {
            return;
        };

        warn!(
            "Buffered record store {} dropped without close ({} pending writes)",
            store.filename().display(),
            inner.buffer.len()
        );
        let report = inner.close();
        if let Some(err) = &report.flush_error {
            error!(
                "Write-back of dropped record store failed ({} records lost): {err}",
                report.unflushed
            );
        }
        if let Some(err) = &report.close_error {
            error!("Closing dropped record store failed: {err}");
        }
    }
}

impl<S: RecordStore> std::fmt::Debug for BufferedRecordStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BufferedRecordStore")
            .field("record_size", &self.record_size)
            .field("max_entries", &self.max_entries)
            .field("buffered", &inner.buffer.len())
            .field("closed", &inner.store.is_none())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::MemoryRecordStore;

    fn letters(records: &[u8]) -> MemoryRecordStore {
        MemoryRecordStore::with_records("letters", 1, records.chunks(1))
    }

    fn read(store: &BufferedRecordStore<MemoryRecordStore>, index: u64) -> u8 {
        let mut buf = [0u8; 1];
        store.get(index, &mut buf).unwrap();
        buf[0]
    }

    #[test]
    fn test_threshold_flush_scenario() {
        let store = BufferedRecordStore::with_max_entries(MemoryRecordStore::new("t", 1), 2);
        for record in b"ABCDE" {
            store.add(&[*record]).unwrap();
        }
        assert_eq!(store.size().unwrap(), 5);

        store.put(1, b"X").unwrap();
        assert_eq!(store.buffered_len(), 1);
        store.put(3, b"Y").unwrap();
        assert_eq!(store.buffered_len(), 2);

        // Third pending entry crosses the threshold
        store.put(2, b"Z").unwrap();
        assert_eq!(store.buffered_len(), 0);
        assert_eq!(store.stats().flushed_records, 3);

        let backing = store.into_inner().unwrap();
        let records: Vec<u8> = backing.records().map(|r| r[0]).collect();
        assert_eq!(records, b"AXZYE");
    }

    #[test]
    fn test_truncate_scenario() {
        let store = BufferedRecordStore::with_max_entries(letters(b"ABCDE"), 2);
        store.put(1, b"X").unwrap();
        store.put(3, b"Y").unwrap();
        store.put(2, b"Z").unwrap();

        let mut buf = [0u8; 1];
        store.truncate_last_into(&mut buf).unwrap();
        assert_eq!(&buf, b"E");
        assert_eq!(store.size().unwrap(), 4);
        assert!(matches!(
            store.get(4, &mut buf),
            Err(RecordStoreError::OutOfBounds { index: 4, size: 4 })
        ));
        assert!(store.close().is_clean());
    }

    #[test]
    fn test_reads_prefer_buffer() {
        let store = BufferedRecordStore::with_max_entries(letters(b"abc"), 10);
        store.put(1, b"B").unwrap();

        assert_eq!(read(&store, 0), b'a');
        assert_eq!(read(&store, 1), b'B');
        assert_eq!(store.stats().buffer_hits, 1);
        assert_eq!(store.stats().buffer_misses, 1);

        // Nothing reached the backing store yet
        let backing = {
            let inner = store.inner.lock();
            inner.store.as_ref().unwrap().record(1).unwrap().to_vec()
        };
        assert_eq!(backing, b"b");
        assert!(store.close().is_clean());
    }

    #[test]
    fn test_last_write_wins() {
        let store = BufferedRecordStore::with_max_entries(letters(b"abc"), 10);
        store.put(0, b"1").unwrap();
        store.put(0, b"2").unwrap();
        store.put(0, b"3").unwrap();

        assert_eq!(store.buffered_len(), 1);
        assert_eq!(store.stats().coalesced_writes, 2);
        assert_eq!(read(&store, 0), b'3');

        let backing = store.into_inner().unwrap();
        assert_eq!(backing.record(0), Some(&b"3"[..]));
    }

    #[test]
    fn test_put_at_size_appends() {
        let store = BufferedRecordStore::with_max_entries(letters(b"ab"), 10);
        store.put(2, b"c").unwrap();

        assert_eq!(store.size().unwrap(), 3);
        assert_eq!(store.buffered_len(), 0);
        assert_eq!(store.stats().appends, 1);
        assert_eq!(read(&store, 2), b'c');
        assert!(store.close().is_clean());
    }

    #[test]
    fn test_put_out_of_bounds() {
        let store = BufferedRecordStore::with_max_entries(letters(b"ab"), 10);
        assert!(matches!(
            store.put(3, b"x"),
            Err(RecordStoreError::OutOfBounds { index: 3, size: 2 })
        ));

        let mut buf = [0u8; 1];
        assert!(matches!(
            store.get(2, &mut buf),
            Err(RecordStoreError::OutOfBounds { index: 2, size: 2 })
        ));
        assert!(store.close().is_clean());
    }

    #[test]
    fn test_truncate_buffered_last_record() {
        let store = BufferedRecordStore::with_max_entries(letters(b"abc"), 10);
        store.put(2, b"C").unwrap();

        let mut buf = [0u8; 1];
        store.truncate_last_into(&mut buf).unwrap();
        assert_eq!(&buf, b"C");
        assert_eq!(store.buffered_len(), 0);
        assert_eq!(store.size().unwrap(), 2);

        // Appending again must not resurrect the buffered value
        store.add(b"d").unwrap();
        assert_eq!(read(&store, 2), b'd');
        assert!(store.close().is_clean());
    }

    #[test]
    fn test_truncate_without_content() {
        let store = BufferedRecordStore::with_max_entries(letters(b"ab"), 10);
        store.put(1, b"B").unwrap();
        store.truncate_last().unwrap();
        store.truncate_last().unwrap();

        assert_eq!(store.size().unwrap(), 0);
        assert_eq!(store.buffered_len(), 0);
        assert!(matches!(store.truncate_last(), Err(RecordStoreError::Empty)));
        assert_eq!(store.stats().truncations, 2);
        assert!(store.close().is_clean());
    }

    #[test]
    fn test_write_through() {
        let store = BufferedRecordStore::new(letters(b"ab"), BufferConfig::write_through());
        store.put(0, b"A").unwrap();
        assert_eq!(store.buffered_len(), 0);

        let backing = store.into_inner().unwrap();
        assert_eq!(backing.record(0), Some(&b"A"[..]));
    }

    #[test]
    fn test_explicit_flush() {
        let store = BufferedRecordStore::with_max_entries(letters(b"abcd"), 10);
        store.put(3, b"D").unwrap();
        store.put(0, b"A").unwrap();

        assert_eq!(store.flush().unwrap(), 2);
        assert_eq!(store.flush().unwrap(), 0);
        assert_eq!(store.stats().flushes, 1);
        assert!(store.close().is_clean());
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = BufferedRecordStore::with_max_entries(letters(b"ab"), 10);
        store.put(0, b"A").unwrap();

        let first = store.close();
        assert!(!first.already_closed);
        assert_eq!(first.flushed, 1);
        assert_eq!(first.into_result().unwrap(), 1);

        let second = store.close();
        assert!(second.already_closed);
        assert!(second.is_clean());

        assert!(store.is_closed());
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn test_closed_store_fails_loudly() {
        let store = BufferedRecordStore::with_max_entries(letters(b"ab"), 10);
        let _ = store.close();

        let mut buf = [0u8; 1];
        assert!(matches!(store.get(0, &mut buf), Err(RecordStoreError::Closed)));
        assert!(matches!(store.put(0, b"x"), Err(RecordStoreError::Closed)));
        assert!(matches!(store.add(b"x"), Err(RecordStoreError::Closed)));
        assert!(matches!(store.truncate_last(), Err(RecordStoreError::Closed)));
        assert!(matches!(store.flush(), Err(RecordStoreError::Closed)));
        assert!(matches!(store.filename(), Err(RecordStoreError::Closed)));
        assert!(matches!(
            store.mark_for_deletion_on_exit(),
            Err(RecordStoreError::Closed)
        ));
    }

    #[test]
    fn test_delegation() {
        let store = BufferedRecordStore::with_max_entries(letters(b"ab"), 10);
        assert_eq!(store.filename().unwrap(), PathBuf::from("letters"));
        assert_eq!(store.record_size(), 1);
        assert_eq!(store.max_entries(), 10);

        store.mark_for_deletion_on_exit().unwrap();
        let backing = store.into_inner().unwrap();
        assert!(backing.is_marked_for_deletion());
    }

    #[test]
    #[should_panic(expected = "cannot hold")]
    fn test_short_record_panics() {
        let store = BufferedRecordStore::with_max_entries(MemoryRecordStore::new("t", 4), 10);
        let _ = store.put(0, b"abc");
    }
}
