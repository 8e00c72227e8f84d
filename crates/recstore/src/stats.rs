//! Buffered store counters

use serde::{Deserialize, Serialize};

/// Snapshot of the counters kept by a
/// [`BufferedRecordStore`](crate::BufferedRecordStore).
///
/// Counters are maintained under the store lock, so a snapshot is always
/// consistent with itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    /// Entries currently pending in the buffer
    pub buffered: usize,
    /// Reads answered from the buffer
    pub buffer_hits: u64,
    /// Reads delegated to the backing store
    pub buffer_misses: u64,
    /// Overwrites placed in the buffer
    pub buffered_writes: u64,
    /// Overwrites that replaced a still-pending value for the same index
    pub coalesced_writes: u64,
    /// Records appended to the backing store
    pub appends: u64,
    /// Trailing records removed
    pub truncations: u64,
    /// Flushes that wrote at least one record
    pub flushes: u64,
    /// Records written back by flushes
    pub flushed_records: u64,
}

impl BufferStats {
    /// Fraction of reads answered from the buffer
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.buffer_hits + self.buffer_misses;
        if total == 0 {
            0.0
        } else {
            self.buffer_hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let empty = BufferStats::default();
        assert!(empty.hit_rate().abs() < f64::EPSILON);

        let stats = BufferStats {
            buffer_hits: 3,
            buffer_misses: 1,
            ..BufferStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
