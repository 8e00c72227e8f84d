//! Fixed-size record storage with a write-coalescing overwrite buffer.
//!
//! Records are addressed by a dense `u64` index in `[0, size)` and all have
//! the same byte length, fixed when the backing store is created. The crate
//! is built around two pieces:
//!
//! - **[`RecordStore`]**: the backing store contract (read, in-place write,
//!   append, drop the trailing record). [`RecordFile`] implements it on top of
//!   a plain file, [`MemoryRecordStore`] keeps everything in memory.
//! - **[`BufferedRecordStore`]**: a decorator that defers overwrites of
//!   existing records into an ordered in-memory buffer and writes them back
//!   in ascending index order once the buffer exceeds its configured size, on
//!   an explicit [`flush`](BufferedRecordStore::flush), or at close. Appends
//!   always go straight to the backing store.
//!
//! Reads and writes through the buffered store are indistinguishable from
//! the unbuffered store: a read returns the most recent write for an index
//! whether that write is still pending or already flushed.
//!
//! # Example
//!
//! ```rust
//! use recstore::{BufferConfig, BufferedRecordStore, MemoryRecordStore};
//!
//! # fn example() -> recstore::Result<()> {
//! let store = BufferedRecordStore::new(
//!     MemoryRecordStore::new("scratch", 4),
//!     BufferConfig::new().with_max_entries(2),
//! );
//!
//! store.add(b"aaaa")?;
//! store.add(b"bbbb")?;
//! store.put(0, b"AAAA")?; // buffered
//!
//! let mut buf = [0u8; 4];
//! store.get(0, &mut buf)?;
//! assert_eq!(&buf, b"AAAA");
//!
//! let report = store.close();
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]

use thiserror::Error;

// Write-coalescing decorator
pub mod buffered;

// Configuration
pub mod config;

// Counters exposed by the buffered store
pub mod stats;

// Backing store contract and implementations
pub mod store;

pub use buffered::{BufferedRecordStore, CloseReport, IntoInnerError};
pub use config::{BufferConfig, RecordFileConfig};
pub use stats::BufferStats;
pub use store::{MemoryRecordStore, RecordFile, RecordStore};

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, RecordStoreError>;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// I/O error occurred in the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record index outside the addressable range.
    #[error("index {index} outside bounds (size {size})")]
    OutOfBounds {
        /// Requested record index.
        index: u64,
        /// Record count at the time of the request.
        size: u64,
    },

    /// Trailing record removal on a store without records.
    #[error("store holds no records")]
    Empty,

    /// Operation on a store that has already been closed.
    #[error("store is closed")]
    Closed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Version information for the record store.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
