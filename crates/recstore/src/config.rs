//! Configuration for record stores

use crate::{RecordStoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the overwrite buffer of a
/// [`BufferedRecordStore`](crate::BufferedRecordStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Number of pending overwrites the buffer may hold.
    ///
    /// A `put` that leaves more than this many entries in the buffer flushes
    /// the whole buffer before returning. Zero makes every overwrite
    /// write-through.
    pub max_entries: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

impl BufferConfig {
    /// Create a new buffer configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that flushes every overwrite immediately
    pub const fn write_through() -> Self {
        Self { max_entries: 0 }
    }

    /// Set the buffer threshold
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// Configuration for a file-backed [`RecordFile`](crate::RecordFile).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFileConfig {
    /// Path of the record file
    pub path: PathBuf,

    /// Bytes per record
    pub record_size: usize,

    /// Discard existing content when opening
    #[serde(default)]
    pub truncate: bool,
}

impl RecordFileConfig {
    /// Create a configuration for the file at `path` holding records of
    /// `record_size` bytes
    pub fn new<P: AsRef<Path>>(path: P, record_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            record_size,
            truncate: false,
        }
    }

    /// Set the path of the record file
    #[must_use]
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    /// Discard existing file content on open
    #[must_use]
    pub const fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.record_size == 0 {
            return Err(RecordStoreError::Config(
                "record_size must be greater than 0".to_string(),
            ));
        }

        if self.path.as_os_str().is_empty() {
            return Err(RecordStoreError::Config("path must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_config_defaults() {
        assert_eq!(BufferConfig::new().max_entries, 1000);
        assert_eq!(BufferConfig::write_through().max_entries, 0);
        assert_eq!(BufferConfig::new().with_max_entries(2).max_entries, 2);
    }

    #[test]
    fn test_record_file_config_validation() {
        let config = RecordFileConfig::new("table.rec", 8);
        assert!(config.validate().is_ok());

        let zero = RecordFileConfig::new("table.rec", 0);
        assert!(matches!(zero.validate(), Err(RecordStoreError::Config(_))));

        let no_path = RecordFileConfig::new("", 8);
        assert!(matches!(no_path.validate(), Err(RecordStoreError::Config(_))));
    }

    #[test]
    fn test_config_from_json() {
        let buffer: BufferConfig =
            serde_json::from_str(r#"{"max_entries": 64}"#).expect("buffer config");
        assert_eq!(buffer, BufferConfig::new().with_max_entries(64));

        // `truncate` is optional
        let file: RecordFileConfig =
            serde_json::from_str(r#"{"path": "/tmp/t.rec", "record_size": 16}"#)
                .expect("file config");
        assert_eq!(file, RecordFileConfig::new("/tmp/t.rec", 16));
        assert!(!file.truncate);
    }
}
