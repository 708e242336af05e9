use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::StorageError;
use super::progress::{LogProgress, ProgressReporter};

/// Default size limit per file, just below the 4 GiB offset ceiling
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4_000_000_000;

/// Default bytes reserved for the OME-XML document in each file
pub const DEFAULT_OME_XML_RESERVE: usize = 64 * 1024;

/// Configuration for a [`StorageEngine`](super::StorageEngine), fixed at construction
#[derive(Clone)]
pub struct StorageConfig {
    /// Dataset directory
    pub directory: PathBuf,

    /// Create a new dataset (true) or open an existing one read-only (false)
    pub new_dataset: bool,

    /// Also write a `_metadata.txt` JSON sidecar per file set
    pub separate_metadata_file: bool,

    /// One file set per stage position instead of one for the whole dataset
    pub split_by_position: bool,

    /// Roll to a new file before a plane would push the current one past this size
    pub max_file_size: u64,

    /// Bytes reserved in each file's first IFD for the OME-XML document
    /// (never below [`MIN_DESCRIPTION_CAPACITY`](crate::tiff::MIN_DESCRIPTION_CAPACITY))
    pub ome_xml_reserve_bytes: usize,

    /// Write blank planes to complete a partially written last frame at finish
    pub complete_aborted_frames: bool,

    /// Sink for progress of long scans
    pub progress: Arc<dyn ProgressReporter>,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("directory", &self.directory)
            .field("new_dataset", &self.new_dataset)
            .field("separate_metadata_file", &self.separate_metadata_file)
            .field("split_by_position", &self.split_by_position)
            .field("max_file_size", &self.max_file_size)
            .field("ome_xml_reserve_bytes", &self.ome_xml_reserve_bytes)
            .field("complete_aborted_frames", &self.complete_aborted_frames)
            .finish_non_exhaustive()
    }
}

impl StorageConfig {
    /// Configuration for writing a new dataset into `directory`
    pub fn new_dataset(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            new_dataset: true,
            separate_metadata_file: false,
            split_by_position: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            ome_xml_reserve_bytes: DEFAULT_OME_XML_RESERVE,
            complete_aborted_frames: true,
            progress: Arc::new(LogProgress),
        }
    }

    /// Configuration for opening an existing dataset read-only
    pub fn open_existing(directory: impl AsRef<Path>) -> Self {
        Self {
            new_dataset: false,
            ..Self::new_dataset(directory)
        }
    }

    /// Set [`separate_metadata_file`](Self::separate_metadata_file)
    pub fn with_separate_metadata_file(mut self, enabled: bool) -> Self {
        self.separate_metadata_file = enabled;
        self
    }

    /// Set [`split_by_position`](Self::split_by_position)
    pub fn with_split_by_position(mut self, enabled: bool) -> Self {
        self.split_by_position = enabled;
        self
    }

    /// Set [`max_file_size`](Self::max_file_size)
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Set [`ome_xml_reserve_bytes`](Self::ome_xml_reserve_bytes)
    pub fn with_ome_xml_reserve(mut self, bytes: usize) -> Self {
        self.ome_xml_reserve_bytes = bytes;
        self
    }

    /// Set [`complete_aborted_frames`](Self::complete_aborted_frames)
    pub fn with_complete_aborted_frames(mut self, enabled: bool) -> Self {
        self.complete_aborted_frames = enabled;
        self
    }

    /// Replace the progress sink
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Reserve actually used for the description block
    pub fn description_capacity(&self) -> usize {
        self.ome_xml_reserve_bytes
            .max(crate::tiff::MIN_DESCRIPTION_CAPACITY)
    }

    /// Reject settings that cannot produce a readable dataset.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.max_file_size < 64 * 1024 {
            return Err(StorageError::InvalidConfig(format!(
                "max_file_size {} is below 64 KiB",
                self.max_file_size
            )));
        }
        if self.max_file_size > u32::MAX as u64 {
            return Err(StorageError::InvalidConfig(format!(
                "max_file_size {} exceeds 32-bit offsets",
                self.max_file_size
            )));
        }
        if self.description_capacity() as u64 >= self.max_file_size {
            return Err(StorageError::InvalidConfig(
                "ome_xml_reserve_bytes does not fit in max_file_size".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::new_dataset("/tmp/x");
        assert!(config.new_dataset);
        assert!(config.split_by_position);
        assert!(config.complete_aborted_frames);
        assert_eq!(config.max_file_size, 4_000_000_000);
        assert_eq!(config.description_capacity(), 64 * 1024);
        assert!(config.validate().is_ok());
        assert!(!StorageConfig::open_existing("/tmp/x").new_dataset);
    }

    #[test]
    fn test_reserve_floor() {
        let config = StorageConfig::new_dataset("/tmp/x").with_ome_xml_reserve(10);
        assert_eq!(config.description_capacity(), 1024);
    }

    #[test]
    fn test_validate_limits() {
        let tiny = StorageConfig::new_dataset("/tmp/x").with_max_file_size(1000);
        assert!(matches!(tiny.validate(), Err(StorageError::InvalidConfig(_))));
        let huge = StorageConfig::new_dataset("/tmp/x").with_max_file_size(u64::MAX);
        assert!(matches!(huge.validate(), Err(StorageError::InvalidConfig(_))));
    }
}
