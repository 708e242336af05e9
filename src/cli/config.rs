//! TOML configuration file support.
//!
//! Storage settings can be given in a config file instead of flags:
//!
//! ```toml
//! # mptiff.toml
//! [storage]
//! split_by_position = true
//! separate_metadata_file = true
//! max_file_size = 2000000000
//! ome_xml_reserve_bytes = 131072
//! complete_aborted_frames = false
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use mptiff::storage::StorageConfig;

/// Root configuration structure for mptiff.toml files.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Storage engine settings.
    #[serde(default)]
    pub storage: StorageSection,
}

/// Overrides for [`StorageConfig`]; unset keys keep the library defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    /// One file set per stage position.
    pub split_by_position: Option<bool>,

    /// Also write `{stem}_metadata.txt` JSON sidecars.
    pub separate_metadata_file: Option<bool>,

    /// Roll over to a new file beyond this many bytes.
    pub max_file_size: Option<u64>,

    /// Bytes reserved for the OME-XML in the first IFD of every file.
    pub ome_xml_reserve_bytes: Option<usize>,

    /// Fill a partially written last frame with blank planes on finish.
    pub complete_aborted_frames: Option<bool>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Apply the `[storage]` overrides to `config`.
    pub fn apply(&self, mut config: StorageConfig) -> StorageConfig {
        let s = &self.storage;
        if let Some(v) = s.split_by_position {
            config = config.with_split_by_position(v);
        }
        if let Some(v) = s.separate_metadata_file {
            config = config.with_separate_metadata_file(v);
        }
        if let Some(v) = s.max_file_size {
            config = config.with_max_file_size(v);
        }
        if let Some(v) = s.ome_xml_reserve_bytes {
            config = config.with_ome_xml_reserve(v);
        }
        if let Some(v) = s.complete_aborted_frames {
            config = config.with_complete_aborted_frames(v);
        }
        config
    }
}
