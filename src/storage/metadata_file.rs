//! `_metadata.txt` sidecar: a human-readable JSON copy of the summary and every
//! image's tags, written incrementally so it stays useful after a crash.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::label::ImageLabel;
use crate::metadata::ImageTags;

use super::error::StorageError;

/// Incrementally written `{stem}_metadata.txt`
pub struct MetadataFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    entries: usize,
}

impl MetadataFile {
    /// Create the file and write the `"Summary"` entry
    pub fn create(path: impl AsRef<Path>, summary_json: &str) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut writer = BufWriter::new(File::create(&path)?);
        write!(writer, "{{\n\"Summary\": {}", summary_json)?;
        writer.flush()?;
        Ok(Self {
            path,
            writer: Some(writer),
            entries: 0,
        })
    }

    /// Append one image's tags under `FrameKey-t-c-z`
    pub fn add(&mut self, label: &ImageLabel, tags: &ImageTags) -> Result<(), StorageError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(StorageError::ReadOnly)?;
        write!(writer, ",\n\"{}\": {}", label.frame_key(), tags.to_json()?)?;
        writer.flush()?;
        self.entries += 1;
        Ok(())
    }

    /// Close the JSON object. Later calls are no-ops.
    pub fn finish(&mut self) -> Result<(), StorageError> {
        if let Some(mut writer) = self.writer.take() {
            writer.write_all(b"\n}\n")?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Path on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image entries written so far
    pub fn entries(&self) -> usize {
        self.entries
    }
}

impl Drop for MetadataFile {
    fn drop(&mut self) {
        if self.writer.is_some() {
            log::warn!(
                "{} dropped before finish; JSON object left open",
                self.path.display()
            );
        }
    }
}
