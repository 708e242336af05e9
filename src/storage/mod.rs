//! # Storage Module
//!
//! The acquisition-facing side of the crate: a [`StorageEngine`] accepts tagged
//! images while an acquisition runs, writes them on a background thread into
//! one [`FileSet`] per stage position, and serves random-access reads of
//! everything written so far.
//!
//! ## Dataset Layout
//!
//! ```text
//! {directory}/
//! ├── {prefix}_MMStack_Pos0.ome.tif     # position 0, first segment (often the OME-XML master)
//! ├── {prefix}_MMStack_Pos0_1.ome.tif   # position 0, rolled over at max_file_size
//! ├── {prefix}_MMStack_Pos1.ome.tif     # position 1
//! ├── {prefix}_MMStack_Pos0_metadata.txt  # optional JSON sidecar per file set
//! └── OMEXMLMetadata.ome                # only when no file had room for the OME-XML
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mptiff::image::TaggedImage;
//! use mptiff::label::ImageLabel;
//! use mptiff::metadata::{PixelType, SummaryMetadata};
//! use mptiff::storage::{ImageStorage, StorageConfig, StorageEngine};
//!
//! let summary = SummaryMetadata::new("run", 1, 1, 10, 1);
//! let engine = StorageEngine::create(StorageConfig::new_dataset("data/run"), summary)?;
//!
//! for t in 0..10 {
//!     let label = ImageLabel::new(0, 0, t, 0);
//!     engine.put_image(TaggedImage::blank(label, 512, 512, PixelType::Gray16))?;
//! }
//! engine.finished()?;
//!
//! let image = engine.get_image(&ImageLabel::new(0, 0, 3, 0));
//! assert!(image.is_some());
//! engine.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
mod engine;
mod error;
mod fileset;
mod index;
mod metadata_file;
mod progress;
mod worker;


pub use config::{StorageConfig, DEFAULT_MAX_FILE_SIZE, DEFAULT_OME_XML_RESERVE};
pub use engine::{StorageEngine, SIDECAR_FILE_NAME};
pub use error::StorageError;
pub use fileset::{FileSet, WrittenPlane};
pub use index::LabelIndex;
pub use metadata_file::MetadataFile;
pub use progress::{LogProgress, NoProgress, ProgressReporter};
pub use worker::{Job, WriteWorker};

use crate::image::TaggedImage;
use crate::label::Coords;
use crate::metadata::{DisplaySettings, ImageTags, SummaryMetadata};

/// Contract between an acquisition (producer), viewers (consumers), and a store.
pub trait ImageStorage: Send + Sync {
    /// Queue an image for writing. Returns once queued, not once written.
    ///
    /// Fails with [`StorageError::ReadOnly`] after [`finished`](Self::finished),
    /// [`StorageError::DuplicateImage`] if the label was already stored, or with
    /// a failure reported by an earlier background write.
    fn put_image(&self, image: TaggedImage) -> Result<(), StorageError>;

    /// Like [`put_image`](Self::put_image), then wait until every queued write is on disk.
    fn put_image_and_wait(&self, image: TaggedImage) -> Result<(), StorageError>;

    /// Pixels and tags at `coords`, `None` if absent
    fn get_image(&self, coords: &Coords) -> Option<TaggedImage>;

    /// Tags at `coords`, `None` if absent
    fn get_image_tags(&self, coords: &Coords) -> Option<ImageTags>;

    /// Replace the pixels of a stored image in place
    fn overwrite_pixels(&self, pixels: &[u8], coords: &Coords) -> Result<(), StorageError>;

    /// Finalize the dataset; it is read-only afterwards. Idempotent.
    fn finished(&self) -> Result<(), StorageError>;

    /// Whether [`finished`](Self::finished) has run (always true for opened datasets)
    fn is_finished(&self) -> bool;

    /// Release every open file. Safe to call repeatedly.
    fn close(&self);

    /// Dataset summary
    fn summary_metadata(&self) -> SummaryMetadata;

    /// Replace the dataset summary; only while writable.
    ///
    /// The label ordering it carries is persisted with the first file, so a
    /// different ordering is refused with [`StorageError::OrderingLocked`]
    /// once any image has been submitted.
    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StorageError>;

    /// Display settings and comments
    fn display_and_comments(&self) -> DisplaySettings;

    /// Replace display settings and comments in memory
    fn set_display_and_comments(&self, settings: DisplaySettings);
}
