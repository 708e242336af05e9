//! # mptiff - Multi-page OME-TIFF Storage for Microscopy Acquisitions
//!
//! `mptiff` stores multi-dimensional microscopy acquisitions (channel, z-slice,
//! time frame, stage position) as a set of multi-page TIFF files while the
//! acquisition is still running, and serves random-access reads of every plane
//! written so far.
//!
//! ## Key Features
//!
//! - **Write while acquiring**: planes are queued and written on a background
//!   thread; a barrier makes a plane readable the moment it is on disk.
//!
//! - **Crash tolerant files**: every append leaves a valid TIFF. Files without
//!   an index map (a crashed acquisition) are re-indexed by walking the IFD chain.
//!
//! - **File sets and rollover**: one file set per stage position, rolling over
//!   to a new file before the 32-bit offset ceiling or a configured size.
//!
//! - **OME-XML**: exactly one file of the dataset (or a sidecar document) holds
//!   the full OME-XML; every other file points at it.
//!
//! - **Aborted acquisitions**: a partially written last frame is completed with
//!   blank planes so every channel declares the same frame extent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mptiff::prelude::*;
//!
//! let summary = SummaryMetadata::new("run", 2, 1, 3, 1).with_channel_names(["DAPI", "GFP"]);
//! let engine = StorageEngine::create(StorageConfig::new_dataset("data/run"), summary)?;
//!
//! for t in 0..3 {
//!     for c in 0..2 {
//!         let label = ImageLabel::new(c, 0, t, 0);
//!         engine.put_image(TaggedImage::blank(label, 512, 512, PixelType::Gray16))?;
//!     }
//! }
//! engine.finished()?;
//! engine.close();
//!
//! // Later, or from another process
//! let dataset = StorageEngine::open("data/run")?;
//! let plane = dataset.get_image(&ImageLabel::new(1, 0, 2, 0));
//! assert!(plane.is_some());
//! # Ok::<(), mptiff::storage::StorageError>(())
//! ```
//!
//! This creates a directory structure:
//! ```text
//! data/run/
//! └── run_MMStack_Pos0.ome.tif   # planes, index map, OME-XML master
//! ```
//!
//! ## Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`label`]: plane coordinates and the persisted label ordering
//! - [`image`]: a plane's pixels plus its JSON tags
//! - [`metadata`]: image tags, summary metadata, display settings, OME-XML
//! - [`tiff`]: the multi-page TIFF codec (one physical file)
//! - [`storage`]: the acquisition-facing engine over many files
//! - [`validator`]: integrity checks for finished datasets

// Documentation lints
#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod image;
pub mod label;
pub mod metadata;
pub mod storage;
pub mod tiff;
pub mod validator;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::image::{PlaneGeometry, TaggedImage};
    pub use crate::label::{Coords, ImageLabel, LabelOrdering};
    pub use crate::metadata::{
        keys, DisplaySettings, ImageTags, MetadataError, OmeDocument, PixelType, SummaryMetadata,
    };
    pub use crate::storage::{
        ImageStorage, StorageConfig, StorageEngine, StorageError, SIDECAR_FILE_NAME,
    };
    pub use crate::tiff::{TiffError, TiffReader, TiffWriter};
    pub use crate::validator::{validate_dataset, ValidationReport};
}
