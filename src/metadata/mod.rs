//! # Metadata Module
//!
//! Everything that describes planes and datasets rather than pixel data:
//!
//! 1. **Image tags** ([`ImageTags`]): per-plane JSON stored next to the pixels.
//! 2. **Summary metadata** ([`SummaryMetadata`]): dataset-wide description,
//!    including the label-ordering flags that must survive a reopen.
//! 3. **Display settings** ([`DisplaySettings`]): per-channel contrast and color
//!    plus free-text comments, rewritable after the dataset is finished.
//! 4. **OME-XML** ([`OmeMetadataBuilder`]): the interoperable document embedded
//!    in exactly one file of the dataset.

mod display;
mod error;
mod ome;
mod summary;
mod tags;

#[cfg(test)]
mod tests;

pub use display::{ChannelDisplay, DisplaySettings, SUMMARY_COMMENT_KEY};
pub use error::MetadataError;
pub use ome::{pointer_to_master, FileRef, OmeDocument, OmeMetadataBuilder, PlaneRecord, OME_NAMESPACE};
pub use summary::SummaryMetadata;
pub use tags::{keys, ImageTags, PixelType};
