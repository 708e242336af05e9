//! # Multi-page TIFF codec
//!
//! One physical file of a dataset. [`TiffWriter`] appends planes and keeps the
//! file a valid TIFF after every append; [`TiffReader`] gives random access by
//! [`ImageLabel`](crate::label::ImageLabel), either live (sharing a writer's
//! index) or from a finished or crashed file on disk.
//!
//! The binary layout is documented in [`format`].

mod error;
pub mod format;
mod ifd;
mod reader;
mod writer;

#[cfg(test)]
mod tests;

pub use error::TiffError;
pub use ifd::{parse_header, Ifd, IfdEntry, PlaneLayout};
pub use reader::{IndexSource, TiffReader};
pub(crate) use reader::is_tiff_name;
pub use writer::{plane_block_len, trailer_len, Resolution, TiffWriter, MIN_DESCRIPTION_CAPACITY};
