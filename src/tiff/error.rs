use crate::label::ImageLabel;
use crate::metadata::MetadataError;

/// Errors that can occur when reading or writing multi-page TIFF files
#[derive(Debug, thiserror::Error)]
pub enum TiffError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error decoding embedded metadata
    #[error("Metadata error: {0}")]
    MetadataError(#[from] MetadataError),

    /// Invalid TIFF magic bytes (only little-endian "II" files are produced)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42, got {0}")]
    InvalidVersion(u16),

    /// Summary block header does not carry the expected marker
    #[error("Missing summary metadata header (not written by this crate?)")]
    MissingSummaryHeader,

    /// File is too small to contain the structure being read
    #[error("File truncated: need {required} bytes at offset {offset}, file is {size} bytes")]
    Truncated {
        /// Offset of the read
        offset: u64,
        /// Bytes requested
        required: u64,
        /// Actual file size
        size: u64,
    },

    /// Invalid IFD offset (points outside file or backwards in the chain)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Index map block is malformed
    #[error("Corrupt index map: {0}")]
    CorruptIndexMap(String),

    /// No plane with this label in the file
    #[error("Image {0} not found in file")]
    ImageNotFound(ImageLabel),

    /// Pixel buffer length does not match the plane geometry
    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    PixelSizeMismatch {
        /// Bytes required by width * height * bytes per pixel
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Image description does not fit its reserved block
    #[error("Description of {len} bytes does not fit reserved block of {capacity} bytes")]
    DescriptionTooLarge {
        /// Bytes to write, including terminator
        len: usize,
        /// Reserved bytes
        capacity: usize,
    },

    /// Offsets are 32-bit; the file grew past what they can address
    #[error("File exceeds 4 GiB classic TIFF limit")]
    FileTooLarge,

    /// Operation not allowed while planes are still being appended
    #[error("File is still being written")]
    StillWriting,

    /// Writer has already been finished
    #[error("Writer already finished")]
    AlreadyFinished,

    /// Reader was closed
    #[error("Reader closed")]
    Closed,
}
