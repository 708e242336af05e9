//! On-disk vocabulary: header markers, TIFF tags, and field types.
//!
//! # File Layout
//!
//! ```text
//! 0   "II" 42u16 first_ifd_offset:u32
//! 8   INDEX_MAP_OFFSET_HEADER:u32        index_map_offset:u32   (0 until finished)
//! 16  DISPLAY_SETTINGS_OFFSET_HEADER:u32 display_block_offset:u32
//! 24  COMMENTS_OFFSET_HEADER:u32         comments_block_offset:u32
//! 32  SUMMARY_MD_HEADER:u32 length:u32 summary JSON
//! ... IFD, rationals, [description block], pixels, tag JSON   (one per plane)
//! ... index map, display block, comments block               (written at finish)
//! ```
//!
//! All values are little-endian; offsets are 32-bit.

// =============================================================================
// Header markers
// =============================================================================

/// "II" read as a little-endian u16
pub const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Classic TIFF version number
pub const VERSION_TIFF: u16 = 42;

/// Marks the index-map pointer slot at offset 8
pub const INDEX_MAP_OFFSET_HEADER: u32 = 54_773_648;

/// Marks the start of the index map block itself
pub const INDEX_MAP_HEADER: u32 = 3_453_623;

/// Marks the display-settings pointer slot at offset 16 and the block itself
pub const DISPLAY_SETTINGS_OFFSET_HEADER: u32 = 483_765_892;

/// Marks the comments pointer slot at offset 24 and the block itself
pub const COMMENTS_OFFSET_HEADER: u32 = 99_384_722;

/// Marks the summary metadata block at offset 32
pub const SUMMARY_MD_HEADER: u32 = 2_355_492;

/// Byte offset of the index-map pointer slot
pub const INDEX_MAP_SLOT: u64 = 8;

/// Byte offset of the display-settings pointer slot
pub const DISPLAY_SETTINGS_SLOT: u64 = 16;

/// Byte offset of the comments pointer slot
pub const COMMENTS_SLOT: u64 = 24;

/// Byte offset of the summary metadata block
pub const SUMMARY_BLOCK_OFFSET: u64 = 32;

/// Bytes before the summary JSON starts
pub const FIXED_HEADER_SIZE: u64 = 40;

/// Size of one index-map entry: channel, slice, frame, position, offset
pub const INDEX_ENTRY_SIZE: u64 = 20;

/// Minimum reserved size for display-settings and comments blocks
pub const MIN_METADATA_BLOCK_RESERVE: u32 = 4096;

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types used by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// 8-bit ASCII character, NUL terminated
    Ascii = 2,
    /// Unsigned 16-bit integer
    Short = 3,
    /// Unsigned 32-bit integer
    Long = 4,
    /// Two LONGs: numerator, denominator
    Rational = 5,
}

impl FieldType {
    /// Create a FieldType from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            _ => None,
        }
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// Tags written into every IFD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    /// Image width in pixels
    ImageWidth = 256,
    /// Image height in pixels
    ImageLength = 257,
    /// Bits per sample (8 or 16)
    BitsPerSample = 258,
    /// Compression scheme; always 1 (none)
    Compression = 259,
    /// Photometric interpretation; always 1 (BlackIsZero)
    PhotometricInterpretation = 262,
    /// OME-XML or pointer, first IFD of each file only
    ImageDescription = 270,
    /// Byte offset of the single strip
    StripOffsets = 273,
    /// Always 1
    SamplesPerPixel = 277,
    /// Rows per strip; equals image height
    RowsPerStrip = 278,
    /// Byte count of the single strip
    StripByteCounts = 279,
    /// Pixels per resolution unit in X
    XResolution = 282,
    /// Pixels per resolution unit in Y
    YResolution = 283,
    /// 1 = none, 3 = centimeter
    ResolutionUnit = 296,
    /// Per-image JSON tags
    MicroManagerMetadata = 51123,
}

impl TiffTag {
    /// Numeric tag id
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Tag from numeric id, `None` for tags this crate ignores
    pub fn from_u16(value: u16) -> Option<Self> {
        use TiffTag::*;
        Some(match value {
            256 => ImageWidth,
            257 => ImageLength,
            258 => BitsPerSample,
            259 => Compression,
            262 => PhotometricInterpretation,
            270 => ImageDescription,
            273 => StripOffsets,
            277 => SamplesPerPixel,
            278 => RowsPerStrip,
            279 => StripByteCounts,
            282 => XResolution,
            283 => YResolution,
            296 => ResolutionUnit,
            51123 => MicroManagerMetadata,
            _ => return None,
        })
    }
}

/// Size of one classic-TIFF IFD entry
pub const IFD_ENTRY_SIZE: u64 = 12;

/// Size of an IFD with `entries` entries, including count and next pointer
pub const fn ifd_size(entries: u64) -> u64 {
    2 + entries * IFD_ENTRY_SIZE + 4
}

/// Round up to the next word boundary, as TIFF requires for offsets
pub const fn word_align(offset: u64) -> u64 {
    offset + (offset & 1)
}
