//! Header and IFD parsing.
//!
//! Every read is bounds-checked against the file size so that a file cut short
//! by a crash yields [`TiffError::Truncated`] instead of garbage.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use crate::metadata::PixelType;

use super::error::TiffError;
use super::format::{
    ifd_size, FieldType, TiffTag, BYTE_ORDER_LITTLE_ENDIAN, IFD_ENTRY_SIZE, VERSION_TIFF,
};

/// Read exactly `len` bytes at `offset`, failing if the file is too short.
pub(crate) fn read_bytes<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    len: u64,
    file_size: u64,
) -> Result<Vec<u8>, TiffError> {
    if offset.checked_add(len).map_or(true, |end| end > file_size) {
        return Err(TiffError::Truncated {
            offset,
            required: len,
            size: file_size,
        });
    }
    let mut buf = vec![0u8; len as usize];
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Strip the NUL terminator and padding from a stored string.
pub(crate) fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

// =============================================================================
// Header
// =============================================================================

/// Validate the 8-byte TIFF header and return the first IFD offset (0 = none yet).
pub fn parse_header(bytes: &[u8]) -> Result<u64, TiffError> {
    if bytes.len() < 8 {
        return Err(TiffError::Truncated {
            offset: 0,
            required: 8,
            size: bytes.len() as u64,
        });
    }
    let magic = LittleEndian::read_u16(&bytes[0..2]);
    if magic != BYTE_ORDER_LITTLE_ENDIAN {
        return Err(TiffError::InvalidMagic(magic));
    }
    let version = LittleEndian::read_u16(&bytes[2..4]);
    if version != VERSION_TIFF {
        return Err(TiffError::InvalidVersion(version));
    }
    Ok(LittleEndian::read_u32(&bytes[4..8]) as u64)
}

// =============================================================================
// IFD entries
// =============================================================================

/// One raw 12-byte IFD entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdEntry {
    /// Tag id
    pub tag: u16,
    /// Field type id
    pub field_type: u16,
    /// Number of values
    pub count: u32,
    /// Inline value or offset, as stored
    pub value: u32,
}

impl IfdEntry {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            tag: LittleEndian::read_u16(&bytes[0..2]),
            field_type: LittleEndian::read_u16(&bytes[2..4]),
            count: LittleEndian::read_u32(&bytes[4..8]),
            value: LittleEndian::read_u32(&bytes[8..12]),
        }
    }

    /// Scalar value of a single SHORT or LONG entry
    pub fn scalar(&self) -> Option<u32> {
        if self.count != 1 {
            return None;
        }
        match FieldType::from_u16(self.field_type)? {
            FieldType::Short => Some(self.value & 0xFFFF),
            FieldType::Long => Some(self.value),
            _ => None,
        }
    }

    /// Offset and length of an out-of-line ASCII or UNDEFINED payload
    pub fn blob(&self) -> (u64, u64) {
        (self.value as u64, self.count as u64)
    }
}

/// A parsed image file directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    /// Offset of the IFD itself
    pub offset: u64,
    /// Entries in file order
    pub entries: Vec<IfdEntry>,
    /// Offset of the next IFD, 0 at the end of the chain
    pub next_ifd: u64,
}

impl Ifd {
    /// Read the IFD at `offset`.
    pub fn read<R: Read + Seek>(reader: &mut R, offset: u64, file_size: u64) -> Result<Self, TiffError> {
        if offset < 8 || offset & 1 == 1 {
            return Err(TiffError::InvalidIfdOffset(offset));
        }
        let count_bytes = read_bytes(reader, offset, 2, file_size)?;
        let count = LittleEndian::read_u16(&count_bytes) as u64;
        let body = read_bytes(reader, offset + 2, count * IFD_ENTRY_SIZE + 4, file_size)?;
        let entries = body[..(count * IFD_ENTRY_SIZE) as usize]
            .chunks_exact(IFD_ENTRY_SIZE as usize)
            .map(IfdEntry::parse)
            .collect();
        let next_ifd = LittleEndian::read_u32(&body[(count * IFD_ENTRY_SIZE) as usize..]) as u64;
        Ok(Self {
            offset,
            entries,
            next_ifd,
        })
    }

    /// Entry for `tag`, if present
    pub fn get(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag.id())
    }

    /// Scalar value of a required tag
    pub fn require(&self, tag: TiffTag, name: &'static str) -> Result<u32, TiffError> {
        self.get(tag)
            .and_then(IfdEntry::scalar)
            .ok_or(TiffError::MissingTag(name))
    }

    /// Byte offset of this IFD's next-IFD field
    pub fn next_field_offset(&self) -> u64 {
        self.offset + ifd_size(self.entries.len() as u64) - 4
    }

    /// Resolve where this plane's pixels, tags, and description live.
    pub fn layout(&self, file_size: u64) -> Result<PlaneLayout, TiffError> {
        let width = self.require(TiffTag::ImageWidth, "ImageWidth")?;
        let height = self.require(TiffTag::ImageLength, "ImageLength")?;
        let bits = self.require(TiffTag::BitsPerSample, "BitsPerSample")?;
        let pixel_type = PixelType::from_bits_per_sample(bits as u16).ok_or_else(|| {
            TiffError::MetadataError(crate::metadata::MetadataError::UnsupportedPixelType(format!(
                "{} bits per sample",
                bits
            )))
        })?;
        let strip_offset = self.require(TiffTag::StripOffsets, "StripOffsets")? as u64;
        let strip_len = self.require(TiffTag::StripByteCounts, "StripByteCounts")? as u64;
        let tags = self
            .get(TiffTag::MicroManagerMetadata)
            .map(IfdEntry::blob)
            .ok_or(TiffError::MissingTag("MicroManagerMetadata"))?;
        let description = self.get(TiffTag::ImageDescription).map(IfdEntry::blob);

        for (offset, len) in [(strip_offset, strip_len), tags]
            .into_iter()
            .chain(description)
        {
            if offset.checked_add(len).map_or(true, |end| end > file_size) {
                return Err(TiffError::Truncated {
                    offset,
                    required: len,
                    size: file_size,
                });
            }
        }

        Ok(PlaneLayout {
            width,
            height,
            pixel_type,
            strip_offset,
            strip_len,
            tags_offset: tags.0,
            tags_len: tags.1,
            description,
        })
    }
}

/// Location of one plane's data inside the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Sample format
    pub pixel_type: PixelType,
    /// Offset of the single strip
    pub strip_offset: u64,
    /// Byte length of the strip
    pub strip_len: u64,
    /// Offset of the per-image JSON
    pub tags_offset: u64,
    /// Byte length of the per-image JSON, including terminator
    pub tags_len: u64,
    /// Offset and capacity of the reserved description block, first IFD only
    pub description: Option<(u64, u64)>,
}

impl PlaneLayout {
    /// Read and decode the per-image JSON
    pub fn read_tags<R: Read + Seek>(
        &self,
        reader: &mut R,
        file_size: u64,
    ) -> Result<crate::metadata::ImageTags, TiffError> {
        let raw = read_bytes(reader, self.tags_offset, self.tags_len, file_size)?;
        let json = String::from_utf8_lossy(trim_nul(&raw));
        Ok(crate::metadata::ImageTags::from_json(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_header() {
        let bytes = [0x49, 0x49, 42, 0, 0x10, 0, 0, 0];
        assert_eq!(parse_header(&bytes).unwrap(), 16);
    }

    #[test]
    fn test_parse_header_rejects_big_endian() {
        let bytes = [0x4D, 0x4D, 0, 42, 0, 0, 0, 8];
        assert!(matches!(
            parse_header(&bytes),
            Err(TiffError::InvalidMagic(0x4D4D))
        ));
        let bytes = [0x49, 0x49, 43, 0, 8, 0, 0, 0];
        assert!(matches!(
            parse_header(&bytes),
            Err(TiffError::InvalidVersion(43))
        ));
    }

    #[test]
    fn test_read_bytes_bounds() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4]);
        assert_eq!(read_bytes(&mut cursor, 1, 2, 4).unwrap(), vec![2, 3]);
        assert!(matches!(
            read_bytes(&mut cursor, 3, 2, 4),
            Err(TiffError::Truncated { offset: 3, .. })
        ));
    }

    #[test]
    fn test_entry_scalar() {
        let short = IfdEntry {
            tag: 256,
            field_type: 3,
            count: 1,
            value: 0xABCD_0200,
        };
        assert_eq!(short.scalar(), Some(0x0200));
        let ascii = IfdEntry {
            tag: 270,
            field_type: 2,
            count: 10,
            value: 64,
        };
        assert_eq!(ascii.scalar(), None);
        assert_eq!(ascii.blob(), (64, 10));
    }

    #[test]
    fn test_ifd_offset_must_be_word_aligned() {
        let mut cursor = Cursor::new(vec![0u8; 64]);
        assert!(matches!(
            Ifd::read(&mut cursor, 9, 64),
            Err(TiffError::InvalidIfdOffset(9))
        ));
    }

    #[test]
    fn test_trim_nul() {
        assert_eq!(trim_nul(b"abc\0\0\0"), b"abc");
        assert_eq!(trim_nul(b"abc"), b"abc");
        assert_eq!(trim_nul(b"\0abc"), b"");
    }
}
