//! Append-only writer for one multi-page file.
//!
//! Each plane is written as a single contiguous block (IFD, resolution
//! rationals, optional description reserve, pixels, tag JSON) and only then
//! linked into the IFD chain by patching the previous next-IFD field. A reader
//! following the chain therefore never sees a half-written plane.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::label::ImageLabel;
use crate::metadata::PixelType;

use super::error::TiffError;
use super::format::{
    ifd_size, word_align, FieldType, TiffTag, BYTE_ORDER_LITTLE_ENDIAN, COMMENTS_OFFSET_HEADER,
    COMMENTS_SLOT, DISPLAY_SETTINGS_OFFSET_HEADER, DISPLAY_SETTINGS_SLOT, INDEX_ENTRY_SIZE,
    INDEX_MAP_HEADER, INDEX_MAP_OFFSET_HEADER, INDEX_MAP_SLOT, MIN_METADATA_BLOCK_RESERVE,
    SUMMARY_MD_HEADER, VERSION_TIFF,
};
use super::reader::{SharedIndex, TiffReader};

/// Smallest description reserve; a master pointer must always fit.
pub const MIN_DESCRIPTION_CAPACITY: usize = 1024;

/// Entries in an IFD without the ImageDescription tag
const IFD_ENTRIES: u64 = 13;

/// Resolution tags derived from the physical pixel size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    numerator: u32,
    denominator: u32,
    unit: u16,
}

impl Resolution {
    /// Pixels per centimeter when the pixel size is known, otherwise unitless 1/1
    pub fn from_pixel_size_um(pixel_size_um: Option<f64>) -> Self {
        match pixel_size_um.filter(|ps| ps.is_finite() && *ps > 0.0) {
            Some(ps) => {
                let per_cm = (10_000.0 / ps * 1000.0).round();
                Self {
                    numerator: per_cm.clamp(1.0, u32::MAX as f64) as u32,
                    denominator: 1000,
                    unit: 3,
                }
            }
            None => Self {
                numerator: 1,
                denominator: 1,
                unit: 1,
            },
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::from_pixel_size_um(None)
    }
}

/// Bytes one plane block occupies, excluding word padding before it
pub fn plane_block_len(pixels_len: usize, tags_len: usize, description_capacity: Option<usize>) -> u64 {
    let entries = IFD_ENTRIES + u64::from(description_capacity.is_some());
    word_align(
        ifd_size(entries)
            + 16
            + description_capacity.unwrap_or(0) as u64
            + pixels_len as u64
            + tags_len as u64
            + 1,
    )
}

/// Bytes appended by [`TiffWriter::finish_writing`] for `planes` planes
pub fn trailer_len(planes: usize) -> u64 {
    8 + planes as u64 * INDEX_ENTRY_SIZE + 2 * (8 + MIN_METADATA_BLOCK_RESERVE as u64)
}

/// `header:u32 reserved_len:u32 payload` padded with NULs to `reserved_len`
pub(crate) fn metadata_block(header: u32, reserved: u32, payload: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(8 + reserved as usize);
    block.extend_from_slice(&header.to_le_bytes());
    block.extend_from_slice(&reserved.to_le_bytes());
    block.extend_from_slice(payload);
    block.resize(8 + reserved as usize, 0);
    block
}

fn to_offset(value: u64) -> Result<u32, TiffError> {
    u32::try_from(value).map_err(|_| TiffError::FileTooLarge)
}

/// Writer for one physical file
pub struct TiffWriter {
    path: PathBuf,
    file_name: String,
    uuid: String,
    file: Option<File>,
    /// End of written data, word aligned
    position: u64,
    /// Where the next IFD's offset gets patched in
    next_ifd_field: u64,
    description_capacity: usize,
    description_offset: Option<u64>,
    resolution: Resolution,
    entries: Vec<(ImageLabel, u32)>,
    index: SharedIndex,
    writing: Arc<AtomicBool>,
    finished: bool,
}

impl TiffWriter {
    /// Create `path`, truncating any existing file, and write the header and summary.
    pub fn create(
        path: impl AsRef<Path>,
        summary_json: &str,
        description_capacity: usize,
        resolution: Resolution,
    ) -> Result<Self, TiffError> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let summary = summary_json.as_bytes();
        let mut header = Vec::with_capacity(40 + summary.len());
        header.write_u16::<LittleEndian>(BYTE_ORDER_LITTLE_ENDIAN)?;
        header.write_u16::<LittleEndian>(VERSION_TIFF)?;
        header.write_u32::<LittleEndian>(0)?;
        for marker in [
            INDEX_MAP_OFFSET_HEADER,
            DISPLAY_SETTINGS_OFFSET_HEADER,
            COMMENTS_OFFSET_HEADER,
        ] {
            header.write_u32::<LittleEndian>(marker)?;
            header.write_u32::<LittleEndian>(0)?;
        }
        header.write_u32::<LittleEndian>(SUMMARY_MD_HEADER)?;
        header.write_u32::<LittleEndian>(to_offset(summary.len() as u64)?)?;
        header.extend_from_slice(summary);
        if header.len() % 2 == 1 {
            header.push(0);
        }
        file.write_all(&header)?;

        log::debug!("Created {} ({} byte summary)", path.display(), summary.len());

        Ok(Self {
            path,
            file_name,
            uuid: format!("urn:uuid:{}", Uuid::new_v4()),
            file: Some(file),
            position: header.len() as u64,
            next_ifd_field: 4,
            description_capacity: description_capacity.max(MIN_DESCRIPTION_CAPACITY),
            description_offset: None,
            resolution,
            entries: Vec::new(),
            index: Arc::new(RwLock::new(HashMap::new())),
            writing: Arc::new(AtomicBool::new(true)),
            finished: false,
        })
    }

    /// Append one plane. Returns its zero-based IFD number.
    pub fn append_image(
        &mut self,
        label: ImageLabel,
        pixels: &[u8],
        width: u32,
        height: u32,
        pixel_type: PixelType,
        tags_json: &str,
    ) -> Result<u32, TiffError> {
        if self.finished {
            return Err(TiffError::AlreadyFinished);
        }
        let expected = width as usize * height as usize * pixel_type.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(TiffError::PixelSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let first = self.entries.is_empty();
        let description = first.then_some(self.description_capacity);
        let entry_count = IFD_ENTRIES + u64::from(first);
        let ifd_offset = self.position;
        let rationals = ifd_offset + ifd_size(entry_count);
        let description_offset = rationals + 16;
        let strip_offset = description_offset + description.unwrap_or(0) as u64;
        let tags_offset = strip_offset + pixels.len() as u64;
        let tags_len = tags_json.len() as u64 + 1;
        let end = ifd_offset + plane_block_len(pixels.len(), tags_json.len(), description);
        to_offset(end)?;

        let mut block = Vec::with_capacity((end - ifd_offset) as usize);
        block.write_u16::<LittleEndian>(entry_count as u16)?;
        let mut entry = |tag: TiffTag, field: FieldType, count: u64, value: u64| -> Result<(), TiffError> {
            block.write_u16::<LittleEndian>(tag.id())?;
            block.write_u16::<LittleEndian>(field as u16)?;
            block.write_u32::<LittleEndian>(to_offset(count)?)?;
            block.write_u32::<LittleEndian>(to_offset(value)?)?;
            Ok(())
        };
        entry(TiffTag::ImageWidth, FieldType::Long, 1, width as u64)?;
        entry(TiffTag::ImageLength, FieldType::Long, 1, height as u64)?;
        entry(TiffTag::BitsPerSample, FieldType::Short, 1, pixel_type.bits_per_sample() as u64)?;
        entry(TiffTag::Compression, FieldType::Short, 1, 1)?;
        entry(TiffTag::PhotometricInterpretation, FieldType::Short, 1, 1)?;
        if let Some(capacity) = description {
            entry(TiffTag::ImageDescription, FieldType::Ascii, capacity as u64, description_offset)?;
        }
        entry(TiffTag::StripOffsets, FieldType::Long, 1, strip_offset)?;
        entry(TiffTag::SamplesPerPixel, FieldType::Short, 1, 1)?;
        entry(TiffTag::RowsPerStrip, FieldType::Long, 1, height as u64)?;
        entry(TiffTag::StripByteCounts, FieldType::Long, 1, pixels.len() as u64)?;
        entry(TiffTag::XResolution, FieldType::Rational, 1, rationals)?;
        entry(TiffTag::YResolution, FieldType::Rational, 1, rationals + 8)?;
        entry(TiffTag::ResolutionUnit, FieldType::Short, 1, self.resolution.unit as u64)?;
        entry(TiffTag::MicroManagerMetadata, FieldType::Ascii, tags_len, tags_offset)?;
        block.write_u32::<LittleEndian>(0)?;
        for _ in 0..2 {
            block.write_u32::<LittleEndian>(self.resolution.numerator)?;
            block.write_u32::<LittleEndian>(self.resolution.denominator)?;
        }
        block.resize(block.len() + description.unwrap_or(0), 0);
        block.extend_from_slice(pixels);
        block.extend_from_slice(tags_json.as_bytes());
        block.resize((end - ifd_offset) as usize, 0);

        let next_ifd_field = self.next_ifd_field;
        let file = self.file.as_mut().ok_or(TiffError::Closed)?;
        file.seek(SeekFrom::Start(ifd_offset))?;
        file.write_all(&block)?;
        file.seek(SeekFrom::Start(next_ifd_field))?;
        file.write_u32::<LittleEndian>(ifd_offset as u32)?;

        if first {
            self.description_offset = Some(description_offset);
        }
        self.next_ifd_field = ifd_offset + ifd_size(entry_count) - 4;
        self.position = end;
        let ifd_number = self.entries.len() as u32;
        self.entries.push((label, ifd_offset as u32));
        self.index.write().insert(label, ifd_offset);
        Ok(ifd_number)
    }

    /// Whether appending a plane plus the finish trailer stays within `max_file_size`.
    pub fn has_space_for(&self, pixels_len: usize, tags_len: usize, max_file_size: u64) -> bool {
        let description = self.entries.is_empty().then_some(self.description_capacity);
        let needed = self.position
            + plane_block_len(pixels_len, tags_len, description)
            + trailer_len(self.entries.len() + 1);
        needed <= max_file_size.min(u32::MAX as u64)
    }

    /// Whether the reserved description block holds `len` bytes plus terminator.
    pub fn has_space_for_full_ome_xml(&self, len: usize) -> bool {
        self.description_offset.is_some() && len < self.description_capacity
    }

    /// Overwrite the reserved ImageDescription of the first IFD.
    pub fn write_description(&mut self, text: &str) -> Result<(), TiffError> {
        let offset = self
            .description_offset
            .ok_or(TiffError::MissingTag("ImageDescription"))?;
        if text.len() >= self.description_capacity {
            return Err(TiffError::DescriptionTooLarge {
                len: text.len() + 1,
                capacity: self.description_capacity,
            });
        }
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(self.description_capacity, 0);
        let file = self.file.as_mut().ok_or(TiffError::Closed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Write the index map and empty display/comment blocks, then point the header at them.
    pub fn finish_writing(&mut self) -> Result<(), TiffError> {
        if self.finished {
            return Err(TiffError::AlreadyFinished);
        }
        let index_offset = self.position;
        let mut trailer = Vec::with_capacity(trailer_len(self.entries.len()) as usize);
        trailer.write_u32::<LittleEndian>(INDEX_MAP_HEADER)?;
        trailer.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for (label, offset) in &self.entries {
            trailer.write_u32::<LittleEndian>(label.channel)?;
            trailer.write_u32::<LittleEndian>(label.slice)?;
            trailer.write_u32::<LittleEndian>(label.frame)?;
            trailer.write_u32::<LittleEndian>(label.position)?;
            trailer.write_u32::<LittleEndian>(*offset)?;
        }
        let display_offset = index_offset + trailer.len() as u64;
        trailer.extend(metadata_block(
            DISPLAY_SETTINGS_OFFSET_HEADER,
            MIN_METADATA_BLOCK_RESERVE,
            &[],
        ));
        let comments_offset = index_offset + trailer.len() as u64;
        trailer.extend(metadata_block(
            COMMENTS_OFFSET_HEADER,
            MIN_METADATA_BLOCK_RESERVE,
            &[],
        ));
        let end = index_offset + trailer.len() as u64;
        to_offset(end)?;

        let file = self.file.as_mut().ok_or(TiffError::Closed)?;
        file.seek(SeekFrom::Start(index_offset))?;
        file.write_all(&trailer)?;
        for (slot, offset) in [
            (INDEX_MAP_SLOT, index_offset),
            (DISPLAY_SETTINGS_SLOT, display_offset),
            (COMMENTS_SLOT, comments_offset),
        ] {
            file.seek(SeekFrom::Start(slot + 4))?;
            file.write_u32::<LittleEndian>(offset as u32)?;
        }
        file.sync_data()?;

        self.position = end;
        self.finished = true;
        self.writing.store(false, Ordering::Release);
        log::debug!(
            "Finished {} with {} planes",
            self.file_name,
            self.entries.len()
        );
        Ok(())
    }

    /// Release the file handle. Further writes fail with [`TiffError::Closed`].
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Read view sharing this writer's live index
    pub fn reader(&self) -> Result<TiffReader, TiffError> {
        TiffReader::for_writer(&self.path, Arc::clone(&self.index), Arc::clone(&self.writing))
    }

    /// File name without directory
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Full path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `urn:uuid:` identity of this file
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Planes written so far
    pub fn ifd_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.position
    }

    /// Whether [`finish_writing`](Self::finish_writing) has run
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for TiffWriter {
    fn drop(&mut self) {
        if !self.finished && self.file.is_some() {
            log::warn!(
                "TiffWriter for {} dropped without finish_writing; index map will be rebuilt on open",
                self.file_name
            );
        }
    }
}
