//! Random-access reader for one multi-page file.
//!
//! A reader is either opened from disk ([`TiffReader::open`]) or handed out by
//! a live [`TiffWriter`](super::TiffWriter), in which case it shares the
//! writer's index and sees each plane as soon as it is linked into the file.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{Mutex, RwLock};

use crate::image::TaggedImage;
use crate::label::ImageLabel;
use crate::metadata::{DisplaySettings, ImageTags, OmeDocument, SummaryMetadata};

use super::error::TiffError;
use super::format::{
    word_align, COMMENTS_OFFSET_HEADER, COMMENTS_SLOT, DISPLAY_SETTINGS_OFFSET_HEADER,
    DISPLAY_SETTINGS_SLOT, FIXED_HEADER_SIZE, INDEX_ENTRY_SIZE, INDEX_MAP_HEADER,
    INDEX_MAP_OFFSET_HEADER, MIN_METADATA_BLOCK_RESERVE, SUMMARY_BLOCK_OFFSET, SUMMARY_MD_HEADER,
};
use super::ifd::{parse_header, read_bytes, trim_nul, Ifd};
use super::writer::metadata_block;

/// Label to IFD offset, shared between a writer and its readers
pub(crate) type SharedIndex = Arc<RwLock<HashMap<ImageLabel, u64>>>;

/// Where a reader's label index came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// Maintained by a writer that is (or was) appending to the file
    Live,
    /// Read from the in-file index map
    IndexMap,
    /// Rebuilt by walking the IFD chain
    Recovered,
}

/// Read view of one file
#[derive(Debug)]
pub struct TiffReader {
    path: PathBuf,
    file_name: String,
    file: Mutex<Option<File>>,
    index: SharedIndex,
    writing: Arc<AtomicBool>,
    source: IndexSource,
    planes: usize,
}

impl TiffReader {
    /// Open an existing file read-only and load its index.
    ///
    /// A missing or corrupt index map is not an error: the index is rebuilt
    /// from the IFD chain, stopping at the first incomplete plane.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TiffError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();
        let header = read_bytes(&mut file, 0, FIXED_HEADER_SIZE, size)?;
        let first_ifd = parse_header(&header)?;
        if LittleEndian::read_u32(&header[32..36]) != SUMMARY_MD_HEADER {
            return Err(TiffError::MissingSummaryHeader);
        }
        let file_name = file_name_of(&path);

        let (entries, source) = match read_index_map(&mut file, &header, size) {
            Ok(Some(entries)) => (entries, IndexSource::IndexMap),
            Ok(None) => {
                log::info!("{} has no index map, rebuilding from IFD chain", file_name);
                (recover_index(&mut file, first_ifd, size, &file_name), IndexSource::Recovered)
            }
            Err(e) => {
                log::warn!("{}: {}; rebuilding from IFD chain", file_name, e);
                (recover_index(&mut file, first_ifd, size, &file_name), IndexSource::Recovered)
            }
        };
        let planes = entries.len();
        let index: HashMap<_, _> = entries.into_iter().collect();
        if index.len() != planes {
            log::warn!(
                "{} lists {} planes but only {} distinct labels",
                file_name,
                planes,
                index.len()
            );
        }

        Ok(Self {
            path,
            file_name,
            file: Mutex::new(Some(file)),
            index: Arc::new(RwLock::new(index)),
            writing: Arc::new(AtomicBool::new(false)),
            source,
            planes,
        })
    }

    pub(crate) fn for_writer(
        path: &Path,
        index: SharedIndex,
        writing: Arc<AtomicBool>,
    ) -> Result<Self, TiffError> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file_name: file_name_of(path),
            file: Mutex::new(Some(file)),
            index,
            writing,
            source: IndexSource::Live,
            planes: 0,
        })
    }

    fn with_file<T>(
        &self,
        f: impl FnOnce(&mut File, u64) -> Result<T, TiffError>,
    ) -> Result<T, TiffError> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(TiffError::Closed)?;
        let size = file.metadata()?.len();
        f(file, size)
    }

    fn ifd_offset(&self, label: &ImageLabel) -> Result<u64, TiffError> {
        self.index
            .read()
            .get(label)
            .copied()
            .ok_or(TiffError::ImageNotFound(*label))
    }

    /// Full path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Where the label index came from
    pub fn index_source(&self) -> IndexSource {
        self.source
    }

    /// Entries found while loading the index, duplicates included
    pub fn indexed_planes(&self) -> usize {
        match self.source {
            IndexSource::Live => self.index.read().len(),
            _ => self.planes,
        }
    }

    /// Whether a writer is still appending to this file
    pub fn is_writing(&self) -> bool {
        self.writing.load(Ordering::Acquire)
    }

    /// Labels of every plane, unordered
    pub fn labels(&self) -> Vec<ImageLabel> {
        self.index.read().keys().copied().collect()
    }

    /// Whether a plane with this label exists
    pub fn contains(&self, label: &ImageLabel) -> bool {
        self.index.read().contains_key(label)
    }

    /// Number of distinct labels
    pub fn num_images(&self) -> usize {
        self.index.read().len()
    }

    /// Current file size on disk
    pub fn file_size(&self) -> Result<u64, TiffError> {
        self.with_file(|_, size| Ok(size))
    }

    /// Read pixels and tags of one plane
    pub fn read_image(&self, label: &ImageLabel) -> Result<TaggedImage, TiffError> {
        let offset = self.ifd_offset(label)?;
        self.with_file(|file, size| {
            let layout = Ifd::read(file, offset, size)?.layout(size)?;
            let pixels = read_bytes(file, layout.strip_offset, layout.strip_len, size)?;
            let tags = layout.read_tags(file, size)?;
            Ok(TaggedImage::new(pixels, tags))
        })
    }

    /// Read only the tags of one plane
    pub fn read_tags(&self, label: &ImageLabel) -> Result<ImageTags, TiffError> {
        let offset = self.ifd_offset(label)?;
        self.with_file(|file, size| {
            let layout = Ifd::read(file, offset, size)?.layout(size)?;
            layout.read_tags(file, size)
        })
    }

    /// Summary metadata written when the file was created
    pub fn summary_metadata(&self) -> Result<SummaryMetadata, TiffError> {
        self.with_file(|file, size| {
            let head = read_bytes(file, SUMMARY_BLOCK_OFFSET, 8, size)?;
            if LittleEndian::read_u32(&head[..4]) != SUMMARY_MD_HEADER {
                return Err(TiffError::MissingSummaryHeader);
            }
            let len = LittleEndian::read_u32(&head[4..]) as u64;
            let raw = read_bytes(file, SUMMARY_BLOCK_OFFSET + 8, len, size)?;
            Ok(SummaryMetadata::from_json(&String::from_utf8_lossy(&raw))?)
        })
    }

    /// Display settings and comments, empty when never written
    pub fn display_and_comments(&self) -> Result<DisplaySettings, TiffError> {
        let (channels, comments) = self.with_file(|file, size| {
            let channels = read_block(file, DISPLAY_SETTINGS_SLOT, DISPLAY_SETTINGS_OFFSET_HEADER, size)?;
            let comments = read_block(file, COMMENTS_SLOT, COMMENTS_OFFSET_HEADER, size)?;
            Ok((channels, comments))
        })?;
        Ok(DisplaySettings::from_blocks(
            channels.as_deref(),
            comments.as_deref(),
        )?)
    }

    /// Raw ImageDescription of the first IFD, empty when there is none
    pub fn ome_xml(&self) -> Result<String, TiffError> {
        self.with_file(|file, size| read_description(file, size))
    }

    /// The full OME-XML document for the dataset, following a pointer if needed.
    ///
    /// Returns `None` when this file holds no description yet or the pointer
    /// target does not hold a full document.
    pub fn resolve_ome_xml(&self, directory: &Path) -> Result<Option<String>, TiffError> {
        let xml = self.ome_xml()?;
        match OmeDocument::classify(&xml)? {
            OmeDocument::Empty => Ok(None),
            OmeDocument::Full => Ok(Some(xml)),
            OmeDocument::Pointer(target) => {
                if target.file_name == self.file_name {
                    log::warn!("{} points at itself", self.file_name);
                    return Ok(None);
                }
                let path = directory.join(&target.file_name);
                if is_tiff_name(&target.file_name) {
                    let mut master = File::open(&path)?;
                    let size = master.metadata()?.len();
                    let header = read_bytes(&mut master, 0, FIXED_HEADER_SIZE, size)?;
                    parse_header(&header)?;
                    let xml = read_description(&mut master, size)?;
                    match OmeDocument::classify(&xml)? {
                        OmeDocument::Full => Ok(Some(xml)),
                        _ => Ok(None),
                    }
                } else {
                    Ok(Some(std::fs::read_to_string(path)?))
                }
            }
        }
    }

    /// Replace the display settings block.
    pub fn rewrite_display_settings(&self, settings: &DisplaySettings) -> Result<(), TiffError> {
        let json = settings.channels_json()?;
        self.rewrite_block(DISPLAY_SETTINGS_SLOT, DISPLAY_SETTINGS_OFFSET_HEADER, json.as_bytes())
    }

    /// Replace the comments block.
    pub fn rewrite_comments(&self, settings: &DisplaySettings) -> Result<(), TiffError> {
        let json = settings.comments_json()?;
        self.rewrite_block(COMMENTS_SLOT, COMMENTS_OFFSET_HEADER, json.as_bytes())
    }

    fn rewrite_block(&self, slot: u64, header: u32, payload: &[u8]) -> Result<(), TiffError> {
        if self.is_writing() {
            return Err(TiffError::StillWriting);
        }
        let existing = self.with_file(|file, size| {
            let slot_bytes = read_bytes(file, slot, 8, size)?;
            let pointer = LittleEndian::read_u32(&slot_bytes[4..]) as u64;
            if pointer == 0 {
                return Ok(None);
            }
            let head = read_bytes(file, pointer, 8, size)?;
            if LittleEndian::read_u32(&head[..4]) != header {
                return Ok(None);
            }
            Ok(Some((pointer, LittleEndian::read_u32(&head[4..]) as usize)))
        })?;

        let mut out = OpenOptions::new().write(true).open(&self.path)?;
        match existing {
            Some((offset, reserved)) if payload.len() <= reserved => {
                let mut bytes = payload.to_vec();
                bytes.resize(reserved, 0);
                out.seek(SeekFrom::Start(offset + 8))?;
                out.write_all(&bytes)?;
            }
            _ => {
                let end = word_align(out.seek(SeekFrom::End(0))?);
                let reserved = (payload.len() as u32).max(MIN_METADATA_BLOCK_RESERVE);
                let block = metadata_block(header, reserved, payload);
                let block_offset =
                    u32::try_from(end).map_err(|_| TiffError::FileTooLarge)?;
                u32::try_from(end + block.len() as u64).map_err(|_| TiffError::FileTooLarge)?;
                out.seek(SeekFrom::Start(end))?;
                out.write_all(&block)?;
                out.seek(SeekFrom::Start(slot + 4))?;
                out.write_all(&block_offset.to_le_bytes())?;
                log::debug!(
                    "Relocated metadata block {} of {} to offset {}",
                    header,
                    self.file_name,
                    end
                );
            }
        }
        out.sync_data()?;
        Ok(())
    }

    /// Overwrite the pixels of an existing plane. Tags and index are untouched.
    pub fn overwrite_pixels(&self, label: &ImageLabel, pixels: &[u8]) -> Result<(), TiffError> {
        let offset = self.ifd_offset(label)?;
        let layout = self.with_file(|file, size| Ifd::read(file, offset, size)?.layout(size))?;
        if pixels.len() as u64 != layout.strip_len {
            return Err(TiffError::PixelSizeMismatch {
                expected: layout.strip_len as usize,
                actual: pixels.len(),
            });
        }
        let mut out = OpenOptions::new().write(true).open(&self.path)?;
        out.seek(SeekFrom::Start(layout.strip_offset))?;
        out.write_all(pixels)?;
        out.flush()?;
        Ok(())
    }

    /// Release the file handle. Safe to call more than once.
    pub fn close(&self) {
        self.file.lock().take();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn is_tiff_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tif") || lower.ends_with(".tiff")
}

fn read_description<R: Read + Seek>(file: &mut R, size: u64) -> Result<String, TiffError> {
    let head = read_bytes(file, 0, 8, size)?;
    let first_ifd = parse_header(&head)?;
    if first_ifd == 0 {
        return Ok(String::new());
    }
    let layout = Ifd::read(file, first_ifd, size)?.layout(size)?;
    match layout.description {
        Some((offset, len)) => {
            let raw = read_bytes(file, offset, len, size)?;
            Ok(String::from_utf8_lossy(trim_nul(&raw)).into_owned())
        }
        None => Ok(String::new()),
    }
}

fn read_block<R: Read + Seek>(
    file: &mut R,
    slot: u64,
    header: u32,
    size: u64,
) -> Result<Option<String>, TiffError> {
    let slot_bytes = read_bytes(file, slot, 8, size)?;
    let pointer = LittleEndian::read_u32(&slot_bytes[4..]) as u64;
    if pointer == 0 {
        return Ok(None);
    }
    let head = read_bytes(file, pointer, 8, size)?;
    if LittleEndian::read_u32(&head[..4]) != header {
        log::warn!("Metadata block at {} has wrong header, ignoring", pointer);
        return Ok(None);
    }
    let reserved = LittleEndian::read_u32(&head[4..]) as u64;
    let raw = read_bytes(file, pointer + 8, reserved, size)?;
    let text = String::from_utf8_lossy(trim_nul(&raw)).into_owned();
    Ok((!text.is_empty()).then_some(text))
}

fn read_index_map<R: Read + Seek>(
    file: &mut R,
    header: &[u8],
    size: u64,
) -> Result<Option<Vec<(ImageLabel, u64)>>, TiffError> {
    if LittleEndian::read_u32(&header[8..12]) != INDEX_MAP_OFFSET_HEADER {
        return Err(TiffError::CorruptIndexMap("missing index map slot marker".to_string()));
    }
    let pointer = LittleEndian::read_u32(&header[12..16]) as u64;
    if pointer == 0 {
        return Ok(None);
    }
    let head = read_bytes(file, pointer, 8, size)
        .map_err(|e| TiffError::CorruptIndexMap(e.to_string()))?;
    if LittleEndian::read_u32(&head[..4]) != INDEX_MAP_HEADER {
        return Err(TiffError::CorruptIndexMap(format!(
            "bad header at offset {}",
            pointer
        )));
    }
    let count = LittleEndian::read_u32(&head[4..]) as u64;
    let body = read_bytes(file, pointer + 8, count * INDEX_ENTRY_SIZE, size)
        .map_err(|e| TiffError::CorruptIndexMap(e.to_string()))?;

    let mut entries = Vec::with_capacity(count as usize);
    for chunk in body.chunks_exact(INDEX_ENTRY_SIZE as usize) {
        let label = ImageLabel::new(
            LittleEndian::read_u32(&chunk[0..4]),
            LittleEndian::read_u32(&chunk[4..8]),
            LittleEndian::read_u32(&chunk[8..12]),
            LittleEndian::read_u32(&chunk[12..16]),
        );
        let offset = LittleEndian::read_u32(&chunk[16..20]) as u64;
        if offset < FIXED_HEADER_SIZE || offset >= size {
            return Err(TiffError::CorruptIndexMap(format!(
                "entry {} points outside the file",
                label
            )));
        }
        entries.push((label, offset));
    }
    Ok(Some(entries))
}

fn recover_index<R: Read + Seek>(
    file: &mut R,
    first_ifd: u64,
    size: u64,
    file_name: &str,
) -> Vec<(ImageLabel, u64)> {
    let mut visited = HashSet::new();
    let mut entries = Vec::new();
    let mut offset = first_ifd;
    while offset != 0 {
        if !visited.insert(offset) {
            log::warn!("{}: IFD chain loops back to {}", file_name, offset);
            break;
        }
        let ifd = match Ifd::read(file, offset, size) {
            Ok(ifd) => ifd,
            Err(e) => {
                log::warn!("{}: stopping recovery at IFD {}: {}", file_name, offset, e);
                break;
            }
        };
        let tags = ifd.layout(size).and_then(|layout| layout.read_tags(file, size));
        match tags {
            Ok(tags) => match tags.label() {
                Ok(label) => entries.push((label, offset)),
                Err(e) => log::warn!("{}: IFD {} has no usable label: {}", file_name, offset, e),
            },
            Err(e) => {
                log::warn!("{}: stopping recovery at IFD {}: {}", file_name, offset, e);
                break;
            }
        }
        offset = ifd.next_ifd;
    }
    log::info!("{}: recovered {} planes", file_name, entries.len());
    entries
}
