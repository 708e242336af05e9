//! Files holding the planes of one stage position (or of the whole dataset).
//!
//! A file set writes into its current segment until the next plane would push
//! it past `max_file_size`, then finishes that segment and rolls over to
//! `{stem}_{n}.ome.tif`. The OME-XML description of every segment is filled in
//! only when the set is finished: the current segment receives the full
//! document (or a pointer), earlier segments always receive the pointer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::image::{PlaneGeometry, TaggedImage};
use crate::label::ImageLabel;
use crate::metadata::{keys, FileRef, ImageTags, PlaneRecord};
use crate::tiff::{Resolution, TiffReader, TiffWriter};

use super::config::StorageConfig;
use super::error::StorageError;
use super::metadata_file::MetadataFile;

/// Outcome of one successful plane write
#[derive(Debug, Clone)]
pub struct WrittenPlane {
    /// Label of the plane
    pub label: ImageLabel,
    /// Geometry of the plane
    pub geometry: PlaneGeometry,
    /// Tags as stored
    pub tags: ImageTags,
    /// Reader of the segment holding the plane
    pub reader: Arc<TiffReader>,
    /// OME-XML record of the plane
    pub record: PlaneRecord,
}

struct Segment {
    writer: TiffWriter,
    reader: Arc<TiffReader>,
}

/// Planes written so far for the highest frame of one position
#[derive(Debug, Clone)]
struct LastFrame {
    frame: u32,
    planes: BTreeSet<(u32, u32)>,
    geometry: PlaneGeometry,
    position_name: Option<String>,
}

/// Segments of one position, or of the whole dataset when not splitting
pub struct FileSet {
    directory: PathBuf,
    stem: String,
    summary_json: String,
    description_capacity: usize,
    max_file_size: u64,
    resolution: Resolution,
    segments: Vec<Segment>,
    metadata_file: Option<MetadataFile>,
    separate_metadata_file: bool,
    last_frames: BTreeMap<u32, LastFrame>,
    finished: bool,
}

impl FileSet {
    /// Stem of the first segment: `{prefix}_MMStack[_Pos{p}]`
    pub fn stem_for(prefix: &str, position: Option<u32>) -> String {
        let prefix = if prefix.is_empty() { "images" } else { prefix };
        match position {
            Some(p) => format!("{}_MMStack_Pos{}", prefix, p),
            None => format!("{}_MMStack", prefix),
        }
    }

    /// File set writing under `stem`. Nothing touches the disk until the first plane.
    pub fn new(
        config: &StorageConfig,
        stem: String,
        summary_json: String,
        pixel_size_um: Option<f64>,
    ) -> Self {
        Self {
            directory: config.directory.clone(),
            stem,
            summary_json,
            description_capacity: config.description_capacity(),
            max_file_size: config.max_file_size,
            resolution: Resolution::from_pixel_size_um(pixel_size_um),
            segments: Vec::new(),
            metadata_file: None,
            separate_metadata_file: config.separate_metadata_file,
            last_frames: BTreeMap::new(),
            finished: false,
        }
    }

    fn segment_path(&self, part: usize) -> PathBuf {
        if part == 0 {
            self.directory.join(format!("{}.ome.tif", self.stem))
        } else {
            self.directory.join(format!("{}_{}.ome.tif", self.stem, part))
        }
    }

    /// Finish the current segment (if any) and open the next one.
    fn rotate_file(&mut self) -> Result<(), StorageError> {
        if let Some(current) = self.segments.last_mut() {
            if !current.writer.is_finished() {
                current.writer.finish_writing()?;
            }
            log::info!(
                "Rolling over from {} after {} planes",
                current.writer.file_name(),
                current.writer.ifd_count()
            );
        }
        let path = self.segment_path(self.segments.len());
        let writer = TiffWriter::create(
            &path,
            &self.summary_json,
            self.description_capacity,
            self.resolution,
        )?;
        let reader = Arc::new(writer.reader()?);
        self.segments.push(Segment { writer, reader });
        Ok(())
    }

    /// Append a validated plane, rolling over first when it would not fit.
    pub fn write_image(
        &mut self,
        label: ImageLabel,
        image: &TaggedImage,
        geometry: PlaneGeometry,
    ) -> Result<WrittenPlane, StorageError> {
        if self.finished {
            return Err(StorageError::ReadOnly);
        }
        let tags_json = image.tags.to_json()?;

        let needs_rotation = match self.segments.last() {
            None => true,
            Some(current) => {
                current.writer.ifd_count() > 0
                    && !current
                        .writer
                        .has_space_for(image.pixels.len(), tags_json.len(), self.max_file_size)
            }
        };
        if needs_rotation {
            self.rotate_file()?;
        }
        if self.separate_metadata_file && self.metadata_file.is_none() {
            let path = self.directory.join(format!("{}_metadata.txt", self.stem));
            self.metadata_file = Some(MetadataFile::create(path, &self.summary_json)?);
        }

        let current = self
            .segments
            .last_mut()
            .ok_or_else(|| StorageError::BackgroundWriterError("no open segment".to_string()))?;
        let ifd = current.writer.append_image(
            label,
            &image.pixels,
            geometry.width,
            geometry.height,
            geometry.pixel_type,
            &tags_json,
        )?;
        let file = FileRef {
            file_name: current.writer.file_name().to_string(),
            uuid: current.writer.uuid().to_string(),
        };
        let reader = Arc::clone(&current.reader);

        if let Some(metadata_file) = self.metadata_file.as_mut() {
            if let Err(e) = metadata_file.add(&label, &image.tags) {
                log::warn!("Could not append {} to metadata file: {}", label, e);
            }
        }
        self.track_last_frame(label, geometry, &image.tags);

        Ok(WrittenPlane {
            label,
            geometry,
            tags: image.tags.clone(),
            reader,
            record: PlaneRecord::from_tags(file, ifd, &image.tags),
        })
    }

    fn track_last_frame(&mut self, label: ImageLabel, geometry: PlaneGeometry, tags: &ImageTags) {
        let fresh = || LastFrame {
            frame: label.frame,
            planes: BTreeSet::new(),
            geometry,
            position_name: tags.position_name().map(str::to_string),
        };
        let last = self.last_frames.entry(label.position).or_insert_with(&fresh);
        if label.frame > last.frame {
            *last = fresh();
        }
        if label.frame == last.frame {
            last.planes.insert((label.channel, label.slice));
        }
    }

    /// Highest frame written for `position`
    pub fn current_frame(&self, position: u32) -> Option<u32> {
        self.last_frames.get(&position).map(|last| last.frame)
    }

    /// Positions with at least one plane in this set
    pub fn positions(&self) -> Vec<u32> {
        self.last_frames.keys().copied().collect()
    }

    /// Complete a partially written last frame with blank planes.
    ///
    /// For every position whose highest frame lacks some `(channel, slice)`
    /// combination out of `channels x slices`, a zero-filled plane tagged
    /// `"Filler": true` is written for each missing one.
    pub fn finish_aborted_acq_if_needed(
        &mut self,
        channels: u32,
        slices: u32,
    ) -> Result<Vec<WrittenPlane>, StorageError> {
        let mut missing = Vec::new();
        for (&position, last) in &self.last_frames {
            for c in 0..channels {
                for z in 0..slices {
                    if !last.planes.contains(&(c, z)) {
                        missing.push((
                            ImageLabel::new(c, z, last.frame, position),
                            last.geometry,
                            last.position_name.clone(),
                        ));
                    }
                }
            }
        }
        if !missing.is_empty() {
            log::info!(
                "{}: completing aborted frame with {} blank planes",
                self.stem,
                missing.len()
            );
        }

        let mut written = Vec::with_capacity(missing.len());
        for (label, geometry, position_name) in missing {
            let mut image = TaggedImage::blank(label, geometry.width, geometry.height, geometry.pixel_type);
            image.tags.insert(keys::FILLER, true);
            if let Some(name) = position_name {
                image.tags.insert(keys::POSITION_NAME, name);
            }
            written.push(self.write_image(label, &image, geometry)?);
        }
        Ok(written)
    }

    /// Whether the current segment can hold a description of `len` bytes
    pub fn has_space_for_full_ome_xml(&self, len: usize) -> bool {
        self.segments
            .last()
            .is_some_and(|current| current.writer.has_space_for_full_ome_xml(len))
    }

    /// File reference of the current segment
    pub fn current_file(&self) -> Option<FileRef> {
        self.segments.last().map(|current| FileRef {
            file_name: current.writer.file_name().to_string(),
            uuid: current.writer.uuid().to_string(),
        })
    }

    /// Write the final descriptions, index maps, and metadata file.
    ///
    /// `current_description` goes into the current segment, `pointer` into
    /// every earlier one. Every segment is attempted; the first error is returned.
    pub fn finished(&mut self, current_description: &str, pointer: &str) -> Result<(), StorageError> {
        if self.finished {
            return Ok(());
        }
        let mut first_error = None;
        let last = self.segments.len().saturating_sub(1);
        for (i, segment) in self.segments.iter_mut().enumerate() {
            let description = if i == last { current_description } else { pointer };
            let result = segment
                .writer
                .write_description(description)
                .and_then(|_| {
                    if segment.writer.is_finished() {
                        Ok(())
                    } else {
                        segment.writer.finish_writing()
                    }
                });
            if let Err(e) = result {
                log::error!("Finishing {} failed: {}", segment.writer.file_name(), e);
                if first_error.is_none() {
                    first_error = Some(StorageError::from(e));
                }
            }
            segment.writer.close();
        }
        if let Some(metadata_file) = self.metadata_file.as_mut() {
            if let Err(e) = metadata_file.finish() {
                log::error!("Closing {} failed: {}", metadata_file.path().display(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        self.finished = true;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Readers of every segment, oldest first
    pub fn readers(&self) -> Vec<Arc<TiffReader>> {
        self.segments.iter().map(|s| Arc::clone(&s.reader)).collect()
    }

    /// Number of physical files
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Bytes written across all segments
    pub fn bytes_written(&self) -> u64 {
        self.segments.iter().map(|s| s.writer.size()).sum()
    }

    /// Whether [`finished`](Self::finished) has run
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Directory the set writes into
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
