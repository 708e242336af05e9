use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::image::{PlaneGeometry, TaggedImage};
use crate::label::{Coords, ImageLabel};
use crate::metadata::{
    pointer_to_master, DisplaySettings, FileRef, ImageTags, MetadataError, OmeMetadataBuilder,
    SummaryMetadata,
};
use crate::tiff::{is_tiff_name, TiffError, TiffReader};

use super::config::StorageConfig;
use super::error::StorageError;
use super::fileset::{FileSet, WrittenPlane};
use super::index::LabelIndex;
use super::worker::WriteWorker;
use super::ImageStorage;

/// File name of the standalone OME-XML document used when no file has room
pub const SIDECAR_FILE_NAME: &str = "OMEXMLMetadata.ome";

/// Highest frame and position stored, updated from the write thread
#[derive(Debug, Default)]
struct Counters {
    last_frame: AtomicU32,
    last_position: AtomicU32,
}

/// State touched only on the write thread (and by `finished` after it stops)
struct WriteState {
    filesets: BTreeMap<u32, FileSet>,
    ome: OmeMetadataBuilder,
    summary: SummaryMetadata,
    summary_json: String,
}

impl WriteState {
    fn write_image(
        &mut self,
        config: &StorageConfig,
        label: ImageLabel,
        image: &TaggedImage,
        geometry: PlaneGeometry,
    ) -> Result<WrittenPlane, StorageError> {
        let key = if config.split_by_position {
            label.position
        } else {
            0
        };
        let fileset = match self.filesets.entry(key) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                let position = config.split_by_position.then_some(key);
                let stem = FileSet::stem_for(&self.summary.prefix, position);
                log::debug!("Opening file set {}", stem);
                e.insert(FileSet::new(
                    config,
                    stem,
                    self.summary_json.clone(),
                    self.summary.pixel_size_um,
                ))
            }
        };
        fileset.write_image(label, image, geometry)
    }
}

/// Register a written plane for reads and in the OME document.
fn register_plane(
    index: &RwLock<LabelIndex>,
    ome: &mut OmeMetadataBuilder,
    counters: &Counters,
    plane: WrittenPlane,
) {
    let label = plane.label;
    if !index.write().register(label, &plane.reader) {
        log::warn!("{} was indexed twice; keeping the first copy", label);
    }
    ome.add_plane(
        label,
        plane.geometry.width,
        plane.geometry.height,
        plane.geometry.pixel_type,
        &plane.tags,
        plane.record,
    );
    counters.last_frame.fetch_max(label.frame, Ordering::AcqRel);
    counters.last_position.fetch_max(label.position, Ordering::AcqRel);
}

/// Engine state guarded by the dataset-wide lock
struct EngineState {
    worker: Option<WriteWorker>,
    display: DisplaySettings,
}

/// Multi-file image store for one acquisition.
///
/// All methods take `&self`; the engine can be shared between a producer thread
/// calling [`put_image`](ImageStorage::put_image) and any number of readers.
pub struct StorageEngine {
    config: Arc<StorageConfig>,
    writable: AtomicBool,
    finished: AtomicBool,
    state: Mutex<EngineState>,
    summary: RwLock<SummaryMetadata>,
    write: Arc<Mutex<WriteState>>,
    index: Arc<RwLock<LabelIndex>>,
    submitted: Arc<Mutex<HashSet<ImageLabel>>>,
    counters: Arc<Counters>,
}

impl StorageEngine {
    /// Create a new dataset or open an existing one, per `config.new_dataset`.
    ///
    /// `summary` is ignored when opening.
    pub fn new(config: StorageConfig, summary: SummaryMetadata) -> Result<Self, StorageError> {
        if config.new_dataset {
            Self::create(config, summary)
        } else {
            Self::open_with_config(config)
        }
    }

    /// Start a new, writable dataset in `config.directory`.
    pub fn create(config: StorageConfig, summary: SummaryMetadata) -> Result<Self, StorageError> {
        config.validate()?;
        fs::create_dir_all(&config.directory)?;
        let summary_json = summary.to_json()?;
        let display = if summary.channel_names.is_empty() {
            DisplaySettings::default()
        } else {
            DisplaySettings::for_channels(summary.channel_names.iter())
        };
        let worker = WriteWorker::spawn()?;
        log::info!(
            "Created dataset {} (prefix {:?}, split by position: {})",
            config.directory.display(),
            summary.prefix,
            config.split_by_position
        );

        Ok(Self {
            index: Arc::new(RwLock::new(LabelIndex::new(summary.ordering()))),
            summary: RwLock::new(summary.clone()),
            write: Arc::new(Mutex::new(WriteState {
                filesets: BTreeMap::new(),
                ome: OmeMetadataBuilder::new(summary.clone()),
                summary,
                summary_json,
            })),
            state: Mutex::new(EngineState {
                worker: Some(worker),
                display,
            }),
            config: Arc::new(config),
            writable: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            submitted: Arc::new(Mutex::new(HashSet::new())),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Open an existing dataset directory read-only.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_config(StorageConfig::open_existing(directory))
    }

    /// Open an existing dataset read-only with a custom progress sink.
    ///
    /// Files that cannot be read are logged and skipped; opening fails only when
    /// no file is usable.
    pub fn open_with_config(config: StorageConfig) -> Result<Self, StorageError> {
        let directory = config.directory.clone();
        let mut paths: Vec<PathBuf> = fs::read_dir(&directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .is_some_and(|name| is_tiff_name(&name.to_string_lossy()))
            })
            .collect();
        paths.sort();

        config.progress.start("Scanning dataset files", paths.len());
        let mut readers = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            match TiffReader::open(path) {
                Ok(reader) => readers.push(Arc::new(reader)),
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
            config.progress.tick(i + 1);
        }
        config.progress.finish();
        if readers.is_empty() {
            return Err(StorageError::NoUsableFiles(directory.display().to_string()));
        }

        let summary = readers
            .iter()
            .find_map(|reader| match reader.summary_metadata() {
                Ok(summary) => Some(summary),
                Err(e) => {
                    log::warn!("No summary in {}: {}", reader.file_name(), e);
                    None
                }
            })
            .unwrap_or_default();
        let display = readers
            .iter()
            .filter_map(|reader| reader.display_and_comments().ok())
            .find(|settings| *settings != DisplaySettings::default())
            .unwrap_or_default();

        let counters = Counters::default();
        let mut index = LabelIndex::new(summary.ordering());
        for reader in &readers {
            for label in reader.labels() {
                if index.register(label, reader) {
                    counters.last_frame.fetch_max(label.frame, Ordering::AcqRel);
                    counters.last_position.fetch_max(label.position, Ordering::AcqRel);
                } else {
                    log::warn!(
                        "{} appears in more than one file; ignoring copy in {}",
                        label,
                        reader.file_name()
                    );
                }
            }
        }
        log::info!(
            "Opened dataset {}: {} images in {} files",
            directory.display(),
            index.len(),
            readers.len()
        );

        let summary_json = summary.to_json()?;
        Ok(Self {
            index: Arc::new(RwLock::new(index)),
            summary: RwLock::new(summary.clone()),
            write: Arc::new(Mutex::new(WriteState {
                filesets: BTreeMap::new(),
                ome: OmeMetadataBuilder::new(summary.clone()),
                summary,
                summary_json,
            })),
            state: Mutex::new(EngineState {
                worker: None,
                display,
            }),
            config: Arc::new(StorageConfig {
                new_dataset: false,
                ..config
            }),
            writable: AtomicBool::new(false),
            finished: AtomicBool::new(true),
            submitted: Arc::new(Mutex::new(HashSet::new())),
            counters: Arc::new(counters),
        })
    }

    /// Whether `put_image` is currently accepted
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    fn label_of(tags: &mut ImageTags) -> ImageLabel {
        let index = |result: Result<u32, MetadataError>, what: &str| {
            result.unwrap_or_else(|e| {
                log::warn!("Malformed {} in image tags ({}); using 0", what, e);
                0
            })
        };
        let label = ImageLabel::new(
            index(tags.channel_index(), "channel"),
            index(tags.slice_index(), "slice"),
            index(tags.frame_index(), "frame"),
            index(tags.position_index(), "position"),
        );
        tags.set_label(label);
        label
    }

    fn submit(&self, image: TaggedImage, wait: bool) -> Result<(), StorageError> {
        if !self.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        let mut image = image;
        let geometry = image.validate()?;
        let label = Self::label_of(&mut image.tags);

        let state = self.state.lock();
        let worker = match state.worker.as_ref() {
            Some(worker) if self.is_writable() => worker,
            _ => return Err(StorageError::ReadOnly),
        };
        if !self.submitted.lock().insert(label) {
            return Err(StorageError::DuplicateImage(label));
        }

        let config = Arc::clone(&self.config);
        let write = Arc::clone(&self.write);
        let index = Arc::clone(&self.index);
        let submitted = Arc::clone(&self.submitted);
        let counters = Arc::clone(&self.counters);
        let job = Box::new(move || {
            let mut write = write.lock();
            match write.write_image(&config, label, &image, geometry) {
                Ok(plane) => {
                    register_plane(&index, &mut write.ome, &counters, plane);
                    Ok(())
                }
                Err(e) => {
                    submitted.lock().remove(&label);
                    Err(e)
                }
            }
        });
        if let Err(e) = worker.submit(job) {
            self.submitted.lock().remove(&label);
            return Err(e);
        }
        if wait {
            worker.barrier()?;
        }
        Ok(())
    }

    /// Write the current display settings and comments into every file.
    ///
    /// Allowed on finished and read-only datasets; fails with
    /// [`TiffError::StillWriting`] while an acquisition is running.
    pub fn write_display_settings(&self) -> Result<(), StorageError> {
        let display = self.state.lock().display.clone();
        let mut first_error = None;
        for reader in self.index.read().readers() {
            let result = reader
                .rewrite_display_settings(&display)
                .and_then(|_| reader.rewrite_comments(&display));
            if let Err(e) = result {
                log::error!("Writing display settings to {} failed: {}", reader.file_name(), e);
                if first_error.is_none() {
                    first_error = Some(StorageError::from(e));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Every stored label, in dataset order
    pub fn image_keys(&self) -> Vec<ImageLabel> {
        self.index.read().labels()
    }

    /// Number of stored images
    pub fn num_images(&self) -> usize {
        self.index.read().len()
    }

    /// Largest channel, slice, frame, and position stored
    pub fn max_indices(&self) -> Option<ImageLabel> {
        self.index.read().max_indices()
    }

    /// Highest frame stored so far; never decreases
    pub fn last_acquired_frame(&self) -> u32 {
        self.counters.last_frame.load(Ordering::Acquire)
    }

    /// Highest position stored so far; never decreases
    pub fn last_acquired_position(&self) -> u32 {
        self.counters.last_position.load(Ordering::Acquire)
    }

    /// Dataset directory
    pub fn disk_location(&self) -> &Path {
        &self.config.directory
    }

    /// Total bytes of every file in the dataset directory
    pub fn data_set_size(&self) -> u64 {
        let entries = match fs::read_dir(&self.config.directory) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot list {}: {}", self.config.directory.display(), e);
                return 0;
            }
        };
        entries
            .filter_map(|entry| entry.ok()?.metadata().ok())
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len())
            .sum()
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn finalize(&self, state: &mut EngineState) -> Option<StorageError> {
        let mut first_error: Option<StorageError> = None;
        let mut record = |e: StorageError, step: &str| {
            log::error!("Finishing dataset: {} failed: {}", step, e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        };

        if let Some(mut worker) = state.worker.take() {
            match worker.shutdown() {
                Ok(jobs) => log::debug!("Write queue drained after {} writes", jobs),
                Err(e) => record(e, "draining write queue"),
            }
        }

        let mut write = self.write.lock();
        let WriteState { filesets, ome, .. } = &mut *write;
        let report = &self.config.progress;
        report.start("Finishing dataset", filesets.len());

        // (1) complete a partially written last frame
        if self.config.complete_aborted_frames {
            let (channels, slices) = (ome.num_channels(), ome.num_slices());
            for fileset in filesets.values_mut() {
                match fileset.finish_aborted_acq_if_needed(channels, slices) {
                    Ok(planes) => {
                        for plane in planes {
                            register_plane(&self.index, ome, &self.counters, plane);
                        }
                    }
                    Err(e) => record(e, "completing aborted frame"),
                }
            }
        }

        // (2) declared frame counts and placeholders
        let last_frame = self.counters.last_frame.load(Ordering::Acquire);
        let mut current_frames = BTreeMap::new();
        for fileset in filesets.values() {
            for position in fileset.positions() {
                if let Some(frame) = fileset.current_frame(position) {
                    let entry = current_frames.entry(position).or_insert(frame);
                    *entry = (*entry).max(frame);
                }
            }
        }
        for (&position, &frame) in &current_frames {
            ome.set_num_frames(position, frame + 1);
            let added = ome.fill_in_missing_tiff_datas(last_frame, position);
            if added > 0 {
                log::info!("Position {}: {} placeholder planes in OME-XML", position, added);
            }
        }

        // (3) master selection, (4) sidecar fallback
        let xml = match ome.serialize() {
            Ok(xml) => Some(xml),
            Err(e) => {
                record(e.into(), "serializing OME-XML");
                None
            }
        };
        let master = xml.as_ref().and_then(|xml| {
            filesets
                .iter()
                .find(|(_, fileset)| fileset.has_space_for_full_ome_xml(xml.len()))
                .map(|(&key, _)| key)
        });
        let master_file = match (master, &xml) {
            (Some(key), _) => filesets.get(&key).and_then(FileSet::current_file),
            (None, Some(xml)) if !filesets.is_empty() => {
                log::info!(
                    "OME-XML ({} bytes) does not fit any file; writing {}",
                    xml.len(),
                    SIDECAR_FILE_NAME
                );
                match write_sidecar(&self.config.directory, xml) {
                    Ok(file) => Some(file),
                    Err(e) => {
                        record(e, "writing OME-XML sidecar");
                        None
                    }
                }
            }
            _ => None,
        };
        if let Some(file) = &master_file {
            log::info!("OME-XML master: {}", file.file_name);
        }

        // (5) descriptions, index maps, pointers
        let pointer = match &master_file {
            Some(file) => match pointer_to_master(&file.file_name, &file.uuid) {
                Ok(pointer) => pointer,
                Err(e) => {
                    record(e.into(), "building master pointer");
                    String::new()
                }
            },
            None => String::new(),
        };
        for (i, (&key, fileset)) in filesets.iter_mut().enumerate() {
            let current = match (&xml, master) {
                (Some(xml), Some(m)) if m == key => xml.as_str(),
                _ => pointer.as_str(),
            };
            if let Err(e) = fileset.finished(current, &pointer) {
                record(e, "finishing file set");
            }
            report.tick(i + 1);
        }
        drop(write);

        // (6) display settings and comments
        for reader in self.index.read().readers() {
            let result = reader
                .rewrite_display_settings(&state.display)
                .and_then(|_| reader.rewrite_comments(&state.display));
            if let Err(e) = result {
                record(e.into(), "writing display settings");
            }
        }
        report.finish();
        first_error
    }
}

fn write_sidecar(directory: &Path, xml: &str) -> Result<FileRef, StorageError> {
    fs::write(directory.join(SIDECAR_FILE_NAME), xml)?;
    Ok(FileRef {
        file_name: SIDECAR_FILE_NAME.to_string(),
        uuid: format!("urn:uuid:{}", Uuid::new_v4()),
    })
}

impl ImageStorage for StorageEngine {
    fn put_image(&self, image: TaggedImage) -> Result<(), StorageError> {
        self.submit(image, false)
    }

    fn put_image_and_wait(&self, image: TaggedImage) -> Result<(), StorageError> {
        self.submit(image, true)
    }

    fn get_image(&self, coords: &Coords) -> Option<TaggedImage> {
        let reader = self.index.read().reader_for(coords)?;
        match reader.read_image(coords) {
            Ok(image) => Some(image),
            Err(e) => {
                log::error!(
                    "{} is indexed in {} but cannot be read: {}",
                    coords,
                    reader.file_name(),
                    e
                );
                None
            }
        }
    }

    fn get_image_tags(&self, coords: &Coords) -> Option<ImageTags> {
        let reader = self.index.read().reader_for(coords)?;
        match reader.read_tags(coords) {
            Ok(tags) => Some(tags),
            Err(e) => {
                log::error!(
                    "{} is indexed in {} but its tags cannot be read: {}",
                    coords,
                    reader.file_name(),
                    e
                );
                None
            }
        }
    }

    fn overwrite_pixels(&self, pixels: &[u8], coords: &Coords) -> Result<(), StorageError> {
        if !self.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        let reader = self
            .index
            .read()
            .reader_for(coords)
            .ok_or(StorageError::ImageNotFound(*coords))?;
        reader
            .overwrite_pixels(coords, pixels)
            .map_err(|e| match e {
                TiffError::ImageNotFound(label) => StorageError::ImageNotFound(label),
                TiffError::PixelSizeMismatch { expected, actual } => StorageError::InvalidImage(
                    format!("pixel buffer has {} bytes, expected {}", actual, expected),
                ),
                other => StorageError::from(other),
            })
    }

    /// Finalize the dataset. Idempotent.
    ///
    /// Every finalize step runs even if an earlier one fails; the first failure
    /// is returned once the dataset has been made read-only.
    fn finished(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if self.finished.load(Ordering::Acquire) {
            return Ok(());
        }
        self.writable.store(false, Ordering::Release);
        let error = self.finalize(&mut state);
        self.finished.store(true, Ordering::Release);
        log::info!(
            "Finished dataset {} with {} images",
            self.config.directory.display(),
            self.num_images()
        );
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.is_finished() {
            log::warn!("Closing unfinished dataset; finishing it first");
            if let Err(e) = self.finished() {
                log::error!("Finishing on close failed: {}", e);
            }
        }
        let closed = self.index.read().close_all();
        if closed > 0 {
            log::debug!("Closed {} readers", closed);
        }
    }

    fn summary_metadata(&self) -> SummaryMetadata {
        self.summary.read().clone()
    }

    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StorageError> {
        let _state = self.state.lock();
        if !self.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        let summary_json = summary.to_json()?;
        let mut write = self.write.lock();
        let current = write.summary.ordering();
        let stored = !write.filesets.is_empty() || !self.submitted.lock().is_empty();
        if stored && summary.ordering() != current {
            return Err(StorageError::OrderingLocked);
        }
        if !write.filesets.is_empty() {
            log::warn!("Summary metadata changed after files were created; existing files keep the old copy");
        }
        self.index.write().set_ordering(summary.ordering());
        *self.summary.write() = summary.clone();
        write.ome.set_summary(summary.clone());
        write.summary = summary;
        write.summary_json = summary_json;
        Ok(())
    }

    fn display_and_comments(&self) -> DisplaySettings {
        self.state.lock().display.clone()
    }

    fn set_display_and_comments(&self, settings: DisplaySettings) {
        self.state.lock().display = settings;
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if self.is_writable() {
            log::warn!(
                "StorageEngine for {} dropped without finished(); files lack index maps and OME-XML",
                self.config.directory.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_summary_readable_while_write_thread_busy() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::create(
            StorageConfig::new_dataset(dir.path()),
            SummaryMetadata::new("busy", 1, 1, 1, 1),
        )
        .unwrap();

        // Stands in for a disk write in progress.
        let busy = engine.write.lock();
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::scope(|s| {
            s.spawn(|| {
                let _ = tx.send(engine.summary_metadata().prefix);
            });
            let prefix = rx.recv_timeout(Duration::from_secs(5));
            drop(busy);
            assert_eq!(prefix.ok().as_deref(), Some("busy"));
        });
        engine.finished().unwrap();
    }
}

