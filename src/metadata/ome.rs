//! OME-XML accumulation and serialization.
//!
//! One [`OmeMetadataBuilder`] exists per dataset. Every written plane adds a
//! `TiffData` reference (file, UUID, IFD number) and a `Plane` entry (timing and
//! stage position). At finish time the engine corrects the declared frame count
//! of aborted positions and back-fills placeholder references, then serializes the
//! whole document once. Files that do not hold the document get a `BinaryOnly`
//! pointer produced by [`pointer_to_master`].

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::label::ImageLabel;

use super::summary::SummaryMetadata;
use super::tags::{ImageTags, PixelType};
use super::MetadataError;

/// OME schema namespace
pub const OME_NAMESPACE: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06 \
     http://www.openmicroscopy.org/Schemas/OME/2016-06/ome.xsd";

fn xml_err(e: impl std::fmt::Display) -> MetadataError {
    MetadataError::XmlError(e.to_string())
}

/// Physical file holding a plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// File name relative to the dataset directory
    pub file_name: String,
    /// `urn:uuid:` identifier of the file
    pub uuid: String,
}

/// Everything the document needs to know about one written plane
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneRecord {
    /// File holding the plane
    pub file: FileRef,
    /// Zero-based IFD number inside that file
    pub ifd: u32,
    /// Milliseconds since acquisition start
    pub delta_t_ms: Option<f64>,
    /// Stage X in micrometers
    pub position_x_um: Option<f64>,
    /// Stage Y in micrometers
    pub position_y_um: Option<f64>,
    /// Focus in micrometers
    pub position_z_um: Option<f64>,
}

impl PlaneRecord {
    /// Build a record from the plane's tags
    pub fn from_tags(file: FileRef, ifd: u32, tags: &ImageTags) -> Self {
        Self {
            file,
            ifd,
            delta_t_ms: tags.elapsed_time_ms(),
            position_x_um: tags.x_position_um(),
            position_y_um: tags.y_position_um(),
            position_z_um: tags.z_position_um(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TiffDataEntry {
    Plane(PlaneRecord),
    Filler(FileRef),
}

/// Key order inside a position: frame, channel, slice
type PlaneKey = (u32, u32, u32);

#[derive(Debug, Clone, Default)]
struct PositionMetadata {
    name: Option<String>,
    declared_frames: Option<u32>,
    entries: BTreeMap<PlaneKey, TiffDataEntry>,
}

impl PositionMetadata {
    fn first_file(&self) -> Option<&FileRef> {
        self.entries.values().find_map(|e| match e {
            TiffDataEntry::Plane(p) => Some(&p.file),
            TiffDataEntry::Filler(_) => None,
        })
    }

    fn max_frame(&self) -> Option<u32> {
        self.entries.keys().map(|(t, _, _)| *t).max()
    }
}

/// Incrementally built OME-XML document for a whole dataset
#[derive(Debug, Clone)]
pub struct OmeMetadataBuilder {
    summary: SummaryMetadata,
    geometry: Option<(u32, u32, PixelType)>,
    positions: BTreeMap<u32, PositionMetadata>,
    max_channel: u32,
    max_slice: u32,
}

impl OmeMetadataBuilder {
    /// Start a document for the given acquisition
    pub fn new(summary: SummaryMetadata) -> Self {
        Self {
            summary,
            geometry: None,
            positions: BTreeMap::new(),
            max_channel: 0,
            max_slice: 0,
        }
    }

    /// Replace the summary the document is derived from
    pub fn set_summary(&mut self, summary: SummaryMetadata) {
        self.summary = summary;
    }

    /// Record a written plane.
    pub fn add_plane(
        &mut self,
        label: ImageLabel,
        width: u32,
        height: u32,
        pixel_type: PixelType,
        tags: &ImageTags,
        record: PlaneRecord,
    ) {
        self.geometry.get_or_insert((width, height, pixel_type));
        self.max_channel = self.max_channel.max(label.channel);
        self.max_slice = self.max_slice.max(label.slice);
        let position = self.positions.entry(label.position).or_default();
        if position.name.is_none() {
            position.name = tags.position_name().map(str::to_string);
        }
        position.entries.insert(
            (label.frame, label.channel, label.slice),
            TiffDataEntry::Plane(record),
        );
    }

    /// Number of channels declared for every position
    pub fn num_channels(&self) -> u32 {
        let observed = if self.positions.is_empty() { 0 } else { self.max_channel + 1 };
        self.summary.channels.max(observed).max(1)
    }

    /// Number of slices declared for every position
    pub fn num_slices(&self) -> u32 {
        let observed = if self.positions.is_empty() { 0 } else { self.max_slice + 1 };
        self.summary.slices.max(observed).max(1)
    }

    /// Number of frames declared for one position
    pub fn num_frames(&self, position: u32) -> u32 {
        let Some(pos) = self.positions.get(&position) else {
            return self.summary.frames.max(1);
        };
        match pos.declared_frames {
            Some(n) => n.max(1),
            None => {
                let observed = pos.max_frame().map_or(0, |t| t + 1);
                self.summary.frames.max(observed).max(1)
            }
        }
    }

    /// Correct the declared frame count of a position whose acquisition ran short.
    pub fn set_num_frames(&mut self, position: u32, count: u32) {
        if let Some(pos) = self.positions.get_mut(&position) {
            pos.declared_frames = Some(count);
        }
    }

    /// Add placeholder `TiffData` entries so every channel and slice of `position`
    /// covers frames `0..=last_frame` (clamped to the declared frame count).
    ///
    /// Returns the number of placeholders added. Positions without any written
    /// plane are left alone since there is no file to reference.
    pub fn fill_in_missing_tiff_datas(&mut self, last_frame: u32, position: u32) -> usize {
        let channels = self.num_channels();
        let slices = self.num_slices();
        let frames = self.num_frames(position);
        let Some(pos) = self.positions.get_mut(&position) else {
            return 0;
        };
        let Some(file) = pos.first_file().cloned() else {
            return 0;
        };
        let last = last_frame.min(frames.saturating_sub(1));
        let mut added = 0;
        for t in 0..=last {
            for c in 0..channels {
                for z in 0..slices {
                    pos.entries.entry((t, c, z)).or_insert_with(|| {
                        added += 1;
                        TiffDataEntry::Filler(file.clone())
                    });
                }
            }
        }
        added
    }

    /// Number of placeholder entries currently in the document
    pub fn filler_count(&self) -> usize {
        self.positions
            .values()
            .flat_map(|p| p.entries.values())
            .filter(|e| matches!(e, TiffDataEntry::Filler(_)))
            .count()
    }

    /// Byte length of [`serialize`](Self::serialize)
    pub fn serialized_len(&self) -> Result<usize, MetadataError> {
        Ok(self.serialize()?.len())
    }

    fn dimension_order(&self) -> &'static str {
        match (self.summary.slices_first, self.summary.time_first) {
            (true, false) => "XYZCT",
            (false, false) => "XYCZT",
            (true, true) => "XYTZC",
            (false, true) => "XYTCZ",
        }
    }

    /// Render the full document. Calling this has no side effects.
    pub fn serialize(&self) -> Result<String, MetadataError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;

        let creator = format!("mptiff {}", env!("CARGO_PKG_VERSION"));
        let mut root = ome_root();
        root.push_attribute(("Creator", creator.as_str()));
        writer.write_event(Event::Start(root)).map_err(xml_err)?;

        let (width, height, pixel_type) = self.geometry.unwrap_or((
            self.summary.width.unwrap_or(0),
            self.summary.height.unwrap_or(0),
            self.summary
                .pixel_type
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        ));
        let channels = self.num_channels();
        let slices = self.num_slices();

        for (&p, pos) in &self.positions {
            let image_id = format!("Image:{}", p);
            let name = pos
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_Pos{}", self.summary.prefix, p));
            let mut image = BytesStart::new("Image");
            image.push_attribute(("ID", image_id.as_str()));
            image.push_attribute(("Name", name.as_str()));
            writer.write_event(Event::Start(image)).map_err(xml_err)?;

            if let Some(start) = &self.summary.start_time {
                write_text_element(&mut writer, "AcquisitionDate", start)?;
            }
            if let Some(comment) = &self.summary.comment {
                write_text_element(&mut writer, "Description", comment)?;
            }

            let pixels_id = format!("Pixels:{}", p);
            let (size_x, size_y) = (width.to_string(), height.to_string());
            let (size_z, size_c) = (slices.to_string(), channels.to_string());
            let size_t = self.num_frames(p).to_string();
            let mut pixels = BytesStart::new("Pixels");
            pixels.push_attribute(("ID", pixels_id.as_str()));
            pixels.push_attribute(("DimensionOrder", self.dimension_order()));
            pixels.push_attribute(("Type", pixel_type.ome_type()));
            pixels.push_attribute(("SizeX", size_x.as_str()));
            pixels.push_attribute(("SizeY", size_y.as_str()));
            pixels.push_attribute(("SizeZ", size_z.as_str()));
            pixels.push_attribute(("SizeC", size_c.as_str()));
            pixels.push_attribute(("SizeT", size_t.as_str()));
            pixels.push_attribute(("BigEndian", "false"));
            let physical_xy = self.summary.pixel_size_um.filter(|v| *v > 0.0).map(|v| v.to_string());
            if let Some(ps) = &physical_xy {
                pixels.push_attribute(("PhysicalSizeX", ps.as_str()));
                pixels.push_attribute(("PhysicalSizeY", ps.as_str()));
            }
            let physical_z = self.summary.z_step_um.filter(|v| *v > 0.0).map(|v| v.to_string());
            if let Some(dz) = &physical_z {
                pixels.push_attribute(("PhysicalSizeZ", dz.as_str()));
            }
            writer.write_event(Event::Start(pixels)).map_err(xml_err)?;

            for c in 0..channels {
                let id = format!("Channel:{}:{}", p, c);
                let mut channel = BytesStart::new("Channel");
                channel.push_attribute(("ID", id.as_str()));
                if let Some(name) = self.summary.channel_names.get(c as usize) {
                    channel.push_attribute(("Name", name.as_str()));
                }
                channel.push_attribute(("SamplesPerPixel", "1"));
                writer.write_event(Event::Empty(channel)).map_err(xml_err)?;
            }

            for (&(t, c, z), entry) in &pos.entries {
                write_tiff_data(&mut writer, t, c, z, entry)?;
            }

            for (&(t, c, z), entry) in &pos.entries {
                if let TiffDataEntry::Plane(record) = entry {
                    write_plane(&mut writer, t, c, z, record)?;
                }
            }

            writer
                .write_event(Event::End(BytesEnd::new("Pixels")))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("Image")))
                .map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("OME")))
            .map_err(xml_err)?;
        String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)
    }
}

fn ome_root() -> BytesStart<'static> {
    let mut root = BytesStart::new("OME");
    root.push_attribute(("xmlns", OME_NAMESPACE));
    root.push_attribute(("xmlns:xsi", XSI_NAMESPACE));
    root.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
    root
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), MetadataError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

fn write_tiff_data(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    t: u32,
    c: u32,
    z: u32,
    entry: &TiffDataEntry,
) -> Result<(), MetadataError> {
    let (file, ifd, plane_count) = match entry {
        TiffDataEntry::Plane(record) => (&record.file, record.ifd, "1"),
        TiffDataEntry::Filler(file) => (file, 0, "0"),
    };
    let (ifd, first_c, first_z, first_t) =
        (ifd.to_string(), c.to_string(), z.to_string(), t.to_string());
    let mut tiff_data = BytesStart::new("TiffData");
    tiff_data.push_attribute(("IFD", ifd.as_str()));
    tiff_data.push_attribute(("FirstC", first_c.as_str()));
    tiff_data.push_attribute(("FirstZ", first_z.as_str()));
    tiff_data.push_attribute(("FirstT", first_t.as_str()));
    tiff_data.push_attribute(("PlaneCount", plane_count));
    writer.write_event(Event::Start(tiff_data)).map_err(xml_err)?;

    let mut uuid = BytesStart::new("UUID");
    uuid.push_attribute(("FileName", file.file_name.as_str()));
    writer.write_event(Event::Start(uuid)).map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(&file.uuid)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("UUID")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("TiffData")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_plane(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    t: u32,
    c: u32,
    z: u32,
    record: &PlaneRecord,
) -> Result<(), MetadataError> {
    let (the_c, the_z, the_t) = (c.to_string(), z.to_string(), t.to_string());
    let mut plane = BytesStart::new("Plane");
    plane.push_attribute(("TheC", the_c.as_str()));
    plane.push_attribute(("TheZ", the_z.as_str()));
    plane.push_attribute(("TheT", the_t.as_str()));
    let optional = [
        ("DeltaT", "DeltaTUnit", "ms", record.delta_t_ms),
        ("PositionX", "PositionXUnit", "µm", record.position_x_um),
        ("PositionY", "PositionYUnit", "µm", record.position_y_um),
        ("PositionZ", "PositionZUnit", "µm", record.position_z_um),
    ];
    for (attr, unit_attr, unit, value) in optional {
        if let Some(v) = value {
            let v = v.to_string();
            plane.push_attribute((attr, v.as_str()));
            plane.push_attribute((unit_attr, unit));
        }
    }
    writer.write_event(Event::Empty(plane)).map_err(xml_err)?;
    Ok(())
}

/// Short document pointing at the file that holds the full metadata.
pub fn pointer_to_master(file_name: &str, uuid: &str) -> Result<String, MetadataError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer.write_event(Event::Start(ome_root())).map_err(xml_err)?;
    let mut binary_only = BytesStart::new("BinaryOnly");
    binary_only.push_attribute(("MetadataFile", file_name));
    binary_only.push_attribute(("UUID", uuid));
    writer
        .write_event(Event::Empty(binary_only))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("OME")))
        .map_err(xml_err)?;
    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)
}

/// What an embedded OME-XML string turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OmeDocument {
    /// No document written yet
    Empty,
    /// The complete dataset document
    Full,
    /// A `BinaryOnly` pointer to the master
    Pointer(FileRef),
}

impl OmeDocument {
    /// Classify an embedded string.
    pub fn classify(xml: &str) -> Result<Self, MetadataError> {
        if xml.trim().is_empty() {
            return Ok(OmeDocument::Empty);
        }
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"BinaryOnly" => {
                    let mut file_name = None;
                    let mut uuid = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(xml_err)?;
                        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
                        match attr.key.local_name().as_ref() {
                            b"MetadataFile" => file_name = Some(value),
                            b"UUID" => uuid = Some(value),
                            _ => {}
                        }
                    }
                    return match (file_name, uuid) {
                        (Some(file_name), Some(uuid)) => {
                            Ok(OmeDocument::Pointer(FileRef { file_name, uuid }))
                        }
                        _ => Err(MetadataError::XmlError(
                            "BinaryOnly element without MetadataFile/UUID".to_string(),
                        )),
                    };
                }
                Event::Eof => return Ok(OmeDocument::Full),
                _ => {}
            }
        }
    }
}
