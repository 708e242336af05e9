use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::tempdir;

use super::format::{INDEX_MAP_SLOT, MIN_METADATA_BLOCK_RESERVE};
use super::*;
use crate::label::ImageLabel;
use crate::metadata::{pointer_to_master, DisplaySettings, ImageTags, PixelType, SummaryMetadata};

const W: u32 = 16;
const H: u32 = 8;

fn summary_json() -> String {
    SummaryMetadata::new("unit", 2, 1, 3, 1).to_json().unwrap()
}

fn pixels_for(label: ImageLabel) -> Vec<u8> {
    (0..(W * H * 2))
        .map(|i| (i as u8).wrapping_add(label.channel as u8 * 31 + label.frame as u8 * 7))
        .collect()
}

fn append(writer: &mut TiffWriter, label: ImageLabel) {
    let mut tags = ImageTags::for_plane(label, W, H, PixelType::Gray16);
    tags.insert("Exposure-ms", 10);
    writer
        .append_image(
            label,
            &pixels_for(label),
            W,
            H,
            PixelType::Gray16,
            &tags.to_json().unwrap(),
        )
        .unwrap();
}

fn write_file(path: &Path, labels: &[ImageLabel], finish: bool) -> TiffWriter {
    let mut writer = TiffWriter::create(path, &summary_json(), 2048, Resolution::default()).unwrap();
    for &label in labels {
        append(&mut writer, label);
    }
    if finish {
        writer.finish_writing().unwrap();
    }
    writer
}

fn labels(n: u32) -> Vec<ImageLabel> {
    (0..n).map(|t| ImageLabel::new(t % 2, 0, t / 2, 0)).collect()
}

#[test]
fn test_live_reader_sees_each_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("live.ome.tif");
    let mut writer = TiffWriter::create(&path, &summary_json(), 2048, Resolution::default()).unwrap();
    let reader = writer.reader().unwrap();
    assert_eq!(reader.index_source(), IndexSource::Live);
    assert!(reader.is_writing());

    for label in labels(3) {
        assert!(!reader.contains(&label));
        append(&mut writer, label);
        let image = reader.read_image(&label).unwrap();
        assert_eq!(image.pixels, pixels_for(label));
        assert_eq!(image.tags.label().unwrap(), label);
    }
    writer.finish_writing().unwrap();
    assert!(!reader.is_writing());
}

#[test]
fn test_reopen_uses_index_map() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.ome.tif");
    drop(write_file(&path, &labels(4), true));

    let reader = TiffReader::open(&path).unwrap();
    assert_eq!(reader.index_source(), IndexSource::IndexMap);
    assert_eq!(reader.num_images(), 4);
    for label in labels(4) {
        let image = reader.read_image(&label).unwrap();
        assert_eq!(image.pixels, pixels_for(label));
        assert_eq!(image.tags.get("Exposure-ms"), Some(&serde_json::json!(10)));
    }
    assert_eq!(reader.summary_metadata().unwrap().prefix, "unit");
    assert!(matches!(
        reader.read_image(&ImageLabel::new(9, 9, 9, 9)),
        Err(TiffError::ImageNotFound(_))
    ));
}

#[test]
fn test_ifd_chain_is_valid_after_every_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chain.ome.tif");
    let writer = write_file(&path, &labels(3), false);

    let mut file = std::fs::File::open(&path).unwrap();
    let size = file.metadata().unwrap().len();
    let mut header = [0u8; 8];
    std::io::Read::read_exact(&mut file, &mut header).unwrap();
    let mut offset = parse_header(&header).unwrap();
    let mut count = 0;
    while offset != 0 {
        let ifd = Ifd::read(&mut file, offset, size).unwrap();
        let layout = ifd.layout(size).unwrap();
        assert_eq!((layout.width, layout.height), (W, H));
        assert_eq!(layout.description.is_some(), count == 0);
        offset = ifd.next_ifd;
        count += 1;
    }
    assert_eq!(count, 3);
    drop(writer);
}

#[test]
fn test_recovery_without_index_map() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crashed.ome.tif");
    drop(write_file(&path, &labels(5), false));

    let reader = TiffReader::open(&path).unwrap();
    assert_eq!(reader.index_source(), IndexSource::Recovered);
    let mut found = reader.labels();
    found.sort_by_key(|l| (l.frame, l.channel));
    assert_eq!(found, labels(5));
    assert_eq!(reader.read_image(&labels(5)[4]).unwrap().pixels, pixels_for(labels(5)[4]));
}

#[test]
fn test_recovery_stops_at_truncated_plane() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cut.ome.tif");
    let writer = write_file(&path, &labels(3), false);
    let size = writer.size();
    drop(writer);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(size - 20).unwrap();

    let reader = TiffReader::open(&path).unwrap();
    assert_eq!(reader.num_images(), 2);
    assert!(!reader.contains(&labels(3)[2]));
}

#[test]
fn test_corrupt_index_map_falls_back_to_recovery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.ome.tif");
    drop(write_file(&path, &labels(2), true));

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(INDEX_MAP_SLOT + 4)).unwrap();
    file.write_all(&0x00FF_FFF0u32.to_le_bytes()).unwrap();
    drop(file);

    let reader = TiffReader::open(&path).unwrap();
    assert_eq!(reader.index_source(), IndexSource::Recovered);
    assert_eq!(reader.num_images(), 2);
}

#[test]
fn test_rejects_foreign_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("foreign.tif");
    let mut bytes = vec![0x49, 0x49, 42, 0, 0, 0, 0, 0];
    bytes.resize(64, 0);
    std::fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        TiffReader::open(&path),
        Err(TiffError::MissingSummaryHeader)
    ));

    std::fs::write(&path, b"MM").unwrap();
    assert!(matches!(
        TiffReader::open(&path),
        Err(TiffError::Truncated { .. })
    ));
}

#[test]
fn test_description_capacity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("desc.ome.tif");
    let mut writer = TiffWriter::create(&path, &summary_json(), 10, Resolution::default()).unwrap();
    assert!(!writer.has_space_for_full_ome_xml(10));
    assert!(matches!(
        writer.write_description("<OME/>"),
        Err(TiffError::MissingTag("ImageDescription"))
    ));

    append(&mut writer, labels(1)[0]);
    assert!(writer.has_space_for_full_ome_xml(MIN_DESCRIPTION_CAPACITY - 1));
    assert!(!writer.has_space_for_full_ome_xml(MIN_DESCRIPTION_CAPACITY));
    let too_big = "x".repeat(MIN_DESCRIPTION_CAPACITY);
    assert!(matches!(
        writer.write_description(&too_big),
        Err(TiffError::DescriptionTooLarge { .. })
    ));

    writer.write_description("<OME>long first draft</OME>").unwrap();
    writer.write_description("<OME/>").unwrap();
    writer.finish_writing().unwrap();
    let reader = writer.reader().unwrap();
    assert_eq!(reader.ome_xml().unwrap(), "<OME/>");
}

#[test]
fn test_pixel_size_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.ome.tif");
    let mut writer = TiffWriter::create(&path, &summary_json(), 2048, Resolution::default()).unwrap();
    let result = writer.append_image(ImageLabel::default(), &[0; 3], W, H, PixelType::Gray8, "{}");
    assert!(matches!(
        result,
        Err(TiffError::PixelSizeMismatch {
            expected: 128,
            actual: 3
        })
    ));
    assert_eq!(writer.ifd_count(), 0);
}

#[test]
fn test_display_rewrite_in_place_and_relocated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("display.ome.tif");
    let writer = write_file(&path, &labels(2), false);
    let reader = writer.reader().unwrap();

    let mut settings = DisplaySettings::for_channels(["DAPI", "GFP"]);
    assert!(matches!(
        reader.rewrite_display_settings(&settings),
        Err(TiffError::StillWriting)
    ));

    let mut writer = writer;
    writer.finish_writing().unwrap();
    settings.set_summary_comment("first pass");
    reader.rewrite_display_settings(&settings).unwrap();
    reader.rewrite_comments(&settings).unwrap();
    let size_before = reader.file_size().unwrap();
    assert_eq!(reader.display_and_comments().unwrap(), settings);

    settings.set_summary_comment("x".repeat(MIN_METADATA_BLOCK_RESERVE as usize + 10));
    reader.rewrite_comments(&settings).unwrap();
    assert!(reader.file_size().unwrap() > size_before);

    let reopened = TiffReader::open(&path).unwrap();
    assert_eq!(reopened.display_and_comments().unwrap(), settings);
    assert_eq!(reopened.num_images(), 2);
}

#[test]
fn test_display_defaults_when_never_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nodisplay.ome.tif");
    drop(write_file(&path, &labels(1), false));
    let reader = TiffReader::open(&path).unwrap();
    assert_eq!(reader.display_and_comments().unwrap(), DisplaySettings::default());
}

#[test]
fn test_overwrite_pixels() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("overwrite.ome.tif");
    let writer = write_file(&path, &labels(2), true);
    let reader = writer.reader().unwrap();
    let target = labels(2)[1];

    let replacement = vec![0xAB; (W * H * 2) as usize];
    reader.overwrite_pixels(&target, &replacement).unwrap();
    assert_eq!(reader.read_image(&target).unwrap().pixels, replacement);
    assert_eq!(reader.read_tags(&target).unwrap().label().unwrap(), target);
    assert_eq!(reader.read_image(&labels(2)[0]).unwrap().pixels, pixels_for(labels(2)[0]));

    assert!(matches!(
        reader.overwrite_pixels(&target, &[1, 2, 3]),
        Err(TiffError::PixelSizeMismatch { actual: 3, .. })
    ));
    assert!(matches!(
        reader.overwrite_pixels(&ImageLabel::new(5, 5, 5, 5), &replacement),
        Err(TiffError::ImageNotFound(_))
    ));
}

#[test]
fn test_resolve_pointer_to_master() {
    let dir = tempdir().unwrap();
    let mut master = write_file(&dir.path().join("m.ome.tif"), &labels(1), false);
    let mut other = write_file(&dir.path().join("o.ome.tif"), &[ImageLabel::new(0, 0, 0, 1)], false);

    let full = "<OME xmlns=\"x\"><Image ID=\"Image:0\"/></OME>";
    master.write_description(full).unwrap();
    other
        .write_description(&pointer_to_master(master.file_name(), master.uuid()).unwrap())
        .unwrap();
    master.finish_writing().unwrap();
    other.finish_writing().unwrap();

    let reader = TiffReader::open(dir.path().join("o.ome.tif")).unwrap();
    assert_eq!(reader.resolve_ome_xml(dir.path()).unwrap().as_deref(), Some(full));
    let reader = TiffReader::open(dir.path().join("m.ome.tif")).unwrap();
    assert_eq!(reader.resolve_ome_xml(dir.path()).unwrap().as_deref(), Some(full));
}

#[test]
fn test_resolve_pointer_to_sidecar() {
    let dir = tempdir().unwrap();
    let mut writer = write_file(&dir.path().join("s.ome.tif"), &labels(1), false);
    std::fs::write(dir.path().join("OMEXMLMetadata.ome"), "<OME/>").unwrap();
    writer
        .write_description(&pointer_to_master("OMEXMLMetadata.ome", "urn:uuid:1").unwrap())
        .unwrap();
    writer.finish_writing().unwrap();
    let reader = writer.reader().unwrap();
    assert_eq!(
        reader.resolve_ome_xml(dir.path()).unwrap().as_deref(),
        Some("<OME/>")
    );
}

#[test]
fn test_closed_reader() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("closed.ome.tif");
    drop(write_file(&path, &labels(1), true));
    let reader = TiffReader::open(&path).unwrap();
    reader.close();
    reader.close();
    assert!(reader.is_closed());
    assert!(matches!(
        reader.read_image(&labels(1)[0]),
        Err(TiffError::Closed)
    ));
}

#[test]
fn test_space_estimate_and_finish_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("space.ome.tif");
    let mut writer = write_file(&path, &labels(1), false);
    let plane = (W * H * 2) as usize;
    let limit = writer.size() + plane_block_len(plane, 100, None) + trailer_len(2);
    assert!(writer.has_space_for(plane, 100, limit));
    assert!(!writer.has_space_for(plane, 100, limit - 1));

    writer.finish_writing().unwrap();
    assert!(matches!(writer.finish_writing(), Err(TiffError::AlreadyFinished)));
    assert!(matches!(
        writer.append_image(labels(2)[1], &pixels_for(labels(2)[1]), W, H, PixelType::Gray16, "{}"),
        Err(TiffError::AlreadyFinished)
    ));
}

#[test]
fn test_resolution_from_pixel_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("res.ome.tif");
    let mut writer = TiffWriter::create(
        &path,
        &summary_json(),
        2048,
        Resolution::from_pixel_size_um(Some(0.5)),
    )
    .unwrap();
    append(&mut writer, labels(1)[0]);
    writer.finish_writing().unwrap();

    let mut file = std::fs::File::open(&path).unwrap();
    let size = file.metadata().unwrap().len();
    let mut header = [0u8; 8];
    std::io::Read::read_exact(&mut file, &mut header).unwrap();
    let ifd = Ifd::read(&mut file, parse_header(&header).unwrap(), size).unwrap();
    assert_eq!(ifd.require(format::TiffTag::ResolutionUnit, "ResolutionUnit").unwrap(), 3);
}
