//! Integration tests for mptiff
//!
//! These tests drive the public API end to end: acquire through a
//! `StorageEngine`, finish, reopen from disk, and inspect the files.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use mptiff::prelude::*;
use mptiff::tiff::IndexSource;
use tempfile::tempdir;

const SIZE: u32 = 16;

fn plane(label: ImageLabel) -> TaggedImage {
    let mut image = TaggedImage::blank(label, SIZE, SIZE, PixelType::Gray16);
    let seed = (label.channel * 31 + label.slice * 17 + label.frame * 7 + label.position * 3) as u8;
    for (i, px) in image.pixels.iter_mut().enumerate() {
        *px = seed.wrapping_add(i as u8);
    }
    image.tags.insert(keys::ELAPSED_TIME_MS, label.frame as f64 * 250.0);
    image.tags.insert(keys::POSITION_NAME, format!("Well-{}", label.position));
    image
}

fn all_labels(channels: u32, slices: u32, frames: u32, positions: u32) -> Vec<ImageLabel> {
    let mut labels = Vec::new();
    for t in 0..frames {
        for p in 0..positions {
            for c in 0..channels {
                for z in 0..slices {
                    labels.push(ImageLabel::new(c, z, t, p));
                }
            }
        }
    }
    labels
}

fn acquire(dir: &Path, config: StorageConfig, summary: SummaryMetadata, labels: &[ImageLabel]) {
    let engine = StorageEngine::create(config, summary).unwrap();
    for &label in labels {
        engine.put_image(plane(label)).unwrap();
    }
    engine.finished().unwrap();
    engine.close();
    assert!(dir.is_dir());
}

fn tiff_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tif"))
        .collect();
    names.sort();
    names
}

fn documents(dir: &Path) -> BTreeMap<String, OmeDocument> {
    tiff_files(dir)
        .into_iter()
        .map(|name| {
            let reader = TiffReader::open(dir.join(&name)).unwrap();
            let doc = OmeDocument::classify(&reader.ome_xml().unwrap()).unwrap();
            (name, doc)
        })
        .collect()
}

/// Test the complete write-reopen-read cycle
#[test]
fn test_round_trip_after_reopen() {
    let dir = tempdir().unwrap();
    let labels = all_labels(2, 2, 3, 2);
    acquire(
        dir.path(),
        StorageConfig::new_dataset(dir.path()),
        SummaryMetadata::new("rt", 2, 2, 3, 2),
        &labels,
    );

    let engine = StorageEngine::open(dir.path()).unwrap();
    assert!(engine.is_finished());
    assert_eq!(engine.num_images(), labels.len());
    for &label in &labels {
        let image = engine.get_image(&label).unwrap();
        let expected = plane(label);
        assert_eq!(image.pixels, expected.pixels, "pixels of {}", label);
        assert_eq!(image.tags.label().unwrap(), label);
        assert_eq!(image.tags.elapsed_time_ms(), Some(label.frame as f64 * 250.0));
        assert_eq!(image.tags.position_name(), expected.tags.position_name());
    }
    assert!(engine.get_image(&ImageLabel::new(0, 0, 3, 0)).is_none());
    assert_eq!(engine.summary_metadata().prefix, "rt");
    assert_eq!(engine.max_indices(), Some(ImageLabel::new(1, 1, 2, 1)));
    engine.close();
}

/// Label order depends on SlicesFirst and survives a reopen
#[test]
fn test_ordering_reproduced_on_reopen() {
    let labels = all_labels(2, 2, 1, 1);
    let mut orders = Vec::new();
    for slices_first in [true, false] {
        let dir = tempdir().unwrap();
        let summary = SummaryMetadata::new("ord", 2, 2, 1, 1)
            .with_ordering(LabelOrdering::new(slices_first, false));
        let engine = StorageEngine::create(StorageConfig::new_dataset(dir.path()), summary).unwrap();
        for &label in labels.iter().rev() {
            engine.put_image(plane(label)).unwrap();
        }
        engine.finished().unwrap();
        let written = engine.image_keys();
        engine.close();

        let reopened = StorageEngine::open(dir.path()).unwrap();
        assert_eq!(reopened.summary_metadata().slices_first, slices_first);
        assert_eq!(reopened.image_keys(), written);
        orders.push(written);
    }
    assert_ne!(orders[0], orders[1]);
    assert_eq!(orders[0][1], ImageLabel::new(0, 1, 0, 0));
    assert_eq!(orders[1][1], ImageLabel::new(1, 0, 0, 0));
}

/// Once a plane is stored the ordering is fixed, so a reopen sees the write-time order
#[test]
fn test_ordering_change_refused_after_first_plane() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(
        StorageConfig::new_dataset(dir.path()),
        SummaryMetadata::new("fixed", 2, 2, 1, 1),
    )
    .unwrap();
    engine.put_image_and_wait(plane(ImageLabel::new(0, 0, 0, 0))).unwrap();
    let reordered =
        SummaryMetadata::new("fixed", 2, 2, 1, 1).with_ordering(LabelOrdering::new(false, false));
    assert!(matches!(
        engine.set_summary_metadata(reordered),
        Err(StorageError::OrderingLocked)
    ));
    for label in [
        ImageLabel::new(1, 0, 0, 0),
        ImageLabel::new(0, 1, 0, 0),
        ImageLabel::new(1, 1, 0, 0),
    ] {
        engine.put_image(plane(label)).unwrap();
    }
    engine.finished().unwrap();
    let written = engine.image_keys();
    engine.close();

    let reopened = StorageEngine::open(dir.path()).unwrap();
    assert!(reopened.summary_metadata().slices_first);
    assert_eq!(reopened.image_keys(), written);
    assert_eq!(written[1], ImageLabel::new(0, 1, 0, 0));
}

/// Exactly one file holds the OME-XML; all others point at it
#[test]
fn test_single_master_with_pointers() {
    let dir = tempdir().unwrap();
    acquire(
        dir.path(),
        StorageConfig::new_dataset(dir.path()),
        SummaryMetadata::new("m", 1, 1, 2, 3),
        &all_labels(1, 1, 2, 3),
    );

    let docs = documents(dir.path());
    assert_eq!(docs.len(), 3);
    let masters: Vec<_> = docs
        .iter()
        .filter(|(_, d)| matches!(d, OmeDocument::Full))
        .map(|(n, _)| n.clone())
        .collect();
    assert_eq!(masters, vec!["m_MMStack_Pos0.ome.tif".to_string()]);
    for (name, doc) in &docs {
        if let OmeDocument::Pointer(target) = doc {
            assert_eq!(target.file_name, masters[0], "pointer in {}", name);
            assert!(target.uuid.starts_with("urn:uuid:"));
        }
    }
    assert!(!dir.path().join(SIDECAR_FILE_NAME).exists());

    let full = TiffReader::open(dir.path().join(&masters[0])).unwrap().ome_xml().unwrap();
    for name in docs.keys() {
        let reader = TiffReader::open(dir.path().join(name)).unwrap();
        assert_eq!(reader.resolve_ome_xml(dir.path()).unwrap().unwrap(), full);
    }
    assert_eq!(full.matches("<Image ").count(), 3);
}

/// When no file has room, the document goes to a sidecar and every file points there
#[test]
fn test_sidecar_master_when_no_file_has_room() {
    let dir = tempdir().unwrap();
    acquire(
        dir.path(),
        StorageConfig::new_dataset(dir.path()).with_ome_xml_reserve(1024),
        SummaryMetadata::new("side", 2, 2, 3, 2),
        &all_labels(2, 2, 3, 2),
    );

    let sidecar = fs::read_to_string(dir.path().join(SIDECAR_FILE_NAME)).unwrap();
    assert!(sidecar.len() >= 1024);
    assert_eq!(OmeDocument::classify(&sidecar).unwrap(), OmeDocument::Full);

    for (name, doc) in documents(dir.path()) {
        match doc {
            OmeDocument::Pointer(target) => assert_eq!(target.file_name, SIDECAR_FILE_NAME),
            other => panic!("{} holds {:?}", name, other),
        }
        let reader = TiffReader::open(dir.path().join(&name)).unwrap();
        assert_eq!(reader.resolve_ome_xml(dir.path()).unwrap().unwrap(), sidecar);
    }

    let report = validate_dataset(dir.path()).unwrap();
    assert!(!report.has_failures(), "{}", report);
}

/// A second finish changes nothing on disk
#[test]
fn test_finish_is_idempotent() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(
        StorageConfig::new_dataset(dir.path()),
        SummaryMetadata::new("idem", 1, 1, 2, 1),
    )
    .unwrap();
    for label in all_labels(1, 1, 2, 1) {
        engine.put_image(plane(label)).unwrap();
    }
    engine.finished().unwrap();
    let path = dir.path().join("idem_MMStack_Pos0.ome.tif");
    let first = fs::read(&path).unwrap();

    engine.finished().unwrap();
    engine.close();
    assert_eq!(fs::read(&path).unwrap(), first);
    assert_eq!(
        TiffReader::open(&path).unwrap().index_source(),
        IndexSource::IndexMap
    );
}

/// An acquisition stopped mid-frame declares the same frames for every channel
#[test]
fn test_aborted_acquisition_backfill() {
    let dir = tempdir().unwrap();
    let mut labels = all_labels(3, 2, 2, 2);
    // Frame 2 only reaches the first channel of position 0.
    labels.extend([ImageLabel::new(0, 0, 2, 0), ImageLabel::new(0, 1, 2, 0)]);
    acquire(
        dir.path(),
        StorageConfig::new_dataset(dir.path()),
        SummaryMetadata::new("ab", 3, 2, 50, 2),
        &labels,
    );

    let engine = StorageEngine::open(dir.path()).unwrap();
    let mut frames: BTreeMap<(u32, u32), BTreeSet<u32>> = BTreeMap::new();
    for label in engine.image_keys() {
        frames
            .entry((label.position, label.channel))
            .or_default()
            .insert(label.frame);
    }
    assert_eq!(frames[&(0, 0)], BTreeSet::from([0, 1, 2]));
    assert_eq!(frames[&(0, 1)], frames[&(0, 0)]);
    assert_eq!(frames[&(0, 2)], frames[&(0, 0)]);
    assert_eq!(frames[&(1, 0)], BTreeSet::from([0, 1]));

    let filler = engine.get_image(&ImageLabel::new(2, 1, 2, 0)).unwrap();
    assert!(filler.tags.is_filler());
    assert_eq!(filler.tags.position_name(), Some("Well-0"));
    assert!(!engine.get_image_tags(&ImageLabel::new(0, 0, 2, 0)).unwrap().is_filler());

    let xml = TiffReader::open(dir.path().join("ab_MMStack_Pos0.ome.tif"))
        .unwrap()
        .resolve_ome_xml(dir.path())
        .unwrap()
        .unwrap();
    assert_eq!(xml.matches("SizeT=\"3\"").count(), 1);
    assert_eq!(xml.matches("SizeT=\"2\"").count(), 1);
}

/// Writes are rejected after finish while reads keep working
#[test]
fn test_read_only_after_finish() {
    let dir = tempdir().unwrap();
    acquire(
        dir.path(),
        StorageConfig::new_dataset(dir.path()),
        SummaryMetadata::new("ro", 1, 1, 1, 1),
        &[ImageLabel::default()],
    );

    let engine = StorageEngine::open(dir.path()).unwrap();
    assert!(engine.is_finished());
    assert!(matches!(
        engine.put_image(plane(ImageLabel::new(0, 0, 1, 0))),
        Err(StorageError::ReadOnly)
    ));
    assert!(matches!(engine.finished(), Ok(())));
    assert!(engine.get_image(&ImageLabel::default()).is_some());
    engine.close();
}

/// Producers for different positions interleave; waited-for planes are readable at once
#[test]
fn test_interleaved_positions_from_threads() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(
        StorageEngine::create(
            StorageConfig::new_dataset(dir.path()),
            SummaryMetadata::new("mt", 2, 1, 4, 3),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..3)
        .map(|p| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for t in 0..4 {
                    for c in 0..2 {
                        let label = ImageLabel::new(c, 0, t, p);
                        engine.put_image_and_wait(plane(label)).unwrap();
                        let stored = engine.get_image(&label).expect("readable after wait");
                        assert_eq!(stored.pixels, plane(label).pixels);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.last_acquired_frame(), 3);
    assert_eq!(engine.last_acquired_position(), 2);
    engine.finished().unwrap();
    assert_eq!(engine.num_images(), 24);
    assert_eq!(tiff_files(dir.path()).len(), 3);
    engine.close();
}

/// A dataset dropped without finishing is re-indexed from the IFD chain
#[test]
fn test_recovery_without_index_map() {
    let dir = tempdir().unwrap();
    let labels = all_labels(2, 1, 3, 1);
    {
        let engine = StorageEngine::create(
            StorageConfig::new_dataset(dir.path()),
            SummaryMetadata::new("crash", 2, 1, 10, 1),
        )
        .unwrap();
        for &label in &labels {
            engine.put_image(plane(label)).unwrap();
        }
        // Dropped without finished(): no index map, no OME-XML.
    }

    let reader = TiffReader::open(dir.path().join("crash_MMStack_Pos0.ome.tif")).unwrap();
    assert_eq!(reader.index_source(), IndexSource::Recovered);
    assert_eq!(reader.num_images(), labels.len());
    reader.close();

    let engine = StorageEngine::open(dir.path()).unwrap();
    assert_eq!(engine.num_images(), labels.len());
    for &label in &labels {
        assert_eq!(engine.get_image(&label).unwrap().pixels, plane(label).pixels);
    }
    engine.close();
}

/// Files roll over at max_file_size; the last segment is the master
#[test]
fn test_rollover_at_max_file_size() {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(
        StorageConfig::new_dataset(dir.path())
            .with_max_file_size(64 * 1024)
            .with_ome_xml_reserve(4096),
        SummaryMetadata::new("roll", 1, 1, 3, 1),
    )
    .unwrap();
    for t in 0..3 {
        let label = ImageLabel::new(0, 0, t, 0);
        engine
            .put_image(TaggedImage::blank(label, 128, 128, PixelType::Gray16))
            .unwrap();
    }
    engine.finished().unwrap();
    engine.close();

    assert_eq!(
        tiff_files(dir.path()),
        vec![
            "roll_MMStack_Pos0.ome.tif".to_string(),
            "roll_MMStack_Pos0_1.ome.tif".to_string(),
            "roll_MMStack_Pos0_2.ome.tif".to_string(),
        ]
    );
    for name in tiff_files(dir.path()) {
        assert!(fs::metadata(dir.path().join(&name)).unwrap().len() <= 64 * 1024);
    }

    let docs = documents(dir.path());
    assert_eq!(docs["roll_MMStack_Pos0_2.ome.tif"], OmeDocument::Full);
    for name in ["roll_MMStack_Pos0.ome.tif", "roll_MMStack_Pos0_1.ome.tif"] {
        match &docs[name] {
            OmeDocument::Pointer(target) => {
                assert_eq!(target.file_name, "roll_MMStack_Pos0_2.ome.tif")
            }
            other => panic!("{} holds {:?}", name, other),
        }
    }

    let reopened = StorageEngine::open(dir.path()).unwrap();
    assert_eq!(reopened.num_images(), 3);
    assert!(reopened.get_image(&ImageLabel::new(0, 0, 2, 0)).is_some());
    reopened.close();
}

/// Display settings and comments can be rewritten on a reopened dataset
#[test]
fn test_display_rewrite_after_reopen() {
    let dir = tempdir().unwrap();
    acquire(
        dir.path(),
        StorageConfig::new_dataset(dir.path()),
        SummaryMetadata::new("disp", 2, 1, 1, 2).with_channel_names(["DAPI", "GFP"]),
        &all_labels(2, 1, 1, 2),
    );

    let engine = StorageEngine::open(dir.path()).unwrap();
    let mut display = engine.display_and_comments();
    assert_eq!(display.channels.len(), 2);
    display.channels[1].color = 0x00_FF_00;
    display.channels[1].max = 4095;
    // Long enough to outgrow the reserved comments block.
    display.set_summary_comment("x".repeat(10_000));
    display.set_image_comment(ImageLabel::new(1, 0, 0, 1), "bleached");
    engine.set_display_and_comments(display.clone());
    engine.write_display_settings().unwrap();
    engine.close();

    let reopened = StorageEngine::open(dir.path()).unwrap();
    assert_eq!(reopened.display_and_comments(), display);
    for name in tiff_files(dir.path()) {
        let reader = TiffReader::open(dir.path().join(name)).unwrap();
        assert_eq!(reader.display_and_comments().unwrap(), display);
        assert_eq!(reader.num_images(), 2);
    }
    reopened.close();
}

/// The JSON metadata sidecar holds the summary and one entry per plane
#[test]
fn test_separate_metadata_file() {
    let dir = tempdir().unwrap();
    acquire(
        dir.path(),
        StorageConfig::new_dataset(dir.path()).with_separate_metadata_file(true),
        SummaryMetadata::new("md", 2, 1, 2, 1),
        &all_labels(2, 1, 2, 1),
    );

    let text = fs::read_to_string(dir.path().join("md_MMStack_Pos0_metadata.txt")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object["Summary"]["Channels"], 2);
    assert_eq!(object["FrameKey-1-1-0"]["ChannelIndex"], 1);
    assert_eq!(object.len(), 1 + 4);
}
