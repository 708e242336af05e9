use super::*;
use crate::label::{ImageLabel, LabelOrdering};
use serde_json::json;

fn file(name: &str) -> FileRef {
    FileRef {
        file_name: name.to_string(),
        uuid: format!("urn:uuid:{}", name),
    }
}

fn add(builder: &mut OmeMetadataBuilder, label: ImageLabel, ifd: u32) {
    let tags = ImageTags::for_plane(label, 4, 4, PixelType::Gray16);
    let record = PlaneRecord::from_tags(file("a.ome.tif"), ifd, &tags);
    builder.add_plane(label, 4, 4, PixelType::Gray16, &tags, record);
}

#[test]
fn test_tags_label_accessors() {
    let tags = ImageTags::for_plane(ImageLabel::new(1, 2, 3, 4), 512, 256, PixelType::Gray8);
    assert_eq!(tags.label().unwrap(), ImageLabel::new(1, 2, 3, 4));
    assert_eq!(tags.width().unwrap(), 512);
    assert_eq!(tags.height().unwrap(), 256);
    assert_eq!(tags.pixel_type().unwrap(), PixelType::Gray8);
}

#[test]
fn test_tags_accept_numeric_strings() {
    let map = json!({"ChannelIndex": "2", "SliceIndex": 0, "FrameIndex": 7, "PositionIndex": "1"});
    let tags = ImageTags::from_map(map.as_object().unwrap().clone());
    assert_eq!(tags.label().unwrap(), ImageLabel::new(2, 0, 7, 1));
}

#[test]
fn test_tags_reject_malformed_index() {
    let map = json!({"PositionIndex": "north"});
    let tags = ImageTags::from_map(map.as_object().unwrap().clone());
    assert!(matches!(
        tags.position_index(),
        Err(MetadataError::InvalidTag { key: "PositionIndex", .. })
    ));
    assert!(matches!(
        tags.frame_index(),
        Err(MetadataError::MissingTag("FrameIndex"))
    ));
}

#[test]
fn test_tags_json_preserves_unknown_keys() {
    let mut tags = ImageTags::for_plane(ImageLabel::default(), 2, 2, PixelType::Gray16);
    tags.insert("Camera", "Andor");
    tags.insert("Exposure-ms", 12.5);
    let restored = ImageTags::from_json(&tags.to_json().unwrap()).unwrap();
    assert_eq!(restored, tags);
}

#[test]
fn test_summary_ordering_defaults() {
    let summary = SummaryMetadata::from_json("{}").unwrap();
    assert!(summary.slices_first);
    assert!(!summary.time_first);
    assert_eq!(summary.ordering(), LabelOrdering::default());
}

#[test]
fn test_summary_roundtrip_keeps_extra_keys() {
    let json = r#"{"Prefix":"run","Channels":2,"Slices":3,"Frames":4,"Positions":1,
        "SlicesFirst":false,"TimeFirst":true,"z-step_um":0.5,"MicroscopeName":"scope-1"}"#;
    let summary = SummaryMetadata::from_json(json).unwrap();
    assert_eq!(summary.prefix, "run");
    assert_eq!(summary.channels, 2);
    assert_eq!(summary.z_step_um, Some(0.5));
    assert_eq!(summary.ordering(), LabelOrdering::new(false, true));
    assert_eq!(summary.extra.get("MicroscopeName"), Some(&json!("scope-1")));

    let restored = SummaryMetadata::from_json(&summary.to_json().unwrap()).unwrap();
    assert_eq!(restored, summary);
}

#[test]
fn test_display_settings_blocks() {
    let mut settings = DisplaySettings::for_channels(["DAPI", "GFP"]);
    settings.channels[1].color = 0x00FF00;
    settings.set_summary_comment("good cells");
    settings.set_image_comment(ImageLabel::new(1, 0, 2, 0), "blurred");

    let channels = settings.channels_json().unwrap();
    let comments = settings.comments_json().unwrap();
    let restored = DisplaySettings::from_blocks(Some(&channels), Some(&comments)).unwrap();
    assert_eq!(restored, settings);
    assert_eq!(
        restored.image_comment(&ImageLabel::new(1, 0, 2, 0)),
        Some("blurred")
    );

    let empty = DisplaySettings::from_blocks(None, Some("")).unwrap();
    assert_eq!(empty, DisplaySettings::default());
}

#[test]
fn test_ome_serialize_is_repeatable() {
    let summary = SummaryMetadata::new("run", 1, 1, 2, 1);
    let mut builder = OmeMetadataBuilder::new(summary);
    add(&mut builder, ImageLabel::new(0, 0, 0, 0), 0);
    add(&mut builder, ImageLabel::new(0, 0, 1, 0), 1);

    let first = builder.serialize().unwrap();
    let second = builder.serialize().unwrap();
    assert_eq!(first, second);
    assert_eq!(builder.serialized_len().unwrap(), first.len());
    assert!(first.contains("SizeT=\"2\""));
    assert!(first.contains("<UUID FileName=\"a.ome.tif\">urn:uuid:a.ome.tif</UUID>"));
    assert_eq!(OmeDocument::classify(&first).unwrap(), OmeDocument::Full);
}

#[test]
fn test_ome_fill_in_missing_tiff_datas() {
    let summary = SummaryMetadata::new("run", 2, 1, 10, 1);
    let mut builder = OmeMetadataBuilder::new(summary);
    for t in 0..5 {
        add(&mut builder, ImageLabel::new(0, 0, t, 0), t * 2);
    }
    for t in 0..3 {
        add(&mut builder, ImageLabel::new(1, 0, t, 0), t * 2 + 1);
    }

    builder.set_num_frames(0, 5);
    let added = builder.fill_in_missing_tiff_datas(4, 0);
    assert_eq!(added, 2);
    assert_eq!(builder.filler_count(), 2);
    assert_eq!(builder.num_frames(0), 5);

    let xml = builder.serialize().unwrap();
    assert!(xml.contains("SizeT=\"5\""));
    assert!(xml.contains("FirstC=\"1\" FirstZ=\"0\" FirstT=\"4\" PlaneCount=\"0\""));

    // Idempotent once the gaps are filled.
    assert_eq!(builder.fill_in_missing_tiff_datas(4, 0), 0);
}

#[test]
fn test_ome_fill_clamped_to_declared_frames() {
    let summary = SummaryMetadata::new("run", 1, 1, 0, 2);
    let mut builder = OmeMetadataBuilder::new(summary);
    add(&mut builder, ImageLabel::new(0, 0, 0, 1), 0);
    builder.set_num_frames(1, 1);
    assert_eq!(builder.fill_in_missing_tiff_datas(9, 1), 0);
    assert_eq!(builder.fill_in_missing_tiff_datas(9, 0), 0);
}

#[test]
fn test_pointer_round_trip() {
    let pointer = pointer_to_master("run_MMStack_Pos0.ome.tif", "urn:uuid:1234").unwrap();
    match OmeDocument::classify(&pointer).unwrap() {
        OmeDocument::Pointer(file) => {
            assert_eq!(file.file_name, "run_MMStack_Pos0.ome.tif");
            assert_eq!(file.uuid, "urn:uuid:1234");
        }
        other => panic!("expected pointer, got {:?}", other),
    }
    assert_eq!(OmeDocument::classify("  ").unwrap(), OmeDocument::Empty);
}
