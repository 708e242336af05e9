use anyhow::{Context, Result};
use std::path::PathBuf;

use mptiff::metadata::OmeDocument;
use mptiff::storage::{ImageStorage, StorageEngine, SIDECAR_FILE_NAME};
use mptiff::tiff::{IndexSource, TiffReader};

/// Summarize a dataset directory
pub fn run(dir: PathBuf) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let engine = StorageEngine::open(&dir)
        .with_context(|| format!("Failed to open dataset {}", dir.display()))?;
    let summary = engine.summary_metadata();

    println!("mptiff Dataset Information");
    println!("==========================");
    println!("Directory: {}", dir.display());
    println!();

    println!("Summary:");
    println!("  Prefix: {}", summary.prefix);
    println!(
        "  Planned: {} channels x {} slices x {} frames x {} positions",
        summary.channels, summary.slices, summary.frames, summary.positions
    );
    if let Some(start) = &summary.start_time {
        println!("  Started: {}", start);
    }
    println!(
        "  Ordering: slices first = {}, time first = {}",
        summary.slices_first, summary.time_first
    );
    println!();

    println!("Images:");
    println!("  Stored: {}", engine.num_images());
    if let Some(max) = engine.max_indices() {
        println!(
            "  Extent: {} channels, {} slices, {} frames, {} positions",
            max.channel + 1,
            max.slice + 1,
            max.frame + 1,
            max.position + 1
        );
    }
    let keys = engine.image_keys();
    if let (Some(first), Some(last)) = (keys.first(), keys.last()) {
        println!("  First label: {}", first);
        println!("  Last label:  {}", last);
    }
    println!("  Bytes on disk: {}", engine.data_set_size());
    println!();

    println!("Files:");
    let mut master = None;
    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name == SIDECAR_FILE_NAME {
            println!("  {:40} OME-XML sidecar", name);
            master = Some(name);
            continue;
        }
        let Ok(reader) = TiffReader::open(&path) else {
            continue;
        };
        let index = match reader.index_source() {
            IndexSource::IndexMap => "index map",
            IndexSource::Recovered => "recovered",
            IndexSource::Live => "live",
        };
        let role = match reader.ome_xml().ok().and_then(|xml| OmeDocument::classify(&xml).ok()) {
            Some(OmeDocument::Full) => {
                master = Some(name.clone());
                "OME-XML master".to_string()
            }
            Some(OmeDocument::Pointer(target)) => format!("-> {}", target.file_name),
            Some(OmeDocument::Empty) => "no OME-XML".to_string(),
            None => "unreadable OME-XML".to_string(),
        };
        println!(
            "  {:40} {:5} planes, {:9}, {}",
            name,
            reader.num_images(),
            index,
            role
        );
        reader.close();
    }
    println!();
    match master {
        Some(name) => println!("Master: {}", name),
        None => println!("Master: none"),
    }

    let display = engine.display_and_comments();
    if !display.channels.is_empty() || !display.comments.is_empty() {
        println!();
        println!("Display settings:");
        for channel in &display.channels {
            println!(
                "  {:12} color #{:06X}, range {}..{}, gamma {}",
                channel.name, channel.color, channel.min, channel.max, channel.gamma
            );
        }
        for (key, comment) in &display.comments {
            println!("  Comment [{}]: {}", key, comment);
        }
    }

    engine.close();
    Ok(())
}
