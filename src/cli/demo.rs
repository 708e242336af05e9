use anyhow::{Context, Result};
use log::info;
use std::path::PathBuf;
use std::time::Instant;

use mptiff::image::TaggedImage;
use mptiff::label::ImageLabel;
use mptiff::metadata::{keys, PixelType, SummaryMetadata};
use mptiff::storage::{ImageStorage, StorageConfig, StorageEngine};

use super::config::Config;

/// Parameters of a synthetic acquisition
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub output: PathBuf,
    pub prefix: String,
    pub channels: u32,
    pub slices: u32,
    pub frames: u32,
    pub positions: u32,
    pub size: u32,
    pub pixel_type: PixelType,
    pub abort_after: Option<usize>,
    pub config: Option<PathBuf>,
}

const CHANNEL_NAMES: [&str; 4] = ["DAPI", "FITC", "TRITC", "Cy5"];
const INTERVAL_MS: f64 = 500.0;
const PIXEL_SIZE_UM: f64 = 0.65;
const Z_STEP_UM: f64 = 1.5;

/// Write a synthetic acquisition
pub fn run(opts: DemoOptions) -> Result<()> {
    info!("mptiff demo acquisition");
    info!("=======================");

    let mut config = StorageConfig::new_dataset(&opts.output);
    if let Some(path) = &opts.config {
        info!("Loading settings from {}", path.display());
        config = Config::from_file(path)?.apply(config);
    }

    let channel_names: Vec<String> = (0..opts.channels)
        .map(|c| {
            CHANNEL_NAMES
                .get(c as usize)
                .map_or_else(|| format!("Ch{}", c), |name| name.to_string())
        })
        .collect();
    let mut summary = SummaryMetadata::new(
        opts.prefix.clone(),
        opts.channels,
        opts.slices,
        opts.frames,
        opts.positions,
    )
    .with_image_size(opts.size, opts.size, opts.pixel_type)
    .with_channel_names(channel_names.iter().cloned());
    summary.pixel_size_um = Some(PIXEL_SIZE_UM);
    summary.z_step_um = Some(Z_STEP_UM);
    summary.interval_ms = Some(INTERVAL_MS);
    summary.comment = Some("Synthetic acquisition written by mptiff demo".to_string());

    info!("Creating dataset: {}", opts.output.display());
    let engine = StorageEngine::create(config, summary).context("Failed to create dataset")?;

    let planned = (opts.channels * opts.slices * opts.frames * opts.positions) as usize;
    let limit = opts.abort_after.unwrap_or(planned).min(planned);
    info!(
        "Writing {} of {} planes ({}x{} {})",
        limit,
        planned,
        opts.size,
        opts.size,
        opts.pixel_type
    );

    let start = Instant::now();
    let mut written = 0usize;
    'acquisition: for t in 0..opts.frames {
        for p in 0..opts.positions {
            for c in 0..opts.channels {
                for z in 0..opts.slices {
                    if written == limit {
                        info!("Aborting acquisition after {} planes", written);
                        break 'acquisition;
                    }
                    let label = ImageLabel::new(c, z, t, p);
                    let image = synthetic_plane(label, &opts, &channel_names);
                    engine
                        .put_image(image)
                        .with_context(|| format!("Failed to write plane {}", label))?;
                    written += 1;
                }
            }
        }
        info!("  Frame {} queued", t);
    }

    engine.finished().context("Failed to finish dataset")?;
    let elapsed = start.elapsed();

    info!("Acquisition complete!");
    println!("Dataset: {}", engine.disk_location().display());
    println!("  Planes requested: {}", written);
    println!("  Planes stored:    {}", engine.num_images());
    println!("  Bytes on disk:    {}", engine.data_set_size());
    println!(
        "  Throughput:       {:.1} MB/s",
        engine.data_set_size() as f64 / 1e6 / elapsed.as_secs_f64().max(1e-9)
    );
    engine.close();
    Ok(())
}

/// Gradient plane whose brightness encodes the label, so planes are told apart at a glance
fn synthetic_plane(label: ImageLabel, opts: &DemoOptions, channel_names: &[String]) -> TaggedImage {
    let mut image = TaggedImage::blank(label, opts.size, opts.size, opts.pixel_type);
    let size = opts.size as usize;
    let offset = (label.channel * 4000 + label.slice * 500 + label.frame * 60) as usize;
    match opts.pixel_type {
        PixelType::Gray8 => {
            for (i, px) in image.pixels.iter_mut().enumerate() {
                let (x, y) = (i % size, i / size);
                *px = ((x + y + offset / 60) % 256) as u8;
            }
        }
        PixelType::Gray16 => {
            for (i, px) in image.pixels.chunks_exact_mut(2).enumerate() {
                let (x, y) = (i % size, i / size);
                let value = ((x * 16 + y * 16 + offset) % 65536) as u16;
                px.copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    let tags = &mut image.tags;
    tags.insert(keys::ELAPSED_TIME_MS, label.frame as f64 * INTERVAL_MS);
    tags.insert(keys::X_POSITION_UM, label.position as f64 * 1000.0);
    tags.insert(keys::Y_POSITION_UM, 0.0);
    tags.insert(keys::Z_POSITION_UM, label.slice as f64 * Z_STEP_UM);
    tags.insert(keys::POSITION_NAME, format!("Pos{}", label.position));
    if let Some(name) = channel_names.get(label.channel as usize) {
        tags.insert(keys::CHANNEL, name.as_str());
    }
    image
}
