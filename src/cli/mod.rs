use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use mptiff::metadata::PixelType;

mod config;
mod demo;
mod info;
mod validate;

/// mptiff - multi-page OME-TIFF acquisition storage
#[derive(Parser)]
#[command(name = "mptiff")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Pixel type of generated planes
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum PixelTypeArg {
    /// 8 bits per pixel
    Gray8,
    /// 16 bits per pixel
    #[default]
    Gray16,
}

impl From<PixelTypeArg> for PixelType {
    fn from(arg: PixelTypeArg) -> Self {
        match arg {
            PixelTypeArg::Gray8 => PixelType::Gray8,
            PixelTypeArg::Gray16 => PixelType::Gray16,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic acquisition
    Demo {
        /// Dataset directory to create
        #[arg(value_name = "OUTPUT", default_value = "mptiff_demo")]
        output: PathBuf,

        /// File name prefix
        #[arg(long, default_value = "demo")]
        prefix: String,

        /// Number of channels
        #[arg(short = 'c', long, default_value_t = 2)]
        channels: u32,

        /// Number of z-slices
        #[arg(short = 'z', long, default_value_t = 3)]
        slices: u32,

        /// Number of time frames
        #[arg(short = 't', long, default_value_t = 4)]
        frames: u32,

        /// Number of stage positions
        #[arg(short = 'p', long, default_value_t = 1)]
        positions: u32,

        /// Plane width and height in pixels
        #[arg(long, default_value_t = 256)]
        size: u32,

        /// Pixel type of the planes
        #[arg(long, default_value = "gray16", value_enum)]
        pixel_type: PixelTypeArg,

        /// Stop after this many planes, leaving the last frame incomplete
        #[arg(long, value_name = "PLANES")]
        abort_after: Option<usize>,

        /// Load storage settings from a TOML config file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Summarize a dataset: files, labels, master file, ordering
    Info {
        /// Dataset directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Validate dataset integrity
    Validate {
        /// Dataset directory (or a file inside it)
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Demo {
            output,
            prefix,
            channels,
            slices,
            frames,
            positions,
            size,
            pixel_type,
            abort_after,
            config,
        } => demo::run(demo::DemoOptions {
            output,
            prefix,
            channels,
            slices,
            frames,
            positions,
            size,
            pixel_type: PixelType::from(pixel_type),
            abort_after,
            config,
        }),
        Commands::Info { dir } => info::run(dir),
        Commands::Validate { path } => validate::run(path),
    }
}
