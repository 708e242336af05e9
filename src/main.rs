//! # mptiff
//!
//! Command-line companion for multi-page OME-TIFF datasets.
//!
//! ## Usage
//!
//! ```bash
//! # Write a synthetic 2-position acquisition
//! mptiff demo data/demo --positions 2 --frames 5
//!
//! # Stop early to exercise aborted-frame completion
//! mptiff demo data/aborted --abort-after 7
//!
//! # Summarize and validate
//! mptiff info data/demo
//! mptiff validate data/demo
//! ```

use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
