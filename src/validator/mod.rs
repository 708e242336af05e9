//! # Dataset Validation Module
//!
//! Integrity checks for a finished dataset directory, run without going through
//! [`StorageEngine`](crate::storage::StorageEngine) so that damaged datasets
//! still produce a useful report.
//!
//! ## Validation Checklist
//!
//! 1. **Structure Check**: the directory holds TIFF files and each one opens,
//!    with its index map present or recoverable from the IFD chain
//! 2. **OME-XML Check**: exactly one file (or the sidecar) holds the full
//!    document and every pointer resolves to it
//! 3. **Label Check**: no label is stored twice and every plane's tags agree
//!    with the label it is indexed under
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mptiff::validator::validate_dataset;
//! use std::path::Path;
//!
//! match validate_dataset(Path::new("data/run")) {
//!     Ok(report) => println!("{}", report),
//!     Err(e) => eprintln!("Validation failed: {}", e),
//! }
//! ```

use std::path::Path;

use anyhow::Result;

pub use report::{CheckStatus, FileEntry, OmeRole, Step, ValidationCheck, ValidationReport};

mod labels;
mod metadata;
mod report;
mod structure;

/// Validation error types
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Error in directory structure
    #[error("Structure error: {0}")]
    StructureError(String),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Main validation entry point.
///
/// `path` may be the dataset directory or any file inside it. Returns an
/// error only when there is nothing to validate; problems with individual
/// files are recorded in the report.
pub fn validate_dataset(path: &Path) -> Result<ValidationReport> {
    let mut report = ValidationReport::new(path.display().to_string());

    // 1. Structure Check
    let dataset = structure::check_structure(path, &mut report)?;

    // 2. OME-XML Check
    metadata::check_ome_metadata(&dataset, &mut report);

    // 3. Label Check
    labels::check_labels(&dataset, &mut report);

    dataset.close();
    Ok(report)
}
