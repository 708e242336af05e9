use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::tiff::{is_tiff_name, IndexSource, TiffReader};

use super::report::{FileEntry, Step};
use super::{ValidationError, ValidationReport};

/// Files of the dataset that opened successfully
pub(crate) struct Dataset {
    pub(crate) directory: PathBuf,
    pub(crate) readers: Vec<TiffReader>,
}

impl Dataset {
    pub(crate) fn close(&self) {
        for reader in &self.readers {
            reader.close();
        }
    }
}

/// Step 1: Structure validation
pub(crate) fn check_structure(path: &Path, report: &mut ValidationReport) -> Result<Dataset> {
    if !path.exists() {
        report.fail(
            Step::Structure,
            "Path exists",
            format!("Path does not exist: {}", path.display()),
        );
        anyhow::bail!(ValidationError::StructureError("Path does not exist".to_string()));
    }
    report.ok(Step::Structure, "Path exists");

    let directory = if path.is_dir() {
        path.to_path_buf()
    } else {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        report.warn(
            Step::Structure,
            "Dataset directory",
            format!("{} is a file; validating {}", path.display(), parent.display()),
        );
        parent.to_path_buf()
    };

    let mut paths: Vec<PathBuf> = fs::read_dir(&directory)
        .with_context(|| format!("Failed to list {}", directory.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .is_some_and(|name| is_tiff_name(&name.to_string_lossy()))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        report.fail(
            Step::Structure,
            "TIFF files present",
            "No .tif/.tiff files in directory",
        );
        anyhow::bail!(ValidationError::StructureError(
            "No TIFF files to validate".to_string()
        ));
    }
    report.ok(Step::Structure, "TIFF files present");

    let mut readers = Vec::with_capacity(paths.len());
    let mut unreadable = Vec::new();
    let mut recovered = Vec::new();
    for path in &paths {
        match TiffReader::open(path) {
            Ok(reader) => {
                if reader.index_source() == IndexSource::Recovered {
                    recovered.push(reader.file_name().to_string());
                }
                report.add_file(FileEntry {
                    file_name: reader.file_name().to_string(),
                    planes: reader.num_images(),
                    index_source: Some(reader.index_source()),
                    ome_role: None,
                });
                readers.push(reader);
            }
            Err(e) => unreadable.push(format!("{}: {}", path.display(), e)),
        }
    }

    if unreadable.is_empty() {
        report.ok(Step::Structure, "All files open");
    } else {
        report.fail(Step::Structure, "All files open", unreadable.join("; "));
    }

    if recovered.is_empty() {
        report.ok(Step::Structure, "Index maps present");
    } else {
        report.warn(
            Step::Structure,
            "Index maps present",
            format!("rebuilt from IFD chain: {}", recovered.join(", ")),
        );
    }

    match readers.iter().find_map(|r| r.summary_metadata().ok()) {
        Some(_) => report.ok(Step::Structure, "Summary metadata readable"),
        None if !readers.is_empty() => report.warn(
            Step::Structure,
            "Summary metadata readable",
            "No file carries parseable summary metadata",
        ),
        None => {}
    }

    if readers.is_empty() {
        anyhow::bail!(ValidationError::StructureError(
            "No TIFF file could be opened".to_string()
        ));
    }

    Ok(Dataset { directory, readers })
}
