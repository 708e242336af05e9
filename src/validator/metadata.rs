use std::fs;

use crate::metadata::OmeDocument;
use crate::storage::SIDECAR_FILE_NAME;

use super::structure::Dataset;
use super::report::{FileEntry, OmeRole, Step};
use super::ValidationReport;

/// Step 2: OME-XML master and pointers
pub(crate) fn check_ome_metadata(dataset: &Dataset, report: &mut ValidationReport) {
    let mut masters = Vec::new();
    let mut pointers = Vec::new();
    let mut empty = Vec::new();
    let mut malformed = Vec::new();

    for reader in &dataset.readers {
        let document = reader
            .ome_xml()
            .map_err(|e| e.to_string())
            .and_then(|xml| OmeDocument::classify(&xml).map_err(|e| e.to_string()));
        let role = match document {
            Ok(OmeDocument::Full) => {
                masters.push(reader.file_name().to_string());
                OmeRole::Master
            }
            Ok(OmeDocument::Pointer(target)) => {
                let role = OmeRole::Pointer(target.file_name.clone());
                pointers.push((reader, target));
                role
            }
            Ok(OmeDocument::Empty) => {
                empty.push(reader.file_name().to_string());
                OmeRole::Unwritten
            }
            Err(e) => {
                malformed.push(format!("{}: {}", reader.file_name(), e));
                OmeRole::Unreadable
            }
        };
        report.set_ome_role(reader.file_name(), role);
    }

    let sidecar = dataset.directory.join(SIDECAR_FILE_NAME);
    if sidecar.is_file() {
        let role = match fs::read_to_string(&sidecar)
            .map_err(|e| e.to_string())
            .and_then(|xml| OmeDocument::classify(&xml).map_err(|e| e.to_string()))
        {
            Ok(OmeDocument::Full) => {
                masters.push(SIDECAR_FILE_NAME.to_string());
                OmeRole::Master
            }
            Ok(_) => {
                malformed.push(format!("{}: not a full OME-XML document", SIDECAR_FILE_NAME));
                OmeRole::Unreadable
            }
            Err(e) => {
                malformed.push(format!("{}: {}", SIDECAR_FILE_NAME, e));
                OmeRole::Unreadable
            }
        };
        report.add_file(FileEntry {
            file_name: SIDECAR_FILE_NAME.to_string(),
            planes: 0,
            index_source: None,
            ome_role: Some(role),
        });
    }

    if malformed.is_empty() {
        report.ok(Step::OmeXml, "OME-XML parseable");
    } else {
        report.fail(Step::OmeXml, "OME-XML parseable", malformed.join("; "));
    }

    if !empty.is_empty() {
        report.warn(
            Step::OmeXml,
            "OME-XML written",
            format!(
                "no description in {} (dataset not finished?)",
                empty.join(", ")
            ),
        );
    }

    match masters.len() {
        1 => report.ok(Step::OmeXml, "Exactly one OME-XML master"),
        0 => report.fail(
            Step::OmeXml,
            "Exactly one OME-XML master",
            "no file holds the full OME-XML document",
        ),
        _ => report.fail(
            Step::OmeXml,
            "Exactly one OME-XML master",
            format!("found {}: {}", masters.len(), masters.join(", ")),
        ),
    }

    let mut dangling = Vec::new();
    for (reader, target) in &pointers {
        let resolved = match reader.resolve_ome_xml(&dataset.directory) {
            Ok(Some(xml)) => matches!(OmeDocument::classify(&xml), Ok(OmeDocument::Full)),
            Ok(None) => false,
            Err(e) => {
                log::debug!("{}: pointer to {} failed: {}", reader.file_name(), target.file_name, e);
                false
            }
        };
        if !resolved || !masters.contains(&target.file_name) {
            dangling.push(format!("{} -> {}", reader.file_name(), target.file_name));
        }
    }
    if dangling.is_empty() {
        report.ok(Step::OmeXml, "Pointers resolve");
    } else {
        report.fail(Step::OmeXml, "Pointers resolve", dangling.join(", "));
    }
}
