use std::collections::HashMap;

use crate::label::ImageLabel;

use super::structure::Dataset;
use super::report::Step;
use super::ValidationReport;

/// Listed at most this many offenders per check
const MAX_LISTED: usize = 5;

fn listing(items: &[String]) -> String {
    let mut out = items.iter().take(MAX_LISTED).cloned().collect::<Vec<_>>().join(", ");
    if items.len() > MAX_LISTED {
        out.push_str(&format!(" and {} more", items.len() - MAX_LISTED));
    }
    out
}

/// Step 3: label uniqueness and tag consistency
pub(crate) fn check_labels(dataset: &Dataset, report: &mut ValidationReport) {
    let mut owners: HashMap<ImageLabel, &str> = HashMap::new();
    let mut duplicates = Vec::new();
    let mut mismatched = Vec::new();
    let mut unreadable = Vec::new();

    for reader in &dataset.readers {
        for label in reader.labels() {
            if let Some(first) = owners.insert(label, reader.file_name()) {
                duplicates.push(format!("{} in {} and {}", label, first, reader.file_name()));
            }
            match reader.read_tags(&label).and_then(|tags| Ok(tags.label()?)) {
                Ok(tagged) if tagged == label => {}
                Ok(tagged) => mismatched.push(format!(
                    "{}: indexed as {}, tagged {}",
                    reader.file_name(),
                    label,
                    tagged
                )),
                Err(e) => unreadable.push(format!("{} in {}: {}", label, reader.file_name(), e)),
            }
        }
    }

    if owners.is_empty() {
        report.warn(Step::Labels, "Planes indexed", "no plane in any file");
    } else {
        report.ok(Step::Labels, "Planes indexed");
    }

    if duplicates.is_empty() {
        report.ok(Step::Labels, "Labels unique");
    } else {
        report.fail(Step::Labels, "Labels unique", listing(&duplicates));
    }

    if mismatched.is_empty() && unreadable.is_empty() {
        report.ok(Step::Labels, "Plane tags match index");
    } else {
        let mut problems = mismatched;
        problems.extend(unreadable);
        report.fail(Step::Labels, "Plane tags match index", listing(&problems));
    }
}
