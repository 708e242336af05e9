//! Validation report: one table row per dataset file, then the checks grouped
//! under the step that produced them.

use std::fmt;

#[cfg(feature = "colorized_output")]
use console::style;

use crate::tiff::IndexSource;

/// Validation step a check belongs to, in the order the steps run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    /// Files present, openable, and indexed
    Structure,
    /// OME-XML master and pointers
    OmeXml,
    /// Label uniqueness and tag agreement
    Labels,
}

impl Step {
    const ALL: [Step; 3] = [Step::Structure, Step::OmeXml, Step::Labels];

    fn title(self) -> &'static str {
        match self {
            Step::Structure => "Structure",
            Step::OmeXml => "OME-XML",
            Step::Labels => "Labels",
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed
    Ok,
    /// Check passed, but something looks off
    Warning(String),
    /// Check failed
    Failed(String),
}

impl CheckStatus {
    /// Whether the check passed without warnings
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckStatus::Ok)
    }

    /// Whether the check produced a warning
    pub fn is_warning(&self) -> bool {
        matches!(self, CheckStatus::Warning(_))
    }

    /// Whether the check failed
    pub fn is_failed(&self) -> bool {
        matches!(self, CheckStatus::Failed(_))
    }
}

/// One named check and its outcome
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    /// Step that ran the check
    pub step: Step,
    /// Name of the check
    pub name: String,
    /// Outcome
    pub status: CheckStatus,
}

/// What a file contributes to the dataset's OME-XML
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OmeRole {
    /// Holds the full document
    Master,
    /// Points at the named master
    Pointer(String),
    /// No description written yet
    Unwritten,
    /// Description present but not parseable
    Unreadable,
}

impl fmt::Display for OmeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OmeRole::Master => write!(f, "OME-XML master"),
            OmeRole::Pointer(target) => write!(f, "-> {}", target),
            OmeRole::Unwritten => write!(f, "no OME-XML"),
            OmeRole::Unreadable => write!(f, "unreadable OME-XML"),
        }
    }
}

/// One file of the dataset as seen by the validator
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File name inside the dataset directory
    pub file_name: String,
    /// Planes indexed in the file
    pub planes: usize,
    /// Where the index came from; `None` for the OME-XML sidecar
    pub index_source: Option<IndexSource>,
    /// Filled in by the OME-XML step
    pub ome_role: Option<OmeRole>,
}

#[derive(Clone, Copy)]
enum Tone {
    Title,
    Good,
    Warn,
    Bad,
}

/// Everything the validator found in one dataset directory
#[derive(Debug)]
pub struct ValidationReport {
    /// Path that was validated
    pub dataset_path: String,
    /// Files that opened, in directory order
    pub files: Vec<FileEntry>,
    /// Checks in the order they ran
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    /// Empty report for `dataset_path`
    pub fn new(dataset_path: impl Into<String>) -> Self {
        Self {
            dataset_path: dataset_path.into(),
            files: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub(crate) fn ok(&mut self, step: Step, name: impl Into<String>) {
        self.push(step, name, CheckStatus::Ok);
    }

    pub(crate) fn warn(&mut self, step: Step, name: impl Into<String>, message: impl Into<String>) {
        self.push(step, name, CheckStatus::Warning(message.into()));
    }

    pub(crate) fn fail(&mut self, step: Step, name: impl Into<String>, message: impl Into<String>) {
        self.push(step, name, CheckStatus::Failed(message.into()));
    }

    fn push(&mut self, step: Step, name: impl Into<String>, status: CheckStatus) {
        self.checks.push(ValidationCheck {
            step,
            name: name.into(),
            status,
        });
    }

    pub(crate) fn add_file(&mut self, entry: FileEntry) {
        self.files.push(entry);
    }

    pub(crate) fn set_ome_role(&mut self, file_name: &str, role: OmeRole) {
        if let Some(entry) = self.files.iter_mut().find(|f| f.file_name == file_name) {
            entry.ome_role = Some(role);
        }
    }

    /// First check named `name`
    pub fn check(&self, name: &str) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Table row of `file_name`
    pub fn file(&self, file_name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.file_name == file_name)
    }

    /// Checks run by `step`
    pub fn step_checks(&self, step: Step) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(move |c| c.step == step)
    }

    /// Whether any check failed
    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status.is_failed())
    }

    /// Whether any check warned
    pub fn has_warnings(&self) -> bool {
        self.checks.iter().any(|c| c.status.is_warning())
    }

    fn count(&self, pred: fn(&CheckStatus) -> bool) -> usize {
        self.checks.iter().filter(|c| pred(&c.status)).count()
    }

    fn render(&self, paint: impl Fn(Tone, &str) -> String) -> String {
        let mut out = String::new();
        out.push_str(&paint(Tone::Title, "mptiff validation report"));
        out.push_str(&format!("\nDataset: {}\n", self.dataset_path));

        if !self.files.is_empty() {
            out.push_str("\nFiles:\n");
            for file in &self.files {
                let index = match file.index_source {
                    Some(IndexSource::IndexMap) => "index map",
                    Some(IndexSource::Recovered) => "recovered",
                    Some(IndexSource::Live) => "live",
                    None => "-",
                };
                let role = file
                    .ome_role
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                out.push_str(&format!(
                    "  {:40} {:>6} planes  {:10} {}\n",
                    file.file_name, file.planes, index, role
                ));
            }
        }

        for (n, step) in Step::ALL.iter().enumerate() {
            let mut checks = self.step_checks(*step).peekable();
            if checks.peek().is_none() {
                continue;
            }
            out.push_str(&format!("\n[{}] {}\n", n + 1, paint(Tone::Title, step.title())));
            for check in checks {
                let line = match &check.status {
                    CheckStatus::Ok => format!("  {} {}", paint(Tone::Good, "✓"), check.name),
                    CheckStatus::Warning(msg) => {
                        format!("  {} {}: {}", paint(Tone::Warn, "⚠"), check.name, msg)
                    }
                    CheckStatus::Failed(msg) => {
                        format!("  {} {}: {}", paint(Tone::Bad, "✗"), check.name, msg)
                    }
                };
                out.push_str(&line);
                out.push('\n');
            }
        }

        let (passed, warned, failed) = (
            self.count(CheckStatus::is_ok),
            self.count(CheckStatus::is_warning),
            self.count(CheckStatus::is_failed),
        );
        out.push_str(&format!(
            "\n{} files, {} passed, {} warnings, {} failed\n",
            self.files.len(),
            passed,
            warned,
            failed
        ));
        let verdict = if self.has_failures() {
            paint(Tone::Bad, "Validation FAILED")
        } else if self.has_warnings() {
            paint(Tone::Warn, "Validation PASSED with warnings")
        } else {
            paint(Tone::Good, "Validation PASSED")
        };
        out.push_str(&verdict);
        out.push('\n');
        out
    }

    /// Render with terminal colours when built with `colorized_output`
    pub fn format_colored(&self) -> String {
        #[cfg(feature = "colorized_output")]
        {
            self.render(|tone, s| match tone {
                Tone::Title => style(s).bold().cyan().to_string(),
                Tone::Good => style(s).green().to_string(),
                Tone::Warn => style(s).yellow().bold().to_string(),
                Tone::Bad => style(s).red().bold().to_string(),
            })
        }

        #[cfg(not(feature = "colorized_output"))]
        {
            self.to_string()
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(|_, s| s.to_string()))
    }
}
