//! Dataset-wide read index.
//!
//! Labels map to file names in a sorted map keyed by the dataset's
//! [`LabelOrdering`]; file names map to the one reader owned for that file.
//! Closing therefore touches every reader exactly once however many labels
//! point at it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::label::{ImageLabel, LabelOrdering, SortKey};
use crate::tiff::TiffReader;

/// Sorted label index plus owning reader table
#[derive(Debug, Default)]
pub struct LabelIndex {
    ordering: LabelOrdering,
    labels: BTreeMap<SortKey, String>,
    readers: HashMap<String, Arc<TiffReader>>,
}

impl LabelIndex {
    /// Empty index with the given ordering
    pub fn new(ordering: LabelOrdering) -> Self {
        Self {
            ordering,
            ..Self::default()
        }
    }

    /// Ordering used for iteration
    pub fn ordering(&self) -> LabelOrdering {
        self.ordering
    }

    /// Re-key every label under a new ordering.
    pub fn set_ordering(&mut self, ordering: LabelOrdering) {
        if ordering == self.ordering {
            return;
        }
        let old = self.ordering;
        self.labels = std::mem::take(&mut self.labels)
            .into_iter()
            .map(|(key, file)| (ordering.sort_key(&old.label_from_key(&key)), file))
            .collect();
        self.ordering = ordering;
    }

    /// Take ownership of a reader. A reader for the same file name is kept as is.
    pub fn add_reader(&mut self, reader: Arc<TiffReader>) -> Arc<TiffReader> {
        Arc::clone(
            self.readers
                .entry(reader.file_name().to_string())
                .or_insert(reader),
        )
    }

    /// Point `label` at `reader`'s file. Returns false if the label was already indexed.
    pub fn register(&mut self, label: ImageLabel, reader: &Arc<TiffReader>) -> bool {
        let reader = self.add_reader(Arc::clone(reader));
        let key = self.ordering.sort_key(&label);
        if self.labels.contains_key(&key) {
            return false;
        }
        self.labels.insert(key, reader.file_name().to_string());
        true
    }

    /// Reader holding `label`
    pub fn reader_for(&self, label: &ImageLabel) -> Option<Arc<TiffReader>> {
        let file = self.labels.get(&self.ordering.sort_key(label))?;
        self.readers.get(file).cloned()
    }

    /// Whether `label` is indexed
    pub fn contains(&self, label: &ImageLabel) -> bool {
        self.labels.contains_key(&self.ordering.sort_key(label))
    }

    /// Every label, in dataset order
    pub fn labels(&self) -> Vec<ImageLabel> {
        self.labels
            .keys()
            .map(|key| self.ordering.label_from_key(key))
            .collect()
    }

    /// Number of indexed labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether no label is indexed
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Largest channel, slice, frame, and position seen, each independently
    pub fn max_indices(&self) -> Option<ImageLabel> {
        self.labels.keys().fold(None, |acc, key| {
            let label = self.ordering.label_from_key(key);
            Some(match acc {
                None => label,
                Some(max) => ImageLabel::new(
                    max.channel.max(label.channel),
                    max.slice.max(label.slice),
                    max.frame.max(label.frame),
                    max.position.max(label.position),
                ),
            })
        })
    }

    /// Owned readers, sorted by file name
    pub fn readers(&self) -> Vec<Arc<TiffReader>> {
        let mut readers: Vec<_> = self.readers.values().cloned().collect();
        readers.sort_by(|a, b| a.file_name().cmp(b.file_name()));
        readers
    }

    /// Close each owned reader once. Returns how many were still open.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for reader in self.readers.values() {
            if !reader.is_closed() {
                reader.close();
                closed += 1;
            }
        }
        closed
    }
}
