// In: src/reader/range.rs

use std::fmt;
use std::sync::Arc;

use super::Entry;

/// An ordered selection of an archive's entries.
///
/// Holds the shared entry allocations themselves, so a range stays valid for
/// as long as it is kept and can be sliced without touching the archive.
#[derive(Clone, Default)]
pub struct EntryRange {
    entries: Vec<Arc<Entry>>,
}

impl EntryRange {
    pub(crate) fn new(entries: Vec<Arc<Entry>>) -> Self {
        Self { entries }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// At most `max_results` entries starting at `start`. Out-of-range starts
    /// give an empty range.
    pub fn offset(&self, start: usize, max_results: usize) -> EntryRange {
        let entries = self
            .entries
            .iter()
            .skip(start)
            .take(max_results)
            .cloned()
            .collect();
        EntryRange { entries }
    }

    pub fn get(&self, position: usize) -> Option<&Arc<Entry>> {
        self.entries.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Entry>> {
        self.entries.iter()
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.path().to_string()).collect()
    }
}

impl IntoIterator for EntryRange {
    type Item = Arc<Entry>;
    type IntoIter = std::vec::IntoIter<Arc<Entry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a EntryRange {
    type Item = &'a Arc<Entry>;
    type IntoIter = std::slice::Iter<'a, Arc<Entry>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Debug for EntryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRange")
            .field("size", &self.entries.len())
            .finish()
    }
}
