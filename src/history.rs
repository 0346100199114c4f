//! Append-only log of settled rounds.

use parking_lot::RwLock;

use crate::types::HistoryEntry;

#[derive(Default)]
pub struct HistoryLog {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub(crate) fn append(&self, entry: HistoryEntry) {
        self.entries.write().push(entry);
    }

    /// The `n` most recent entries, most recent first.
    pub fn latest(&self, n: usize) -> Vec<HistoryEntry> {
        self.entries.read().iter().rev().take(n).cloned().collect()
    }

    pub fn get(&self, round_number: u64) -> Option<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|e| e.round_number == round_number)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry, oldest first.
    pub fn export(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }
}
