use std::collections::BTreeSet;

use crate::types::{Chunk, ChunkId};

/// Chunk ids marked in the current view. Never persisted; a reload of the
/// view starts from an empty selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<ChunkId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only ids present in `view`; unknown ids are dropped.
    pub fn from_ids<I, S>(view: &[Chunk], ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sel = Self::new();
        for id in ids {
            let id = id.as_ref();
            if view.iter().any(|c| c.id == id) {
                sel.ids.insert(id.to_string());
            }
        }
        sel
    }

    pub fn select(&mut self, id: impl Into<ChunkId>) {
        self.ids.insert(id.into());
    }

    pub fn deselect(&mut self, id: &str) {
        self.ids.remove(id);
    }

    /// Flips the mark and returns the new state.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn select_all(&mut self, view: &[Chunk]) {
        self.ids.extend(view.iter().map(|c| c.id.clone()));
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<ChunkId> {
        self.ids.iter().cloned().collect()
    }
}
