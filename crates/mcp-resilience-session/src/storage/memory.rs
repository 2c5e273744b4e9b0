//! In-memory note storage.

use std::sync::{PoisonError, RwLock};

use mcp_resilience_core::{Note, NoteId, NoteStorage, Origin};

/// In-memory note storage.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryNoteStore {
    notes: RwLock<Vec<Note>>,
}

impl MemoryNoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a note by id.
    #[must_use]
    pub fn get(&self, id: NoteId) -> Option<Note> {
        self.notes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|note| note.id == id)
            .cloned()
    }

    /// Number of stored notes across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no notes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NoteStorage for MemoryNoteStore {
    fn insert(&self, note: Note) {
        self.notes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(note);
    }

    fn mark_mirrored(&self, id: NoteId) -> Option<Note> {
        let mut notes = self.notes.write().unwrap_or_else(PoisonError::into_inner);
        let note = notes.iter_mut().find(|note| note.id == id)?;
        if note.origin == Origin::Local {
            note.origin = Origin::Both;
        }
        Some(note.clone())
    }

    fn list(&self, category: &str) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .notes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|note| note.category == category)
            .cloned()
            .collect();
        notes.sort_by_key(|note| note.created_at);
        notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_filters_by_category() {
        let store = MemoryNoteStore::new();
        store.insert(Note::new("a", "insight"));
        store.insert(Note::new("b", "todo"));
        store.insert(Note::new("c", "insight"));

        let texts: Vec<_> = store.list("insight").into_iter().map(|n| n.text).collect();
        assert_eq!(texts, ["a", "c"]);
        assert_eq!(store.len(), 3);
        assert!(store.list("missing").is_empty());
    }

    #[test]
    fn test_mark_mirrored() {
        let store = MemoryNoteStore::new();
        let note = Note::new("a", "insight");
        let id = note.id;
        store.insert(note);

        let updated = store.mark_mirrored(id).expect("note exists");
        assert_eq!(updated.origin, Origin::Both);
        assert_eq!(store.get(id).map(|n| n.origin), Some(Origin::Both));
        assert!(store.mark_mirrored(NoteId::new_v4()).is_none());
    }
}
