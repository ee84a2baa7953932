//! All things related to the persistence of notes

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{Note, Result};

pub use file::FileNoteStore;
pub use memory::MemoryNoteStore;

mod file;
mod memory;

/// Note store with all supported operations
///
/// Every mutation republishes the full collection to the receivers handed out
/// by [`NoteStore::observe_all`].
#[async_trait]
pub trait NoteStore: Send + Sync + 'static {
    /// Insert a note as a new record and return its freshly assigned identifier
    ///
    /// Any identifier already on the note is ignored
    async fn insert(&self, note: &Note) -> Result<i64>;

    /// Replace the record with the same identifier
    async fn update(&self, note: &Note) -> Result<()>;

    /// Remove the record with the same identifier, a missing record is not an error
    async fn delete(&self, note: &Note) -> Result<()>;

    /// Find a single note by its identifier
    async fn get_by_id(&self, id: i64) -> Result<Option<Note>>;

    /// Live view of all notes, most recent first
    fn observe_all(&self) -> watch::Receiver<Vec<Note>>;
}

/// Orders notes the way the store publishes them: newest timestamp first, newest id on ties
pub fn ordered_by_recency<'a>(notes: impl IntoIterator<Item = &'a Note>) -> Vec<Note> {
    let mut all: Vec<Note> = notes.into_iter().cloned().collect();
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    all
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn recency_order_breaks_ties_by_id() {
        let now = Utc::now();
        let mut a = Note::new("a".into(), String::new(), vec![]);
        a.id = 1;
        a.timestamp = now;
        let mut b = Note::new("b".into(), String::new(), vec![]);
        b.id = 2;
        b.timestamp = now;
        let mut c = Note::new("c".into(), String::new(), vec![]);
        c.id = 3;
        c.timestamp = now - Duration::seconds(5);

        let ordered = ordered_by_recency([&c, &a, &b]);
        let ids: Vec<i64> = ordered.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }
}
