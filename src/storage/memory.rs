//! Memory storage
//!
//! Will be destroyed on shutdown

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::{watch, Mutex};

use super::{ordered_by_recency, NoteStore};
use crate::{Note, NoteFlowError, Result};

#[derive(Debug)]
struct Table {
    rows: BTreeMap<i64, Note>,
    next_id: i64,
}

/// An in-memory note store
#[derive(Clone, Debug)]
pub struct MemoryNoteStore {
    table: Arc<Mutex<Table>>,
    publisher: Arc<watch::Sender<Vec<Note>>>,
}

impl MemoryNoteStore {
    /// Create a new empty store
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(Vec::new());
        Self {
            table: Arc::new(Mutex::new(Table {
                rows: BTreeMap::new(),
                next_id: 1,
            })),
            publisher: Arc::new(publisher),
        }
    }

    fn publish(&self, table: &Table) {
        self.publisher
            .send_replace(ordered_by_recency(table.rows.values()));
    }
}

impl Default for MemoryNoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn insert(&self, note: &Note) -> Result<i64> {
        let mut table = self.table.lock().await;
        let id = table.next_id;
        table.next_id += 1;
        table.rows.insert(id, Note { id, ..note.clone() });
        debug!("Inserted note {} into memory store", id);
        self.publish(&table);
        Ok(id)
    }

    async fn update(&self, note: &Note) -> Result<()> {
        let mut table = self.table.lock().await;
        match table.rows.get_mut(&note.id) {
            Some(row) => *row = note.clone(),
            None => return Err(NoteFlowError::NoteNotFound { id: note.id }),
        }
        self.publish(&table);
        Ok(())
    }

    async fn delete(&self, note: &Note) -> Result<()> {
        let mut table = self.table.lock().await;
        if table.rows.remove(&note.id).is_some() {
            self.publish(&table);
        }
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Note>> {
        Ok(self.table.lock().await.rows.get(&id).cloned())
    }

    fn observe_all(&self) -> watch::Receiver<Vec<Note>> {
        self.publisher.subscribe()
    }
}
