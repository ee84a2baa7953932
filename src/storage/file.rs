//! File backed note storage
//!
//! Every note is one JSON row at `notes_dir/<id>.json`. The identifier
//! sequence is kept next to the rows so ids are not handed out twice, even
//! across restarts.
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{mpsc as std_mpsc, Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use walkdir::WalkDir;

use super::{ordered_by_recency, NoteStore};
use crate::{handle_fs_event, load_note_from_file, Note, NoteFlowError, NoteRow, Result};

const SEQUENCE_FILE: &str = ".sequence";

/// Manages the storage, retrieval, and synchronization of notes on disk.
pub struct FileNoteStore {
    /// Directory holding one row file per note
    notes_dir: PathBuf,

    /// In-memory cache of notes, indexed by note ID
    notes_cache: Arc<Mutex<BTreeMap<i64, Note>>>,

    /// Next identifier to hand out; the lock also serializes every write
    next_id: TokioMutex<i64>,

    /// Publishes the whole collection after every change
    publisher: Arc<watch::Sender<Vec<Note>>>,

    /// File system watcher to detect changes made by other processes
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileNoteStore {
    /// Opens the store rooted at `notes_dir`, creating the directory and loading existing rows
    pub fn open(notes_dir: impl Into<PathBuf>) -> Result<Self> {
        let notes_dir = notes_dir.into();
        info!("Opening note store at {}", notes_dir.display());

        if !notes_dir.exists() {
            debug!(
                "Notes directory does not exist, creating: {}",
                notes_dir.display()
            );
            fs::create_dir_all(&notes_dir).map_err(|e| {
                error!("Failed to create notes directory: {}", e);
                NoteFlowError::DirectoryError {
                    path: notes_dir.clone(),
                }
            })?;
        }

        let notes = Self::load_notes(&notes_dir);
        let highest = notes.keys().next_back().copied().unwrap_or(0);
        let next_id = read_sequence(&notes_dir)?.max(highest + 1);
        debug!("Next note id: {}", next_id);

        let (publisher, _) = watch::channel(ordered_by_recency(notes.values()));

        Ok(Self {
            notes_dir,
            notes_cache: Arc::new(Mutex::new(notes)),
            next_id: TokioMutex::new(next_id),
            publisher: Arc::new(publisher),
            watcher: Mutex::new(None),
        })
    }

    /// Directory this store reads and writes
    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    /// Loads all note rows from disk, skipping the ones that cannot be read
    fn load_notes(notes_dir: &Path) -> BTreeMap<i64, Note> {
        let mut notes = BTreeMap::new();
        let mut load_errors = 0usize;

        for entry in WalkDir::new(notes_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();

            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                match load_note_from_file(path) {
                    Ok(note) => {
                        notes.insert(note.id, note);
                    }
                    Err(e) => {
                        warn!("Failed to load note from {}: {}", path.display(), e);
                        load_errors += 1;
                    }
                }
            }
        }

        if load_errors > 0 {
            error!("Encountered {} errors while loading notes", load_errors);
        }
        info!("Loaded {} notes into cache", notes.len());
        notes
    }

    /// Helper method to get the file path for a note
    fn get_note_path(&self, note_id: i64) -> PathBuf {
        self.notes_dir.join(format!("{}.json", note_id))
    }

    /// Writes a row using atomic operations to prevent data corruption
    ///
    /// Returns the note as it reads back from disk. With `create` set the
    /// row must not exist yet.
    fn write_row(&self, note: &Note, create: bool) -> Result<Note> {
        let file_path = self.get_note_path(note.id);
        debug!("Writing note {} to {}", note.id, file_path.display());

        let row = NoteRow::from(note);
        let json = serde_json::to_string_pretty(&row).map_err(|e| {
            error!("Failed to serialize note: {}", e);
            NoteFlowError::Serialization(e)
        })?;
        if create {
            create_atomically(&self.notes_dir, &file_path, json.as_bytes())?;
        } else {
            write_atomically(&self.notes_dir, &file_path, json.as_bytes())?;
        }
        Ok(Note::from(row))
    }

    /// Picks the first id at or after `candidate` that neither the shared
    /// sequence nor an existing row has claimed
    fn claim_id(&self, candidate: i64) -> Result<i64> {
        let mut id = read_sequence(&self.notes_dir)?.max(candidate);
        while self.get_note_path(id).exists() {
            trace!("Row {} already on disk, skipping", id);
            id += 1;
        }
        write_sequence(&self.notes_dir, id + 1)?;
        Ok(id)
    }

    fn cache_and_publish(&self, change: impl FnOnce(&mut BTreeMap<i64, Note>)) -> Result<()> {
        let mut cache = self
            .notes_cache
            .lock()
            .map_err(|_| NoteFlowError::LockAcquisitionFailed {
                message: "Failed to acquire lock on notes cache".to_string(),
            })?;
        change(&mut cache);
        self.publisher
            .send_replace(ordered_by_recency(cache.values()));
        Ok(())
    }

    /// Starts watching the notes directory so rows changed by other processes show up live
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_directory(&self) -> Result<()> {
        let mut slot = self
            .watcher
            .lock()
            .map_err(|_| NoteFlowError::LockAcquisitionFailed {
                message: "Failed to acquire lock on watcher".to_string(),
            })?;
        if slot.is_some() {
            debug!("File system watcher already initialized");
            return Ok(());
        }

        // Create a standard mpsc channel for notify crate
        let (std_tx, std_rx) = std_mpsc::channel();

        // Create a tokio mpsc channel for async event handling
        let (tx, mut rx) = mpsc::channel(100);

        let mut watcher: RecommendedWatcher = Watcher::new(
            std_tx,
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| {
            NoteFlowError::Io(std::io::Error::other(format!(
                "Failed to create file watcher: {}",
                e
            )))
        })?;

        watcher
            .watch(&self.notes_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                NoteFlowError::Io(std::io::Error::other(format!(
                    "Failed to watch directory: {}",
                    e
                )))
            })?;

        *slot = Some(watcher);

        let notes_cache = Arc::clone(&self.notes_cache);
        let publisher = Arc::clone(&self.publisher);

        // Bridge the blocking notify channel into the runtime; ends when the watcher is dropped
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = std_rx.recv() {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            debug!("File system event bridge task stopped");
        });

        tokio::spawn(async move {
            debug!("File system watcher event handler task started");

            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => {
                        trace!("File system event: {:?}", event.kind);
                        handle_fs_event(event, &notes_cache, &publisher);
                    }
                    Err(e) => error!("File system watcher error: {}", e),
                }
            }

            debug!("File system watcher event handler task stopped");
        });

        info!(
            "File system watcher initialized for directory: {}",
            self.notes_dir.display()
        );
        Ok(())
    }

    /// Stops the directory watcher if it is running
    pub fn stop_watcher(&self) {
        if let Ok(mut slot) = self.watcher.lock() {
            if slot.take().is_some() {
                info!("File system watcher stopped");
            }
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().map(|w| w.is_some()).unwrap_or(false)
    }
}

#[async_trait]
impl NoteStore for FileNoteStore {
    async fn insert(&self, note: &Note) -> Result<i64> {
        let mut next_id = self.next_id.lock().await;

        // Other processes may share the directory, so the sequence on disk wins
        let mut candidate = *next_id;
        let stored = loop {
            let id = self.claim_id(candidate)?;
            *next_id = id + 1;
            let row = Note {
                id,
                ..note.clone()
            };
            match self.write_row(&row, true) {
                Ok(stored) => break stored,
                Err(NoteFlowError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    warn!("Row {} was created concurrently, trying the next id", id);
                    candidate = id + 1;
                }
                Err(e) => return Err(e),
            }
        };

        let id = stored.id;
        self.cache_and_publish(|cache| {
            cache.insert(id, stored);
        })?;

        info!("Note inserted: {}", id);
        Ok(id)
    }

    async fn update(&self, note: &Note) -> Result<()> {
        let _writes = self.next_id.lock().await;

        let known = self
            .notes_cache
            .lock()
            .map(|cache| cache.contains_key(&note.id))
            .unwrap_or(false);
        if !known && !self.get_note_path(note.id).exists() {
            warn!("Refusing to update missing note {}", note.id);
            return Err(NoteFlowError::NoteNotFound { id: note.id });
        }

        let stored = self.write_row(note, false)?;
        self.cache_and_publish(|cache| {
            cache.insert(stored.id, stored);
        })?;

        info!("Note {} updated successfully", note.id);
        Ok(())
    }

    async fn delete(&self, note: &Note) -> Result<()> {
        let _writes = self.next_id.lock().await;

        let file_path = self.get_note_path(note.id);
        match fs::remove_file(&file_path) {
            Ok(()) => debug!("Removed note file {}", file_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Note file {} already gone", file_path.display())
            }
            Err(e) => {
                error!("Failed to delete note file {}: {}", file_path.display(), e);
                return Err(NoteFlowError::Io(e));
            }
        }

        self.cache_and_publish(|cache| {
            cache.remove(&note.id);
        })?;

        info!("Note {} deleted", note.id);
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Note>> {
        debug!("Retrieving note by ID: {}", id);

        if let Ok(cache) = self.notes_cache.lock() {
            if let Some(note) = cache.get(&id) {
                trace!("Note found in cache: {}", id);
                return Ok(Some(note.clone()));
            }
        }

        // Not cached, the row may have been written by another process
        let _writes = self.next_id.lock().await;
        let file_path = self.get_note_path(id);
        if !file_path.exists() {
            debug!("Note not found: {}", id);
            return Ok(None);
        }

        let note = load_note_from_file(&file_path)?;
        self.cache_and_publish(|cache| {
            cache.insert(id, note.clone());
        })?;
        Ok(Some(note))
    }

    fn observe_all(&self) -> watch::Receiver<Vec<Note>> {
        self.publisher.subscribe()
    }
}

fn read_sequence(notes_dir: &Path) -> Result<i64> {
    let path = notes_dir.join(SEQUENCE_FILE);
    match fs::read_to_string(&path) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|e| NoteFlowError::InvalidFormat {
                message: format!("Corrupt sequence file {}: {}", path.display(), e),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(1),
        Err(e) => Err(NoteFlowError::Io(e)),
    }
}

fn write_sequence(notes_dir: &Path, next_id: i64) -> Result<()> {
    write_atomically(
        notes_dir,
        &notes_dir.join(SEQUENCE_FILE),
        next_id.to_string().as_bytes(),
    )
}

/// Writes through a temporary file in the same directory, then renames into place
fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    staged(dir, bytes)?.persist(target).map_err(|e| {
        error!("Failed to persist file {}: {}", target.display(), e.error);
        NoteFlowError::Io(e.error)
    })?;
    Ok(())
}

/// Like `write_atomically`, but fails with `AlreadyExists` instead of replacing a file
fn create_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    staged(dir, bytes)?.persist_noclobber(target).map_err(|e| {
        debug!("Could not create {}: {}", target.display(), e.error);
        NoteFlowError::Io(e.error)
    })?;
    Ok(())
}

fn staged(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| {
        error!("Failed to create temporary file: {}", e);
        NoteFlowError::Io(e)
    })?;

    temp_file.write_all(bytes).map_err(|e| {
        error!("Failed to write to temporary file: {}", e);
        NoteFlowError::Io(e)
    })?;

    temp_file.flush().map_err(|e| {
        error!("Failed to flush temporary file: {}", e);
        NoteFlowError::Io(e)
    })?;
    Ok(temp_file)
}
