use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use log::{debug, error, trace};
use notify::EventKind;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{ordered_by_recency, Note, NoteFlowError, Result};

/// On-disk shape of a note.
///
/// Tags are flattened into a single comma-joined column, so a tag that itself
/// contains a comma does not survive a round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tags: String,
    #[serde(default)]
    pub voice_path: Option<PathBuf>,
    #[serde(default)]
    pub is_pending_summary: bool,
}

impl From<&Note> for NoteRow {
    fn from(note: &Note) -> Self {
        NoteRow {
            id: note.id,
            title: note.title.clone(),
            content: note.content.clone(),
            timestamp: note.timestamp,
            tags: encode_tags(&note.tags),
            voice_path: note.voice_path.clone(),
            is_pending_summary: note.is_pending_summary,
        }
    }
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Note {
            id: row.id,
            title: row.title,
            content: row.content,
            timestamp: row.timestamp,
            tags: decode_tags(&row.tags),
            voice_path: row.voice_path,
            is_pending_summary: row.is_pending_summary,
        }
    }
}

/// Joins tags into the stored column: every token trimmed, comma separated, no escaping
pub fn encode_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .collect::<Vec<&str>>()
        .join(",")
}

/// Splits the stored column back into tags; the empty string is the empty list
pub fn decode_tags(data: &str) -> Vec<String> {
    if data.is_empty() {
        return Vec::new();
    }
    data.split(',').map(|s| s.trim().to_string()).collect()
}

// Helper method for parsing tags typed by the user
pub fn parse_tags(tags: Option<String>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Extracts the note id from a `<id>.json` row path
pub fn note_id_from_path(path: &Path) -> Option<i64> {
    if !path.extension().is_some_and(|ext| ext == "json") {
        return None;
    }
    path.file_stem()?.to_str()?.parse::<i64>().ok()
}

/// Helper method to load a single note from its row file
pub fn load_note_from_file(path: &Path) -> Result<Note> {
    debug!("Loading note from file: {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| {
        error!("Failed to open note file {}: {}", path.display(), e);
        NoteFlowError::Io(e)
    })?;

    let row: NoteRow = serde_json::from_str(&content)?;

    if row.id <= 0 {
        let error_mgs = format!("Note from {} has no valid ID", path.display());
        error!("{}", error_mgs);
        return Err(NoteFlowError::InvalidFormat { message: error_mgs });
    }

    trace!("Successfully loaded note: {}", row.id);
    Ok(row.into())
}

/// Handles file system events by updating the notes cache and republishing the collection
pub fn handle_fs_event(
    event: notify::Event,
    notes_cache: &Arc<Mutex<BTreeMap<i64, Note>>>,
    publisher: &watch::Sender<Vec<Note>>,
) {
    let mut changed = false;
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in event.paths {
                let Some(note_id) = note_id_from_path(&path) else {
                    continue;
                };
                if !path.exists() {
                    continue;
                }
                match load_note_from_file(&path) {
                    Ok(note) => {
                        if let Ok(mut cache) = notes_cache.lock() {
                            if cache.get(&note_id) != Some(&note) {
                                cache.insert(note_id, note);
                                changed = true;
                                debug!("Updated cache for note: {}", note_id);
                            }
                        }
                    }
                    Err(e) => {
                        error!(
                            "Failed to load note from changed file {}: {}",
                            path.display(),
                            e
                        );
                    }
                }
            }
        }
        EventKind::Remove(_) => {
            for path in event.paths {
                if let Some(note_id) = note_id_from_path(&path) {
                    if let Ok(mut cache) = notes_cache.lock() {
                        if cache.remove(&note_id).is_some() {
                            changed = true;
                            debug!("Removed note {} from cache due to file deletion", note_id);
                        }
                    }
                }
            }
        }
        _ => {
            // Ignore other events
        }
    }

    if changed {
        if let Ok(cache) = notes_cache.lock() {
            publisher.send_replace(ordered_by_recency(cache.values()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_encode_trimmed_and_comma_joined() {
        let tags = vec![" work ".to_string(), "ideas".to_string()];
        assert_eq!(encode_tags(&tags), "work,ideas");
        assert_eq!(encode_tags(&[]), "");
    }

    #[test]
    fn empty_column_decodes_to_no_tags() {
        assert!(decode_tags("").is_empty());
        assert_eq!(decode_tags("a, b ,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn tag_containing_comma_splits_on_the_way_back() {
        let tags = vec!["one,two".to_string()];
        assert_eq!(decode_tags(&encode_tags(&tags)), vec!["one", "two"]);
    }

    #[test]
    fn parse_tags_drops_blank_tokens() {
        assert_eq!(
            parse_tags(Some("work, personal, , ideas".to_string())),
            vec!["work", "personal", "ideas"]
        );
        assert!(parse_tags(None).is_empty());
    }

    #[test]
    fn row_path_must_be_numeric_json() {
        assert_eq!(note_id_from_path(Path::new("/n/12.json")), Some(12));
        assert_eq!(note_id_from_path(Path::new("/n/12.tmp")), None);
        assert_eq!(note_id_from_path(Path::new("/n/abc.json")), None);
    }

    #[test]
    fn load_rejects_rows_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.json");
        let row = NoteRow::from(&Note::new("t".into(), "c".into(), vec![]));
        fs::write(&path, serde_json::to_string(&row).unwrap()).unwrap();
        assert!(matches!(
            load_note_from_file(&path),
            Err(NoteFlowError::InvalidFormat { .. })
        ));
    }
}
