//! The note entity.
//!
//! A note is the only domain record: free text title and content, an ordered
//! tag list, an optional voice recording and a flag marking notes that are
//! still waiting for their AI summary.
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to a voice-only note until its summary arrives.
pub const PLACEHOLDER_TITLE: &str = "Voice Note";

/// Title used when the user saves a note with a blank title.
pub const UNTITLED_TITLE: &str = "Untitled Note";

/// Title patched onto a voice note whose summarization failed.
pub const SUMMARY_ERROR_TITLE: &str = "Error";

/// Content patched onto a voice note whose summarization failed.
pub const SUMMARY_ERROR_CONTENT: &str = "Could not summarize";

/// Title used when the summarizer answers without one.
pub const SUMMARY_DEFAULT_TITLE: &str = "Untitled";

/// Represents a single note in our system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Store assigned identifier, 0 until the note is first inserted
    pub id: i64,
    /// Note title
    pub title: String,
    /// Note body
    pub content: String,
    /// Creation or last save instant, the default sort key
    pub timestamp: DateTime<Utc>,
    /// Tags for organization, order preserved, duplicates allowed
    pub tags: Vec<String>,
    /// Local audio clip attached to the note
    pub voice_path: Option<PathBuf>,
    /// True between the optimistic insert and the enrichment patch
    pub is_pending_summary: bool,
}

impl Note {
    /// Creates a new, not yet persisted note
    pub fn new(title: String, content: String, tags: Vec<String>) -> Self {
        Note {
            id: 0,
            title,
            content,
            timestamp: Utc::now(),
            tags,
            voice_path: None,
            is_pending_summary: false,
        }
    }

    /// Placeholder inserted for a voice-only save, patched later by enrichment
    pub fn voice_placeholder(voice_path: PathBuf) -> Self {
        Note {
            voice_path: Some(voice_path),
            is_pending_summary: true,
            ..Note::new(PLACEHOLDER_TITLE.to_string(), String::new(), Vec::new())
        }
    }

    /// Whether the store has assigned this note an identifier
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    /// Copy of the note with the identifier cleared, ready to insert as a new record
    pub fn without_id(&self) -> Self {
        Note {
            id: 0,
            ..self.clone()
        }
    }
}
