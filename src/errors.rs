//! Error types for the noteflow application.
//!
//! This module defines custom error types that categorize different failures
//! that can occur while storing, enriching and presenting notes.

use std::{io, path::PathBuf};

use thiserror::Error;

/// The main error type for the noteflow application.
#[derive(Error, Debug)]
pub enum NoteFlowError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport level failures talking to a remote service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Note was not found when performing an operation.
    #[error("Note not found: {id}")]
    NoteNotFound { id: i64 },

    /// Invalid note row or content.
    #[error("Invalid note format: {message}")]
    InvalidFormat { message: String },

    /// The recording could not be transferred to remote storage.
    #[error("Upload failed: {message}")]
    UploadFailed { message: String },

    /// The remote summarization call failed or returned garbage.
    #[error("Summarization failed: {message}")]
    SummarizeFailed { message: String },

    /// Fetching the remote configuration bundle failed.
    #[error("Remote config error: {message}")]
    RemoteConfig { message: String },

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Directory creation or access failed.
    #[error("Failed to create or access directory: {path}")]
    DirectoryError { path: PathBuf },

    /// for mutex lock acquisition issues
    #[error("{message}")]
    LockAcquisitionFailed { message: String },

    /// An enrichment for this note is already running.
    #[error("Enrichment already in progress for note {id}")]
    EnrichmentInFlight { id: i64 },

    /// The undo window for a deleted note has closed.
    #[error("Undo window expired for note {id}")]
    UndoExpired { id: i64 },

    /// Recorder used out of order (stop before start, double start).
    #[error("Recorder error: {message}")]
    RecorderState { message: String },

    #[error("{message}")]
    PlayerError { message: String },

    /// file not found
    #[error("File not found: {file_path}")]
    FileNotFound { file_path: String },

    /// Generic application error with a custom message.
    #[error("{message}")]
    ApplicationError { message: String },
}
