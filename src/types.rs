//! Shared types for the noteflow application.
//!
//! This module contains the crate-wide Result alias and the CLI command set.
use std::path::PathBuf;

use clap::Subcommand;

use crate::{NoteFlowError, SortType};

/// A specialized Result type for noteflow operations.
pub type Result<T> = std::result::Result<T, NoteFlowError>;

/// Available subcommands for the noteflow application
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a new note
    Create {
        /// Title of the note
        #[clap(short = 'T', long, default_value = "")]
        title: String,

        /// Content of the note
        #[clap(short, long)]
        content: Option<String>,

        /// Tags to associate with the note (comma-separated)
        #[clap(short = 't', long)]
        tags: Option<String>,

        /// Audio file to attach as the note's recording
        #[clap(long)]
        voice: Option<PathBuf>,

        /// Write the content in an external editor
        #[clap(short, long)]
        edit: bool,
    },

    /// View a note by ID
    View {
        /// ID of the note to view
        id: i64,

        /// Format output as raw JSON
        #[clap(short, long)]
        json: bool,
    },

    /// List notes, filtered by a search string and sorted
    List {
        /// Only notes whose title or content contains this text (case-insensitive)
        #[clap(short, long)]
        search: Option<String>,

        /// Sort order
        #[clap(long, value_enum, default_value_t = SortType::Latest)]
        sort: SortType,

        /// Limit the number of notes returned
        #[clap(short = 'n', long)]
        limit: Option<usize>,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,

        /// Keep running and print the list again whenever it changes
        #[clap(short, long)]
        follow: bool,
    },

    /// Edit an existing note
    Edit {
        /// ID of the note to edit
        id: i64,

        /// New title for the note
        #[clap(short = 'T', long)]
        title: Option<String>,

        /// New content for the note
        #[clap(short, long)]
        content: Option<String>,

        /// Replace the note's tags (comma-separated)
        #[clap(short = 't', long)]
        tags: Option<String>,

        /// Edit the content in an external editor
        #[clap(short, long, conflicts_with = "content")]
        edit: bool,
    },

    /// Delete a note by ID
    Delete {
        /// ID of the note to delete
        id: i64,

        /// Skip the undo offer
        #[clap(short, long)]
        force: bool,
    },

    /// Tag operations (add, remove, list)
    Tag {
        /// ID of the note to modify
        id: i64,

        /// Tags to add (comma-separated)
        #[clap(short, long)]
        add: Option<String>,

        /// Tags to remove (comma-separated)
        #[clap(short, long)]
        remove: Option<String>,

        /// List all tags for the note
        #[clap(short, long)]
        list: bool,
    },

    /// Record a voice note from an audio file
    Voice {
        /// Audio file used as the recording
        file: PathBuf,

        /// Title; leave title and content empty to have it summarized
        #[clap(short = 'T', long, default_value = "")]
        title: String,

        /// Content of the note
        #[clap(short, long, default_value = "")]
        content: String,

        /// Tags to associate with the note (comma-separated)
        #[clap(short = 't', long)]
        tags: Option<String>,

        /// Return right after the placeholder is saved
        #[clap(long)]
        no_wait: bool,
    },

    /// Play a note's recording
    Play {
        /// ID of the note
        id: i64,
    },

    /// Show or change the dark mode preference
    Theme {
        /// Switch to dark mode
        #[clap(long, conflicts_with = "light")]
        dark: bool,

        /// Switch to light mode
        #[clap(long)]
        light: bool,
    },

    /// Show the remote feature gate state
    Status {
        /// Fetch the remote configuration again
        #[clap(short, long)]
        refresh: bool,
    },

    /// Configuration management
    Config {
        /// Show current configuration
        #[clap(short = 'S', long)]
        show: bool,

        /// Reset configuration to defaults
        #[clap(short, long)]
        reset: bool,
    },
}
