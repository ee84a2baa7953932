//! Noteflow note-taking library
//!
//! This library provides a local note store with a live search and sort
//! pipeline, voice notes that are summarized in the background, and a remote
//! feature gate that can take the app offline for maintenance.

mod audio;
mod cli;
mod config;
mod errors;
mod feature_flags;
mod helper;
mod note;
mod pipeline;
mod remote;
mod storage;
mod theme;
mod types;
mod voice;

// Re-export key components
pub use audio::*;
pub use cli::*;
pub use config::*;
pub use errors::*;
pub use feature_flags::*;
pub use helper::*;
pub use note::*;
pub use pipeline::*;
pub use remote::*;
pub use storage::*;
pub use theme::*;
pub use types::*;
pub use voice::*;
