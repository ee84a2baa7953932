//! Dark mode preference, persisted in a small JSON settings file.
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::{sync::watch, task::JoinHandle};

use crate::{NoteFlowError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Settings {
    #[serde(default)]
    dark_mode: bool,
}

pub struct ThemePreferences {
    settings_file: PathBuf,
    dark_mode: Arc<watch::Sender<bool>>,

    /// Held while the settings file is written
    writes: Arc<Mutex<()>>,
}

impl ThemePreferences {
    /// Reads the preference from `settings_file`; missing or unreadable files mean light mode
    pub fn open(settings_file: impl Into<PathBuf>) -> Self {
        let settings_file = settings_file.into();
        let settings = match fs::read_to_string(&settings_file) {
            Ok(raw) => serde_json::from_str::<Settings>(&raw).unwrap_or_else(|e| {
                warn!(
                    "Ignoring unreadable settings file {}: {}",
                    settings_file.display(),
                    e
                );
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };
        debug!("Dark mode preference: {}", settings.dark_mode);

        let (dark_mode, _) = watch::channel(settings.dark_mode);
        Self {
            settings_file,
            dark_mode: Arc::new(dark_mode),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn observe(&self) -> watch::Receiver<bool> {
        self.dark_mode.subscribe()
    }

    pub fn is_dark_mode(&self) -> bool {
        *self.dark_mode.borrow()
    }

    /// Publishes the new value immediately and persists it in the background
    ///
    /// Each background write saves the latest published value, so the file
    /// ends up holding the last setting whatever order the writes run in.
    pub fn set_dark_mode(&self, enabled: bool) -> JoinHandle<Result<()>> {
        self.dark_mode.send_replace(enabled);
        let settings_file = self.settings_file.clone();
        let dark_mode = Arc::clone(&self.dark_mode);
        let writes = Arc::clone(&self.writes);
        tokio::task::spawn_blocking(move || {
            let _guard = writes.lock().map_err(|_| NoteFlowError::LockAcquisitionFailed {
                message: "Failed to acquire lock on settings file".to_string(),
            })?;
            let latest = *dark_mode.borrow();
            persist(&settings_file, latest)
        })
    }
}

fn persist(settings_file: &Path, dark_mode: bool) -> Result<()> {
    let parent = match settings_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|_| NoteFlowError::DirectoryError {
        path: parent.to_path_buf(),
    })?;

    let json = serde_json::to_string_pretty(&Settings { dark_mode })?;
    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(json.as_bytes())?;
    temp_file.flush()?;
    temp_file.persist(settings_file).map_err(|e| {
        error!(
            "Failed to persist settings file {}: {}",
            settings_file.display(),
            e.error
        );
        NoteFlowError::Io(e.error)
    })?;

    debug!("Dark mode preference saved: {}", dark_mode);
    Ok(())
}
