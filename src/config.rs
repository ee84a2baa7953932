use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use which::which;

use crate::{NoteFlowError, Result};

const CONFIG_FILE: &str = "config.json";

/// Application configuration settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Root directory for everything the app stores locally
    pub data_dir: PathBuf,

    /// Directory where note rows are stored
    pub notes_dir: PathBuf,

    /// Directory for finalized voice recordings
    pub recordings_dir: PathBuf,

    /// File holding user preferences such as dark mode
    pub settings_file: PathBuf,

    /// Base URL recordings are uploaded to; unset keeps voice notes pending
    #[serde(default)]
    pub upload_url: Option<String>,

    /// Callable summarization endpoint
    #[serde(default)]
    pub summarize_url: Option<String>,

    /// Remote configuration bundle; unset means the app is always enabled
    #[serde(default)]
    pub remote_config_url: Option<String>,

    /// How long the startup config fetch may take (in seconds)
    pub remote_fetch_timeout_secs: u64,

    /// How long a deleted note can be restored (in seconds)
    pub undo_window_secs: u64,

    /// Command used to play recordings, the file path is appended
    #[serde(default)]
    pub player_command: Option<String>,

    /// Editor launched by `--edit`
    #[serde(default)]
    pub editor_command: Option<String>,

    /// Version compared against the remote minimum supported version
    pub app_version: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self::rooted_at(default_data_dir())
    }
}

impl Config {
    /// Default configuration with every path placed under `data_dir`
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            notes_dir: data_dir.join("notes"),
            recordings_dir: data_dir.join("recordings"),
            settings_file: data_dir.join("settings.json"),
            data_dir,
            upload_url: None,
            summarize_url: None,
            remote_config_url: None,
            remote_fetch_timeout_secs: 10,
            undo_window_secs: 4,
            player_command: None,
            editor_command: None,
            app_version: 1,
        }
    }

    /// Moves every local path under `data_dir`, keeping the other settings
    pub fn with_data_dir(self, data_dir: impl Into<PathBuf>) -> Self {
        let rooted = Self::rooted_at(data_dir);
        Self {
            data_dir: rooted.data_dir,
            notes_dir: rooted.notes_dir,
            recordings_dir: rooted.recordings_dir,
            settings_file: rooted.settings_file,
            ..self
        }
    }

    /// Location of the configuration file when none is given
    pub fn default_config_path() -> PathBuf {
        ProjectDirs::from("com", "example", "noteflow")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .unwrap_or_else(|| default_data_dir().join(CONFIG_FILE))
    }

    /// Loads the configuration file if it exists, then applies environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        let mut config = if path.exists() {
            debug!("Loading configuration from {}", path.display());
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|e| NoteFlowError::ConfigError {
                message: format!("Invalid configuration file {}: {}", path.display(), e),
            })?
        } else {
            debug!(
                "No configuration file at {}, using defaults",
                path.display()
            );
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Writes the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| NoteFlowError::DirectoryError {
                path: parent.to_path_buf(),
            })?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("NOTEFLOW_UPLOAD_URL") {
            self.upload_url = Some(url);
        }
        if let Ok(url) = std::env::var("NOTEFLOW_SUMMARIZE_URL") {
            self.summarize_url = Some(url);
        }
        if let Ok(url) = std::env::var("NOTEFLOW_REMOTE_CONFIG_URL") {
            self.remote_config_url = Some(url);
        }
    }

    // This method provides smart fallbacks when no editor is configured
    pub fn get_editor_command(&self) -> String {
        if let Some(editor) = &self.editor_command {
            return editor.clone();
        }

        if let Ok(editor) = std::env::var("EDITOR") {
            return editor;
        }

        if cfg!(windows) {
            "notepad".to_string()
        } else if cfg!(target_os = "macos") {
            "open -W -t".to_string()
        } else {
            ["nano", "vim", "vi"]
                .iter()
                .find(|editor| which(editor).is_ok())
                .unwrap_or(&"nano")
                .to_string()
        }
    }

    // Same idea for audio playback; `None` means nothing usable is installed
    pub fn get_player_command(&self) -> Option<String> {
        if let Some(player) = &self.player_command {
            return Some(player.clone());
        }

        if let Ok(player) = std::env::var("NOTEFLOW_PLAYER") {
            return Some(player);
        }

        let candidates: [(&str, &str); 4] = [
            ("ffplay", "ffplay -nodisp -autoexit -loglevel quiet"),
            ("mpv", "mpv --no-video --really-quiet"),
            ("afplay", "afplay"),
            ("aplay", "aplay -q"),
        ];
        candidates
            .iter()
            .find(|(bin, _)| which(bin).is_ok())
            .map(|(_, command)| command.to_string())
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("com", "example", "noteflow") {
        return dirs.data_dir().to_path_buf();
    }
    dirs::home_dir()
        .map(|home| home.join(".noteflow"))
        .unwrap_or_else(|| PathBuf::from(".noteflow"))
}
