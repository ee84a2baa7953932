//! Audio capture and playback.
//!
//! Recording devices and media players live outside this crate; the traits
//! here are the seams the voice flow and the CLI talk to.
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use shell_words::split;
use tokio::{
    process::Command,
    sync::{oneshot, Mutex},
    task::JoinHandle,
};

use crate::{NoteFlowError, Result};

const DEFAULT_EXTENSION: &str = "3gp";

/// Where a recorder currently is in its capture cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RecordingSession {
    #[default]
    Idle,
    Recording { path: PathBuf },
    Finished { path: PathBuf },
}

impl RecordingSession {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingSession::Recording { .. })
    }

    /// The finalized clip, once recording has stopped
    pub fn recorded_file(&self) -> Option<&Path> {
        match self {
            RecordingSession::Finished { path } => Some(path),
            _ => None,
        }
    }
}

/// Captures a voice clip to a local file
#[async_trait]
pub trait VoiceRecorder: Send + Sync {
    /// Begin capturing; returns the file the clip will be written to
    async fn start_recording(&self) -> Result<PathBuf>;

    /// Finish capturing and return the finalized file
    async fn stop_recording(&self) -> Result<PathBuf>;
}

/// Recorder that takes its audio from an existing file.
///
/// Clips are named `voice_note_<millis>.<ext>` inside the recordings
/// directory; the source file is copied into place when recording stops.
pub struct FileVoiceRecorder {
    recordings_dir: PathBuf,
    source: Option<PathBuf>,
    session: Mutex<RecordingSession>,
}

impl FileVoiceRecorder {
    pub fn new(recordings_dir: impl Into<PathBuf>) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            source: None,
            session: Mutex::new(RecordingSession::Idle),
        }
    }

    /// Audio file fed into the next recording
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub async fn session(&self) -> RecordingSession {
        self.session.lock().await.clone()
    }

    fn next_clip_path(&self) -> PathBuf {
        let ext = self
            .source
            .as_deref()
            .and_then(|s| s.extension())
            .and_then(|e| e.to_str())
            .unwrap_or(DEFAULT_EXTENSION);
        self.recordings_dir.join(format!(
            "voice_note_{}.{}",
            Utc::now().timestamp_millis(),
            ext
        ))
    }
}

#[async_trait]
impl VoiceRecorder for FileVoiceRecorder {
    async fn start_recording(&self) -> Result<PathBuf> {
        let mut session = self.session.lock().await;
        if session.is_recording() {
            return Err(NoteFlowError::RecorderState {
                message: "already recording".to_string(),
            });
        }

        tokio::fs::create_dir_all(&self.recordings_dir)
            .await
            .map_err(|e| {
                error!("Failed to create recordings directory: {}", e);
                NoteFlowError::DirectoryError {
                    path: self.recordings_dir.clone(),
                }
            })?;

        let path = self.next_clip_path();
        info!("Recording started: {}", path.display());
        *session = RecordingSession::Recording { path: path.clone() };
        Ok(path)
    }

    async fn stop_recording(&self) -> Result<PathBuf> {
        let mut session = self.session.lock().await;
        let RecordingSession::Recording { path } = &*session else {
            return Err(NoteFlowError::RecorderState {
                message: "stop requested while not recording".to_string(),
            });
        };
        let path = path.clone();

        let Some(source) = &self.source else {
            *session = RecordingSession::Idle;
            return Err(NoteFlowError::RecorderState {
                message: "no audio source attached".to_string(),
            });
        };

        if !source.exists() {
            *session = RecordingSession::Idle;
            return Err(NoteFlowError::FileNotFound {
                file_path: source.display().to_string(),
            });
        }

        tokio::fs::copy(source, &path).await?;
        info!("Recording finalized: {}", path.display());
        *session = RecordingSession::Finished { path: path.clone() };
        Ok(path)
    }
}

/// Callback fired when playback reaches the end on its own
pub type OnComplete = Box<dyn FnOnce() + Send + 'static>;

/// Plays local audio clips
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Start playing, stopping whatever is playing now
    async fn play(&self, path: &Path, on_complete: OnComplete) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    fn is_playing(&self) -> bool;
}

struct Playback {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Plays clips by running an external player command with the file appended
pub struct CommandAudioPlayer {
    command: String,
    playing: Arc<AtomicBool>,
    current: Mutex<Option<Playback>>,
}

impl CommandAudioPlayer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            playing: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioPlayer for CommandAudioPlayer {
    async fn play(&self, path: &Path, on_complete: OnComplete) -> Result<()> {
        self.stop().await?;

        if !path.exists() {
            return Err(NoteFlowError::FileNotFound {
                file_path: path.display().to_string(),
            });
        }

        let args = split(&self.command).map_err(|e| NoteFlowError::PlayerError {
            message: format!("Failed to parse player command: {}", e),
        })?;
        let Some((program, rest)) = args.split_first() else {
            return Err(NoteFlowError::PlayerError {
                message: "Empty player command".to_string(),
            });
        };

        let mut child = Command::new(program)
            .args(rest)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NoteFlowError::PlayerError {
                message: format!("Failed to start player '{}': {}", program, e),
            })?;

        debug!("Playing {} with {}", path.display(), program);
        self.playing.store(true, Ordering::SeqCst);

        let (stop_tx, stop_rx) = oneshot::channel();
        let playing = Arc::clone(&self.playing);
        let task = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    playing.store(false, Ordering::SeqCst);
                    match status {
                        Ok(status) if status.success() => on_complete(),
                        Ok(status) => warn!("Player exited with {}", status),
                        Err(e) => error!("Failed to wait for player: {}", e),
                    }
                }
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill player: {}", e);
                    }
                    playing.store(false, Ordering::SeqCst);
                }
            }
        });

        *self.current.lock().await = Some(Playback { stop_tx, task });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(playback) = self.current.lock().await.take() else {
            return Ok(());
        };

        // The task may already be done, in which case nobody is listening
        let _ = playback.stop_tx.send(());
        playback
            .task
            .await
            .map_err(|e| NoteFlowError::PlayerError {
                message: format!("Playback task failed: {}", e),
            })?;
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn recorder_walks_idle_recording_finished() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input.m4a");
        std::fs::write(&source, b"fake audio").unwrap();

        let recorder = FileVoiceRecorder::new(dir.path().join("recordings")).with_source(&source);
        assert_eq!(recorder.session().await, RecordingSession::Idle);

        let started = recorder.start_recording().await.unwrap();
        assert!(recorder.session().await.is_recording());
        assert!(started
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("voice_note_"));
        assert_eq!(started.extension().unwrap(), "m4a");

        let finished = recorder.stop_recording().await.unwrap();
        assert_eq!(started, finished);
        assert_eq!(std::fs::read(&finished).unwrap(), b"fake audio");
        assert_eq!(
            recorder.session().await.recorded_file(),
            Some(finished.as_path())
        );
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileVoiceRecorder::new(dir.path());
        assert!(matches!(
            recorder.stop_recording().await,
            Err(NoteFlowError::RecorderState { .. })
        ));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileVoiceRecorder::new(dir.path());
        recorder.start_recording().await.unwrap();
        assert!(recorder.start_recording().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn player_reports_completion() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.3gp");
        std::fs::write(&clip, b"x").unwrap();

        let player = CommandAudioPlayer::new("true");
        let (done_tx, done_rx) = oneshot::channel();
        player
            .play(
                &clip,
                Box::new(move || {
                    let _ = done_tx.send(());
                }),
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!player.is_playing());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_interrupts_playback_without_completion() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.3gp");
        std::fs::write(&clip, b"x").unwrap();

        let player = CommandAudioPlayer::new("sh -c 'sleep 30'");
        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);
        player
            .play(&clip, Box::new(move || flag.store(true, Ordering::SeqCst)))
            .await
            .unwrap();
        assert!(player.is_playing());

        player.stop().await.unwrap();
        assert!(!player.is_playing());
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn missing_clip_is_reported() {
        let player = CommandAudioPlayer::new("true");
        assert!(matches!(
            player
                .play(Path::new("/definitely/not/here.3gp"), Box::new(|| {}))
                .await,
            Err(NoteFlowError::FileNotFound { .. })
        ));
    }
}
