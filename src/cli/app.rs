//! CLI module for the noteflow application
//!
//! This module handles the command-line interface for interacting with the
//! note service, the live list pipeline and the feature gate.
use std::{
    fs::{read_to_string, OpenOptions},
    io::{stdin, stdout, Write},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
    time::Duration,
};

use console::Style;
use log::{debug, info, warn};
use shell_words::split;
use tempfile::Builder;
use tokio::sync::oneshot;

use crate::{
    parse_tags, AudioPlayer, CommandAudioPlayer, Commands, Config, EnrichmentOutcome,
    FeatureGate, FileNoteStore, FileVoiceRecorder, Note, NoteDraft, NoteFlowError, NotePipeline,
    NoteService, Result, SaveOutcome, SortType, ThemePreferences, VoiceRecorder, UNTITLED_TITLE,
};

/// CLI Application handler - processes CLI commands against the note service
pub struct App {
    /// Note operations and background enrichment
    service: NoteService,

    /// Set when notes live on disk, used to follow changes from other processes
    file_store: Option<Arc<FileNoteStore>>,

    /// Remote kill switch, already resolved at startup
    gate: FeatureGate,

    /// Dark mode preference, also picks the output palette
    theme: ThemePreferences,

    /// Application configuration
    config: Config,

    /// Where `config --reset` writes to
    config_path: PathBuf,

    /// Whether to display verbose output
    verbose: bool,
}

impl App {
    /// Create a new CLI application from its collaborators
    pub fn new(
        service: NoteService,
        gate: FeatureGate,
        theme: ThemePreferences,
        config: Config,
        config_path: PathBuf,
        verbose: bool,
    ) -> Self {
        Self {
            service,
            file_store: None,
            gate,
            theme,
            config,
            config_path,
            verbose,
        }
    }

    pub fn with_file_store(mut self, file_store: Arc<FileNoteStore>) -> Self {
        self.file_store = Some(file_store);
        self
    }

    /// Run the CLI application with the given command
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Create {
                title,
                content,
                tags,
                voice,
                edit,
            } => self.create_note(title, content, tags, voice, edit).await?,

            Commands::View { id, json } => self.view_note(id, json).await?,

            Commands::List {
                search,
                sort,
                limit,
                json,
                follow,
            } => {
                self.list_notes(search.unwrap_or_default(), sort, limit, json, follow)
                    .await?
            }

            Commands::Edit {
                id,
                title,
                content,
                tags,
                edit,
            } => self.handle_edit(id, title, content, tags, edit).await?,

            Commands::Delete { id, force } => self.handle_delete(id, force).await?,

            Commands::Tag {
                id,
                add,
                remove,
                list,
            } => self.handle_tags(id, add, remove, list).await?,

            Commands::Voice {
                file,
                title,
                content,
                tags,
                no_wait,
            } => {
                self.record_voice_note(file, title, content, tags, no_wait)
                    .await?
            }

            Commands::Play { id } => self.play_recording(id).await?,

            Commands::Theme { dark, light } => self.handle_theme(dark, light).await?,

            Commands::Status { refresh } => self.show_status(refresh).await?,

            Commands::Config { show, reset } => self.handle_config(show, reset)?,
        }

        Ok(())
    }

    async fn create_note(
        &self,
        title: String,
        content: Option<String>,
        tags: Option<String>,
        voice: Option<PathBuf>,
        edit: bool,
    ) -> Result<()> {
        let content = match (content, edit) {
            (Some(c), _) => c,
            (None, true) => self.open_editor(&title, "")?,
            (None, false) => String::new(),
        };

        let voice_path = match voice {
            Some(file) => Some(self.record_clip(file).await?),
            None => None,
        };

        let draft = NoteDraft {
            id: None,
            title,
            content,
            tags: parse_tags(tags),
            voice_path,
        };
        let outcome = self.service.save(draft).await?;
        self.report_save(outcome, true).await
    }

    async fn record_voice_note(
        &self,
        file: PathBuf,
        title: String,
        content: String,
        tags: Option<String>,
        no_wait: bool,
    ) -> Result<()> {
        let clip = self.record_clip(file).await?;
        let draft = NoteDraft {
            id: None,
            title,
            content,
            tags: parse_tags(tags),
            voice_path: Some(clip),
        };
        let outcome = self.service.save(draft).await?;
        self.report_save(outcome, !no_wait).await
    }

    /// Runs one capture cycle fed from `file` and returns the finalized clip
    async fn record_clip(&self, file: PathBuf) -> Result<PathBuf> {
        if !file.is_file() {
            return Err(NoteFlowError::FileNotFound {
                file_path: file.display().to_string(),
            });
        }
        let recorder = FileVoiceRecorder::new(&self.config.recordings_dir).with_source(file);
        recorder.start_recording().await?;
        recorder.stop_recording().await
    }

    async fn report_save(&self, outcome: SaveOutcome, wait: bool) -> Result<()> {
        let (id, task) = match outcome {
            SaveOutcome::Saved { id } => {
                println!("Note created with ID: {}", id);
                return Ok(());
            }
            SaveOutcome::Enriching { id, task } => (id, task),
        };

        println!("Voice note saved with ID: {}", id);
        if !wait {
            println!("Not waiting for the summary, the note stays pending.");
            return Ok(());
        }

        println!("Summarizing...");
        let outcome = task.await.map_err(|e| NoteFlowError::ApplicationError {
            message: format!("Enrichment task failed: {}", e),
        })?;

        match outcome {
            EnrichmentOutcome::Summarized(note) => {
                println!("Summarized:");
                self.print_note(&note, true);
            }
            EnrichmentOutcome::FellBack(note) => {
                println!("Summarizer unavailable, note {} marked as not summarized", note.id);
            }
            EnrichmentOutcome::UploadFailed { id } => {
                println!("Upload failed, note {} stays pending", id);
            }
            EnrichmentOutcome::NoteMissing { id } => {
                println!("Note {} was deleted before it could be summarized", id);
            }
            EnrichmentOutcome::PatchFailed { id, message } => {
                return Err(NoteFlowError::ApplicationError {
                    message: format!("Failed to save summary for note {}: {}", id, message),
                });
            }
        }
        Ok(())
    }

    async fn view_note(&self, id: i64, json: bool) -> Result<()> {
        let note = self.service.get(id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&note)?);
        } else {
            self.print_note(&note, true);
        }
        Ok(())
    }

    /// List notes through the live pipeline
    async fn list_notes(
        &self,
        search: String,
        sort: SortType,
        limit: Option<usize>,
        json: bool,
        follow: bool,
    ) -> Result<()> {
        let mut pipeline = NotePipeline::start_with(&**self.service.store(), search, sort);
        self.display_notes(&pipeline.current(), limit, json)?;

        if follow {
            self.follow_notes(&pipeline, limit, json).await?;
        }

        pipeline.stop().await
    }

    async fn follow_notes(
        &self,
        pipeline: &NotePipeline,
        limit: Option<usize>,
        json: bool,
    ) -> Result<()> {
        if let Some(store) = &self.file_store {
            store.watch_directory()?;
        }
        println!("\nWatching for changes, press Ctrl-C to stop.");

        let mut notes = pipeline.notes();
        let _ = notes.borrow_and_update();
        loop {
            tokio::select! {
                changed = notes.changed() => {
                    if changed.is_err() {
                        debug!("Pipeline output closed");
                        break;
                    }
                    let current = notes.borrow_and_update().clone();
                    println!();
                    self.display_notes(&current, limit, json)?;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        if let Some(store) = &self.file_store {
            store.stop_watcher();
        }
        Ok(())
    }

    /// Display notes in the requested format
    fn display_notes(&self, notes: &[Note], limit: Option<usize>, json: bool) -> Result<()> {
        let shown = match limit {
            Some(limit) if limit < notes.len() => &notes[..limit],
            _ => notes,
        };

        if json {
            println!("{}", serde_json::to_string_pretty(shown)?);
            return Ok(());
        }

        if shown.is_empty() {
            println!("No notes found matching the criteria.");
            return Ok(());
        }

        let term_width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80);

        for (i, note) in shown.iter().enumerate() {
            if i > 0 {
                println!("{}", "-".repeat(term_width.min(50)));
            }
            self.print_note(note, false);
        }

        if shown.len() < notes.len() {
            println!("\nShowing {} of {} notes", shown.len(), notes.len());
        } else {
            println!(
                "\nFound {} note{}",
                notes.len(),
                if notes.len() == 1 { "" } else { "s" }
            );
        }
        Ok(())
    }

    fn palette(&self) -> (Style, Style) {
        if self.theme.is_dark_mode() {
            (Style::new().bold().white(), Style::new().cyan())
        } else {
            (Style::new().bold().black(), Style::new().blue())
        }
    }

    fn print_note(&self, note: &Note, detailed: bool) {
        let (title_style, tag_style) = self.palette();
        let mut flags = String::new();
        if note.voice_path.is_some() {
            flags.push_str(" [voice]");
        }
        if note.is_pending_summary {
            flags.push_str(" [summarizing]");
        }

        println!(
            "ID: {} | {}{}",
            note.id,
            note.timestamp.format("%Y-%m-%d %H:%M"),
            flags
        );
        println!("Title: {}", title_style.apply_to(&note.title));

        if !note.tags.is_empty() {
            let tags = note
                .tags
                .iter()
                .map(|tag| format!("#{}", tag))
                .collect::<Vec<_>>()
                .join(" ");
            println!("Tags: {}", tag_style.apply_to(tags));
        }

        if detailed {
            if !note.content.is_empty() {
                println!("\n{}", note.content);
            }
            if let (true, Some(path)) = (self.verbose, &note.voice_path) {
                println!("\nRecording: {}", path.display());
            }
        } else {
            let preview = get_content_preview(&note.content, 100);
            if !preview.is_empty() {
                println!("{}", preview);
            }
        }
    }

    async fn handle_edit(
        &self,
        id: i64,
        title: Option<String>,
        content: Option<String>,
        tags: Option<String>,
        edit: bool,
    ) -> Result<()> {
        let note = self.service.get(id).await?;

        let title = title.unwrap_or_else(|| note.title.clone());
        let content = match (content, edit) {
            (Some(c), _) => c,
            (None, true) => self.open_editor(&title, &note.content)?,
            (None, false) => note.content.clone(),
        };
        let tags = match tags {
            Some(t) => parse_tags(Some(t)),
            None => note.tags.clone(),
        };

        let draft = NoteDraft {
            id: Some(id),
            title,
            content,
            tags,
            voice_path: note.voice_path.clone(),
        };
        self.service.save(draft).await?;
        println!("Note {} updated successfully", id);
        Ok(())
    }

    async fn handle_delete(&self, id: i64, force: bool) -> Result<()> {
        let note = self.service.get(id).await?;
        let deleted = self.service.delete(&note).await?;
        println!("Note {} deleted", id);
        if force {
            return Ok(());
        }

        let window = Duration::from_secs(self.config.undo_window_secs);
        print!("Press Enter within {}s to undo... ", window.as_secs());
        stdout().flush()?;

        if wait_for_enter(window).await {
            let restored = self.service.undo_delete(deleted).await?;
            println!("Note restored with ID: {}", restored);
        } else {
            println!();
            debug!("Undo window for note {} closed", id);
        }
        Ok(())
    }

    async fn handle_tags(
        &self,
        id: i64,
        add: Option<String>,
        remove: Option<String>,
        list: bool,
    ) -> Result<()> {
        let mut note = self.service.get(id).await?;

        if let Some(add) = add {
            note = self.service.add_tags(id, &parse_tags(Some(add))).await?;
            println!("Tags added to note {}", id);
        }
        if let Some(remove) = remove {
            note = self.service.remove_tags(id, &parse_tags(Some(remove))).await?;
            println!("Tags removed from note {}", id);
        }

        if list || note.tags.is_empty() {
            if note.tags.is_empty() {
                println!("Note {} has no tags", id);
            } else {
                let (_, tag_style) = self.palette();
                for tag in &note.tags {
                    println!("{}", tag_style.apply_to(format!("#{}", tag)));
                }
            }
        }
        Ok(())
    }

    async fn play_recording(&self, id: i64) -> Result<()> {
        let note = self.service.get(id).await?;
        let Some(path) = note.voice_path else {
            return Err(NoteFlowError::PlayerError {
                message: format!("Note {} has no recording", id),
            });
        };

        let command = self
            .config
            .get_player_command()
            .ok_or_else(|| NoteFlowError::PlayerError {
                message: "No audio player found, set player_command in the config".to_string(),
            })?;
        let player = CommandAudioPlayer::new(command);

        let (done_tx, done_rx) = oneshot::channel();
        player
            .play(
                &path,
                Box::new(move || {
                    let _ = done_tx.send(());
                }),
            )
            .await?;
        println!("Playing {} (Ctrl-C to stop)", path.display());

        tokio::select! {
            finished = done_rx => match finished {
                Ok(()) => println!("Playback finished"),
                Err(_) => warn!("Player stopped before the end of the recording"),
            },
            _ = tokio::signal::ctrl_c() => {
                player.stop().await?;
                println!("Playback stopped");
            }
        }
        Ok(())
    }

    async fn handle_theme(&self, dark: bool, light: bool) -> Result<()> {
        if dark || light {
            self.theme
                .set_dark_mode(dark)
                .await
                .map_err(|e| NoteFlowError::ApplicationError {
                    message: format!("Failed to save theme: {}", e),
                })??;
        }
        println!(
            "Dark mode: {}",
            if self.theme.is_dark_mode() { "on" } else { "off" }
        );
        Ok(())
    }

    async fn show_status(&self, refresh: bool) -> Result<()> {
        let state = if refresh {
            self.gate
                .refresh()
                .await
                .map_err(|e| NoteFlowError::ApplicationError {
                    message: format!("Remote config refresh failed: {}", e),
                })?
        } else {
            self.gate.current()
        };

        println!("App enabled: {}", if state.enabled { "yes" } else { "no" });
        if !state.enabled {
            println!("Message: {}", state.message);
        }
        println!(
            "Minimum supported version: {} (this is version {}{})",
            state.min_supported_version,
            self.config.app_version,
            if self.gate.is_version_supported(self.config.app_version) {
                ""
            } else {
                ", unsupported"
            }
        );
        Ok(())
    }

    fn handle_config(&self, show: bool, reset: bool) -> Result<()> {
        if reset {
            let defaults = Config::default();
            defaults.save(&self.config_path)?;
            println!("Configuration reset: {}", self.config_path.display());
            if show {
                println!("{}", serde_json::to_string_pretty(&defaults)?);
            }
            return Ok(());
        }

        println!("Configuration file: {}", self.config_path.display());
        println!("{}", serde_json::to_string_pretty(&self.config)?);
        Ok(())
    }

    fn open_editor(&self, title: &str, existing_content: &str) -> Result<String> {
        let temp_file = Builder::new().suffix(".txt").tempfile()?;
        let temp_path = temp_file.path().to_path_buf();

        {
            let mut file = OpenOptions::new().write(true).open(&temp_path)?;
            write!(file, "{}", existing_content)?;
        }

        let editor_cmd = self.config.get_editor_command();
        info!(
            "Opening editor for '{}'. Save and exit when done...",
            if title.trim().is_empty() { UNTITLED_TITLE } else { title }
        );
        launch_editor(&editor_cmd, &temp_path)?;

        let content = read_to_string(&temp_path)?;
        Ok(content.trim_end().to_string())
    }
}

fn launch_editor(editor_cmd: &str, file_path: &Path) -> Result<()> {
    let args = split(editor_cmd).map_err(|e| NoteFlowError::ApplicationError {
        message: format!("Failed to parse editor command: {}", e),
    })?;
    let Some((program, rest)) = args.split_first() else {
        return Err(NoteFlowError::ApplicationError {
            message: "Empty editor command".to_string(),
        });
    };

    let status = Command::new(program).args(rest).arg(file_path).status()?;
    if !status.success() {
        return Err(NoteFlowError::ApplicationError {
            message: "Editor exited with non-zero status".to_string(),
        });
    }
    Ok(())
}

/// Waits up to `window` for a line on stdin.
///
/// The read happens on a plain thread: a pending blocking read would
/// otherwise hold the runtime open at shutdown.
async fn wait_for_enter(window: Duration) -> bool {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        if stdin().read_line(&mut line).is_ok() {
            let _ = tx.send(());
        }
    });
    matches!(tokio::time::timeout(window, rx).await, Ok(Ok(())))
}

/// Generate a content preview for displaying brief notes
fn get_content_preview(content: &str, max_len: usize) -> String {
    let first_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    match first_line.char_indices().nth(max_len) {
        Some((cut, _)) => format!("{}...", &first_line[..cut]),
        None => first_line.to_string(),
    }
}
