//! Saving notes and enriching voice-only notes in the background.
//!
//! A save with no title and no content but with a recording takes the fast
//! path: a placeholder note is inserted and its identifier returned at once,
//! while a background task uploads the clip, asks the summarizer for a title,
//! summary and tags, and patches the same record. Upload failure leaves the
//! placeholder pending for good; summarizer failure patches in a fixed
//! fallback. Nothing is retried.
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::{
    AiSummary, AudioUploader, Note, NoteFlowError, NoteStore, Result, Summarizer, UNTITLED_TITLE,
};

/// What the user typed into the editor
#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    /// Set when editing an existing note
    pub id: Option<i64>,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub voice_path: Option<PathBuf>,
}

impl NoteDraft {
    /// Voice-only drafts skip straight to the placeholder and enrichment
    pub fn is_voice_only(&self) -> bool {
        self.id.is_none()
            && self.title.trim().is_empty()
            && self.content.trim().is_empty()
            && self.voice_path.is_some()
    }
}

/// Result of [`NoteService::save`]
#[derive(Debug)]
pub enum SaveOutcome {
    /// Stored as typed
    Saved { id: i64 },
    /// Placeholder stored, enrichment running in `task`
    Enriching {
        id: i64,
        task: JoinHandle<EnrichmentOutcome>,
    },
}

impl SaveOutcome {
    pub fn id(&self) -> i64 {
        match self {
            SaveOutcome::Saved { id } | SaveOutcome::Enriching { id, .. } => *id,
        }
    }
}

/// How a background enrichment ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// Patched with the summarizer's answer
    Summarized(Note),
    /// Patched with the fixed error title and content
    FellBack(Note),
    /// The clip never reached remote storage; the note stays pending
    UploadFailed { id: i64 },
    /// The note was deleted before it could be patched
    NoteMissing { id: i64 },
    /// The store rejected the patch
    PatchFailed { id: i64, message: String },
}

/// A deleted note that can be brought back while the undo window is open
#[derive(Debug, Clone)]
pub struct DeletedNote {
    note: Note,
    deleted_at: Instant,
}

impl DeletedNote {
    pub fn note(&self) -> &Note {
        &self.note
    }
}

/// Marks note `id` as being enriched until dropped
struct InFlight {
    set: Arc<Mutex<HashSet<i64>>>,
    id: i64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        match self.set.lock() {
            Ok(mut set) => {
                set.remove(&self.id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.id);
            }
        }
    }
}

/// Note operations used by the editor and list screens
#[derive(Clone)]
pub struct NoteService {
    store: Arc<dyn NoteStore>,
    uploader: Arc<dyn AudioUploader>,
    summarizer: Arc<dyn Summarizer>,
    undo_window: Duration,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl NoteService {
    pub fn new(
        store: Arc<dyn NoteStore>,
        uploader: Arc<dyn AudioUploader>,
        summarizer: Arc<dyn Summarizer>,
        undo_window: Duration,
    ) -> Self {
        Self {
            store,
            uploader,
            summarizer,
            undo_window,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn NoteStore> {
        &self.store
    }

    /// Persists a draft.
    ///
    /// Edits and regular saves are stored synchronously with
    /// `is_pending_summary = false`. A voice-only draft inserts a placeholder
    /// and hands back the running enrichment task.
    pub async fn save(&self, draft: NoteDraft) -> Result<SaveOutcome> {
        if draft.is_voice_only() {
            if let Some(path) = draft.voice_path.clone() {
                return self.save_voice_only(path).await;
            }
        }

        let title = match draft.title.trim() {
            "" => UNTITLED_TITLE.to_string(),
            t => t.to_string(),
        };
        let note = Note {
            id: draft.id.unwrap_or(0),
            title,
            content: draft.content.trim().to_string(),
            timestamp: Utc::now(),
            tags: draft.tags,
            voice_path: draft.voice_path,
            is_pending_summary: false,
        };

        if let Some(id) = draft.id {
            self.store.update(&note).await?;
            info!("Note {} saved", id);
            Ok(SaveOutcome::Saved { id })
        } else {
            let id = self.store.insert(&note).await?;
            info!("Note {} created", id);
            Ok(SaveOutcome::Saved { id })
        }
    }

    async fn save_voice_only(&self, path: PathBuf) -> Result<SaveOutcome> {
        let id = self.store.insert(&Note::voice_placeholder(path.clone())).await?;
        info!("Voice placeholder {} inserted, enriching in background", id);
        let task = self.enrich(id, path)?;
        Ok(SaveOutcome::Enriching { id, task })
    }

    /// Starts enrichment of note `id` from the clip at `audio_path`.
    ///
    /// Fails with [`NoteFlowError::EnrichmentInFlight`] if the same note is
    /// already being enriched.
    pub fn enrich(&self, id: i64, audio_path: PathBuf) -> Result<JoinHandle<EnrichmentOutcome>> {
        {
            let mut in_flight =
                self.in_flight
                    .lock()
                    .map_err(|_| NoteFlowError::LockAcquisitionFailed {
                        message: "Failed to acquire lock on enrichment set".to_string(),
                    })?;
            if !in_flight.insert(id) {
                warn!("Enrichment for note {} is already running", id);
                return Err(NoteFlowError::EnrichmentInFlight { id });
            }
        }

        let guard = InFlight {
            set: Arc::clone(&self.in_flight),
            id,
        };
        let service = self.clone();
        Ok(tokio::spawn(async move {
            // Released however the task ends, panics and aborts included
            let _guard = guard;
            service.run_enrichment(id, &audio_path).await
        }))
    }

    /// Whether note `id` has an enrichment task running
    pub fn is_enriching(&self, id: i64) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&id))
            .unwrap_or(false)
    }

    async fn run_enrichment(&self, id: i64, audio_path: &Path) -> EnrichmentOutcome {
        debug!("Uploading recording for note {}", id);
        let url = match self.uploader.upload(audio_path).await {
            Ok(url) => url,
            Err(e) => {
                warn!("Upload for note {} failed, leaving it pending: {}", id, e);
                return EnrichmentOutcome::UploadFailed { id };
            }
        };

        debug!("Summarizing note {} from {}", id, url);
        let (summary, fell_back) = match self.summarizer.summarize(&url).await {
            Ok(summary) => (summary, false),
            Err(e) => {
                warn!("Summarization for note {} failed: {}", id, e);
                (AiSummary::fallback(), true)
            }
        };

        let current = match self.store.get_by_id(id).await {
            Ok(Some(note)) => note,
            Ok(None) => {
                warn!("Note {} disappeared before enrichment finished", id);
                return EnrichmentOutcome::NoteMissing { id };
            }
            Err(e) => {
                error!("Failed to reload note {} for patching: {}", id, e);
                return EnrichmentOutcome::PatchFailed {
                    id,
                    message: e.to_string(),
                };
            }
        };

        let patched = Note {
            title: summary.title,
            content: summary.summary,
            tags: summary.tags,
            is_pending_summary: false,
            ..current
        };
        match self.store.update(&patched).await {
            Ok(()) if fell_back => {
                info!("Note {} patched with fallback summary", id);
                EnrichmentOutcome::FellBack(patched)
            }
            Ok(()) => {
                info!("Note {} enriched: {}", id, patched.title);
                EnrichmentOutcome::Summarized(patched)
            }
            Err(NoteFlowError::NoteNotFound { .. }) => EnrichmentOutcome::NoteMissing { id },
            Err(e) => {
                error!("Failed to patch note {}: {}", id, e);
                EnrichmentOutcome::PatchFailed {
                    id,
                    message: e.to_string(),
                }
            }
        }
    }

    pub async fn get(&self, id: i64) -> Result<Note> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or(NoteFlowError::NoteNotFound { id })
    }

    pub async fn update(&self, note: &Note) -> Result<()> {
        self.store.update(note).await
    }

    /// Deletes a note, returning what is needed to undo it
    pub async fn delete(&self, note: &Note) -> Result<DeletedNote> {
        self.store.delete(note).await?;
        info!("Note {} deleted", note.id);
        Ok(DeletedNote {
            note: note.clone(),
            deleted_at: Instant::now(),
        })
    }

    /// Re-inserts a deleted note as a new record; its old identifier is not restored
    pub async fn undo_delete(&self, deleted: DeletedNote) -> Result<i64> {
        if deleted.deleted_at.elapsed() > self.undo_window {
            return Err(NoteFlowError::UndoExpired {
                id: deleted.note.id,
            });
        }
        let id = self.store.insert(&deleted.note.without_id()).await?;
        info!("Note {} restored as {}", deleted.note.id, id);
        Ok(id)
    }

    /// Appends tags to a note, keeping its existing ones
    pub async fn add_tags(&self, id: i64, tags: &[String]) -> Result<Note> {
        let mut note = self.get(id).await?;
        note.tags.extend(tags.iter().cloned());
        self.store.update(&note).await?;
        Ok(note)
    }

    /// Removes every occurrence of the given tags from a note
    pub async fn remove_tags(&self, id: i64, tags: &[String]) -> Result<Note> {
        let mut note = self.get(id).await?;
        note.tags.retain(|t| !tags.contains(t));
        self.store.update(&note).await?;
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::{MemoryNoteStore, PLACEHOLDER_TITLE, SUMMARY_ERROR_CONTENT, SUMMARY_ERROR_TITLE};

    struct FakeUploader {
        fail: bool,
    }

    #[async_trait]
    impl AudioUploader for FakeUploader {
        async fn upload(&self, local_file: &Path) -> Result<String> {
            if self.fail {
                return Err(NoteFlowError::UploadFailed {
                    message: "offline".into(),
                });
            }
            Ok(format!("https://storage.test/{}", local_file.display()))
        }
    }

    struct FakeSummarizer {
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, _audio_url: &str) -> Result<AiSummary> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(NoteFlowError::SummarizeFailed {
                    message: "500".into(),
                });
            }
            Ok(AiSummary {
                title: "Groceries".into(),
                summary: "milk and eggs".into(),
                tags: vec!["shopping".into()],
            })
        }
    }

    fn service(upload_fails: bool, summarize_fails: bool) -> NoteService {
        NoteService::new(
            Arc::new(MemoryNoteStore::new()),
            Arc::new(FakeUploader { fail: upload_fails }),
            Arc::new(FakeSummarizer {
                fail: summarize_fails,
                gate: None,
            }),
            Duration::from_secs(5),
        )
    }

    fn voice_draft() -> NoteDraft {
        NoteDraft {
            voice_path: Some(PathBuf::from("/tmp/voice_note_1.3gp")),
            ..NoteDraft::default()
        }
    }

    #[tokio::test]
    async fn regular_save_stores_trimmed_fields() {
        let service = service(false, false);
        let outcome = service
            .save(NoteDraft {
                title: "  Plan  ".into(),
                content: " steps ".into(),
                tags: vec!["work".into()],
                ..NoteDraft::default()
            })
            .await
            .unwrap();

        let SaveOutcome::Saved { id } = outcome else {
            panic!("regular save must not enrich");
        };
        let note = service.get(id).await.unwrap();
        assert_eq!(note.title, "Plan");
        assert_eq!(note.content, "steps");
        assert_eq!(note.tags, vec!["work"]);
        assert!(!note.is_pending_summary);
    }

    #[tokio::test]
    async fn blank_title_with_content_becomes_untitled() {
        let service = service(false, false);
        let id = service
            .save(NoteDraft {
                content: "body".into(),
                voice_path: Some(PathBuf::from("/tmp/clip.3gp")),
                ..NoteDraft::default()
            })
            .await
            .unwrap()
            .id();
        let note = service.get(id).await.unwrap();
        assert_eq!(note.title, UNTITLED_TITLE);
        assert!(!note.is_pending_summary);
    }

    #[tokio::test]
    async fn voice_only_save_inserts_placeholder_then_patches_it() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryNoteStore::new());
        let service = NoteService::new(
            store.clone(),
            Arc::new(FakeUploader { fail: false }),
            Arc::new(FakeSummarizer {
                fail: false,
                gate: Some(gate.clone()),
            }),
            Duration::from_secs(5),
        );

        let SaveOutcome::Enriching { id, task } = service.save(voice_draft()).await.unwrap() else {
            panic!("voice-only save must enrich");
        };

        let placeholder = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(placeholder.title, PLACEHOLDER_TITLE);
        assert!(placeholder.content.is_empty());
        assert!(placeholder.is_pending_summary);
        assert!(service.is_enriching(id));

        gate.notify_one();
        let EnrichmentOutcome::Summarized(patched) = task.await.unwrap() else {
            panic!("expected a successful enrichment");
        };
        assert_eq!(patched.id, id);

        let stored = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Groceries");
        assert_eq!(stored.content, "milk and eggs");
        assert_eq!(stored.tags, vec!["shopping"]);
        assert!(!stored.is_pending_summary);
        assert_eq!(stored.voice_path, placeholder.voice_path);
        assert!(!service.is_enriching(id));
    }

    #[tokio::test]
    async fn failed_summary_patches_fallback() {
        let service = service(false, true);
        let SaveOutcome::Enriching { id, task } = service.save(voice_draft()).await.unwrap() else {
            panic!("voice-only save must enrich");
        };
        assert!(matches!(task.await.unwrap(), EnrichmentOutcome::FellBack(_)));

        let note = service.get(id).await.unwrap();
        assert_eq!(note.title, SUMMARY_ERROR_TITLE);
        assert_eq!(note.content, SUMMARY_ERROR_CONTENT);
        assert!(note.tags.is_empty());
        assert!(!note.is_pending_summary);
    }

    #[tokio::test]
    async fn failed_upload_leaves_placeholder_pending() {
        let service = service(true, false);
        let SaveOutcome::Enriching { id, task } = service.save(voice_draft()).await.unwrap() else {
            panic!("voice-only save must enrich");
        };
        assert_eq!(task.await.unwrap(), EnrichmentOutcome::UploadFailed { id });

        let note = service.get(id).await.unwrap();
        assert_eq!(note.title, PLACEHOLDER_TITLE);
        assert!(note.is_pending_summary);
    }

    #[tokio::test]
    async fn second_enrichment_of_same_note_is_refused() {
        let gate = Arc::new(Notify::new());
        let service = NoteService::new(
            Arc::new(MemoryNoteStore::new()),
            Arc::new(FakeUploader { fail: false }),
            Arc::new(FakeSummarizer {
                fail: false,
                gate: Some(gate.clone()),
            }),
            Duration::from_secs(5),
        );
        let SaveOutcome::Enriching { id, task } = service.save(voice_draft()).await.unwrap() else {
            panic!("voice-only save must enrich");
        };

        assert!(matches!(
            service.enrich(id, PathBuf::from("/tmp/other.3gp")),
            Err(NoteFlowError::EnrichmentInFlight { .. })
        ));

        gate.notify_one();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn deleted_placeholder_is_reported_missing() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryNoteStore::new());
        let service = NoteService::new(
            store.clone(),
            Arc::new(FakeUploader { fail: false }),
            Arc::new(FakeSummarizer {
                fail: false,
                gate: Some(gate.clone()),
            }),
            Duration::from_secs(5),
        );
        let SaveOutcome::Enriching { id, task } = service.save(voice_draft()).await.unwrap() else {
            panic!("voice-only save must enrich");
        };

        let placeholder = service.get(id).await.unwrap();
        service.delete(&placeholder).await.unwrap();
        gate.notify_one();

        assert_eq!(task.await.unwrap(), EnrichmentOutcome::NoteMissing { id });
        assert!(store.get_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn editing_keeps_the_identifier() {
        let service = service(false, false);
        let id = service
            .save(NoteDraft {
                title: "first".into(),
                ..NoteDraft::default()
            })
            .await
            .unwrap()
            .id();

        let again = service
            .save(NoteDraft {
                id: Some(id),
                title: "second".into(),
                ..NoteDraft::default()
            })
            .await
            .unwrap()
            .id();

        assert_eq!(id, again);
        assert_eq!(service.get(id).await.unwrap().title, "second");
    }

    #[tokio::test]
    async fn undo_reinserts_as_new_record() {
        let service = service(false, false);
        let id = service
            .save(NoteDraft {
                title: "keep me".into(),
                tags: vec!["a".into()],
                ..NoteDraft::default()
            })
            .await
            .unwrap()
            .id();
        let note = service.get(id).await.unwrap();
        let mut live = service.store().observe_all();

        let deleted = service.delete(&note).await.unwrap();
        assert!(live.borrow_and_update().is_empty());

        let restored_id = service.undo_delete(deleted).await.unwrap();
        assert_ne!(restored_id, id);
        let restored = service.get(restored_id).await.unwrap();
        assert_eq!(
            Note {
                id: note.id,
                ..restored
            },
            note
        );
    }

    #[tokio::test]
    async fn undo_after_window_is_refused() {
        let service = NoteService::new(
            Arc::new(MemoryNoteStore::new()),
            Arc::new(FakeUploader { fail: false }),
            Arc::new(FakeSummarizer {
                fail: false,
                gate: None,
            }),
            Duration::ZERO,
        );
        let id = service
            .save(NoteDraft {
                title: "gone".into(),
                ..NoteDraft::default()
            })
            .await
            .unwrap()
            .id();
        let note = service.get(id).await.unwrap();
        let deleted = service.delete(&note).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(matches!(
            service.undo_delete(deleted).await,
            Err(NoteFlowError::UndoExpired { .. })
        ));
    }

    #[tokio::test]
    async fn tag_edits_preserve_order_and_duplicates() {
        let service = service(false, false);
        let id = service
            .save(NoteDraft {
                title: "t".into(),
                tags: vec!["a".into(), "b".into()],
                ..NoteDraft::default()
            })
            .await
            .unwrap()
            .id();

        let note = service
            .add_tags(id, &["a".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(note.tags, vec!["a", "b", "a", "c"]);

        let note = service.remove_tags(id, &["a".to_string()]).await.unwrap();
        assert_eq!(note.tags, vec!["b", "c"]);
    }

    struct PanickingSummarizer;

    #[async_trait]
    impl Summarizer for PanickingSummarizer {
        async fn summarize(&self, _audio_url: &str) -> Result<AiSummary> {
            panic!("summarizer crashed");
        }
    }

    /// Names the summary after the clip, once every expected caller has arrived
    struct ClipSummarizer {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl Summarizer for ClipSummarizer {
        async fn summarize(&self, audio_url: &str) -> Result<AiSummary> {
            self.barrier.wait().await;
            let clip = audio_url.rsplit('/').next().unwrap_or_default().to_string();
            Ok(AiSummary {
                title: format!("About {clip}"),
                summary: format!("transcript of {clip}"),
                tags: vec![clip],
            })
        }
    }

    #[tokio::test]
    async fn crashed_enrichment_releases_the_note() {
        let service = NoteService::new(
            Arc::new(MemoryNoteStore::new()),
            Arc::new(FakeUploader { fail: false }),
            Arc::new(PanickingSummarizer),
            Duration::from_secs(5),
        );
        let SaveOutcome::Enriching { id, task } = service.save(voice_draft()).await.unwrap() else {
            panic!("voice-only save must enrich");
        };

        assert!(task.await.unwrap_err().is_panic());
        assert!(!service.is_enriching(id));

        let retry = service
            .enrich(id, PathBuf::from("/tmp/voice_note_1.3gp"))
            .unwrap();
        assert!(retry.await.unwrap_err().is_panic());
        assert!(service.get(id).await.unwrap().is_pending_summary);
    }

    #[tokio::test]
    async fn distinct_notes_enrich_side_by_side() {
        let store = Arc::new(MemoryNoteStore::new());
        let service = NoteService::new(
            store.clone(),
            Arc::new(FakeUploader { fail: false }),
            Arc::new(ClipSummarizer {
                barrier: tokio::sync::Barrier::new(2),
            }),
            Duration::from_secs(5),
        );

        let mut running = Vec::new();
        for clip in ["first.3gp", "second.3gp"] {
            let draft = NoteDraft {
                voice_path: Some(PathBuf::from("/tmp").join(clip)),
                ..NoteDraft::default()
            };
            let SaveOutcome::Enriching { id, task } = service.save(draft).await.unwrap() else {
                panic!("voice-only save must enrich");
            };
            running.push((id, clip, task));
        }
        assert_ne!(running[0].0, running[1].0);
        assert!(running.iter().all(|(id, _, _)| service.is_enriching(*id)));

        for (id, clip, task) in running {
            let EnrichmentOutcome::Summarized(patched) = task.await.unwrap() else {
                panic!("expected a successful enrichment");
            };
            assert_eq!(patched.id, id);

            let stored = store.get_by_id(id).await.unwrap().unwrap();
            assert_eq!(stored.title, format!("About {clip}"));
            assert_eq!(stored.content, format!("transcript of {clip}"));
            assert_eq!(stored.tags, vec![clip]);
            assert_eq!(stored.voice_path, Some(PathBuf::from("/tmp").join(clip)));
            assert!(!stored.is_pending_summary);
            assert!(!service.is_enriching(id));
        }
    }
}
