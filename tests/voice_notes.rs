use std::{sync::Arc, time::Duration};

use serde_json::json;
use wiremock::{
    matchers::{method, path_regex},
    Mock, MockServer, ResponseTemplate,
};

use noteflow::{
    EnrichmentOutcome, FileNoteStore, HttpSummarizer, HttpUploader, NoteDraft, NotePipeline,
    NoteService, NoteStore, SaveOutcome, SortType, PLACEHOLDER_TITLE, SUMMARY_ERROR_CONTENT,
    SUMMARY_ERROR_TITLE,
};

async fn mock_storage(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path_regex(r"^/voice_notes/.+"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "url": "https://cdn.test/clip" })),
        )
        .mount(server)
        .await;
}

fn service(store: Arc<FileNoteStore>, server: &MockServer) -> NoteService {
    NoteService::new(
        store,
        Arc::new(HttpUploader::new(server.uri())),
        Arc::new(HttpSummarizer::new(format!("{}/summarize", server.uri()))),
        Duration::from_secs(4),
    )
}

fn voice_draft(dir: &std::path::Path) -> NoteDraft {
    let clip = dir.join("voice_note_1.m4a");
    std::fs::write(&clip, b"audio").unwrap();
    NoteDraft {
        voice_path: Some(clip),
        ..NoteDraft::default()
    }
}

#[tokio::test]
async fn voice_note_is_patched_on_disk() {
    let server = MockServer::start().await;
    mock_storage(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "title": "Standup", "summary": "Ship the release", "tags": ["work"] }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileNoteStore::open(dir.path().join("notes")).unwrap());
    let service = service(store.clone(), &server);

    let SaveOutcome::Enriching { id, task } = service.save(voice_draft(dir.path())).await.unwrap()
    else {
        panic!("voice-only draft should take the fast path");
    };

    let outcome = task.await.unwrap();
    assert!(matches!(outcome, EnrichmentOutcome::Summarized(_)));

    // A fresh store reads the patched row back from disk
    let reopened = FileNoteStore::open(dir.path().join("notes")).unwrap();
    let note = reopened.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(note.id, id);
    assert_eq!(note.title, "Standup");
    assert_eq!(note.content, "Ship the release");
    assert_eq!(note.tags, vec!["work"]);
    assert!(!note.is_pending_summary);
    assert!(note.voice_path.is_some());
}

#[tokio::test]
async fn summarizer_outage_patches_fallback() {
    let server = MockServer::start().await;
    mock_storage(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileNoteStore::open(dir.path().join("notes")).unwrap());
    let service = service(store.clone(), &server);

    let outcome = service.save(voice_draft(dir.path())).await.unwrap();
    let id = outcome.id();
    let SaveOutcome::Enriching { task, .. } = outcome else {
        panic!("expected enrichment");
    };
    assert!(matches!(task.await.unwrap(), EnrichmentOutcome::FellBack(_)));

    let note = store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(note.title, SUMMARY_ERROR_TITLE);
    assert_eq!(note.content, SUMMARY_ERROR_CONTENT);
    assert!(note.tags.is_empty());
    assert!(!note.is_pending_summary);
}

#[tokio::test]
async fn upload_outage_leaves_note_pending() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": {} })))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileNoteStore::open(dir.path().join("notes")).unwrap());
    let service = service(store.clone(), &server);

    let outcome = service.save(voice_draft(dir.path())).await.unwrap();
    let id = outcome.id();
    let SaveOutcome::Enriching { task, .. } = outcome else {
        panic!("expected enrichment");
    };
    assert_eq!(task.await.unwrap(), EnrichmentOutcome::UploadFailed { id });

    let note = store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(note.title, PLACEHOLDER_TITLE);
    assert!(note.is_pending_summary);
}

#[tokio::test]
async fn pipeline_sees_placeholder_replaced() {
    let server = MockServer::start().await;
    mock_storage(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "title": "Dentist", "summary": "Tuesday at 3", "tags": [] }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileNoteStore::open(dir.path().join("notes")).unwrap());
    let service = service(store.clone(), &server);
    let mut pipeline =
        NotePipeline::start_with(&*store, "dentist".to_string(), SortType::Latest);
    assert!(pipeline.current().is_empty());

    let SaveOutcome::Enriching { id, task } = service.save(voice_draft(dir.path())).await.unwrap()
    else {
        panic!("expected enrichment");
    };
    task.await.unwrap();

    let mut notes = pipeline.notes();
    let found = tokio::time::timeout(
        Duration::from_secs(5),
        notes.wait_for(|notes| notes.iter().any(|n| n.id == id)),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Dentist");

    pipeline.stop().await.unwrap();
}
