//! Remote collaborators: recording upload, AI summarization and the remote
//! configuration bundle.
//!
//! Each one is a trait so the flows can be handed fakes; the `Http*` types
//! are the production implementations.
use std::{collections::HashMap, path::Path, sync::RwLock, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    NoteFlowError, Result, SUMMARY_DEFAULT_TITLE, SUMMARY_ERROR_CONTENT, SUMMARY_ERROR_TITLE,
};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// What the summarizer derives from a recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSummary {
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
}

impl AiSummary {
    /// Substituted whenever summarization fails
    pub fn fallback() -> Self {
        Self {
            title: SUMMARY_ERROR_TITLE.to_string(),
            summary: SUMMARY_ERROR_CONTENT.to_string(),
            tags: Vec::new(),
        }
    }

    /// Reads a summarizer payload, tolerating missing or mistyped fields.
    ///
    /// Only a payload that is not a JSON object at all is rejected.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let Some(object) = payload.as_object() else {
            return Err(NoteFlowError::SummarizeFailed {
                message: format!("expected an object, got {}", payload),
            });
        };

        let title = object
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(SUMMARY_DEFAULT_TITLE)
            .to_string();
        let summary = object
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tags = object
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            title,
            summary,
            tags,
        })
    }
}

/// Moves a local recording to durable remote storage
#[async_trait]
pub trait AudioUploader: Send + Sync {
    /// Upload the file and return a download URL for it
    async fn upload(&self, local_file: &Path) -> Result<String>;
}

/// Derives a title, summary and tags from an uploaded recording
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, audio_url: &str) -> Result<AiSummary>;
}

/// Key/value configuration fetched from a remote source, with local defaults
#[async_trait]
pub trait RemoteConfigSource: Send + Sync {
    /// Register values used for keys the remote bundle does not carry
    fn set_defaults(&self, defaults: HashMap<String, Value>);

    /// Fetch the remote bundle and make it active; `Ok(true)` when values changed
    async fn fetch_and_activate(&self) -> Result<bool>;

    fn get_bool(&self, key: &str) -> bool;

    fn get_string(&self, key: &str) -> String;

    fn get_i64(&self, key: &str) -> i64;
}

/// Uploads recordings with a plain `PUT` of the file bytes
pub struct HttpUploader {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpUploader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

#[async_trait]
impl AudioUploader for HttpUploader {
    async fn upload(&self, local_file: &Path) -> Result<String> {
        let bytes = tokio::fs::read(local_file).await.map_err(|e| {
            warn!("Cannot read recording {}: {}", local_file.display(), e);
            NoteFlowError::UploadFailed {
                message: format!("cannot read {}: {}", local_file.display(), e),
            }
        })?;

        let ext = local_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("m4a");
        let url = format!(
            "{}/voice_notes/{}.{}",
            self.base_url,
            uuid::Uuid::new_v4(),
            ext
        );
        debug!("Uploading {} bytes to {}", bytes.len(), url);

        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NoteFlowError::UploadFailed {
                message: format!("storage returned {}: {}", status, body),
            });
        }

        let uploaded: UploadResponse =
            response
                .json()
                .await
                .map_err(|e| NoteFlowError::UploadFailed {
                    message: format!("unreadable storage response: {}", e),
                })?;

        info!("Uploaded {} to {}", local_file.display(), uploaded.url);
        Ok(uploaded.url)
    }
}

/// Calls a callable-style summarization function: `{"data": ..}` in, `{"result": ..}` out
pub struct HttpSummarizer {
    endpoint: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpSummarizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, audio_url: &str) -> Result<AiSummary> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "data": { "audioUrl": audio_url } }))
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NoteFlowError::SummarizeFailed {
                message: format!("summarizer returned {}: {}", status, body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| NoteFlowError::SummarizeFailed {
                message: format!("unreadable summarizer response: {}", e),
            })?;

        let payload = body.get("result").unwrap_or(&body);
        AiSummary::from_payload(payload)
    }
}

/// Remote configuration served as a flat JSON object (or `{"entries": {..}}`)
pub struct HttpRemoteConfig {
    url: String,
    client: reqwest::Client,
    defaults: RwLock<HashMap<String, Value>>,
    active: RwLock<Map<String, Value>>,
}

impl HttpRemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            defaults: RwLock::new(HashMap::new()),
            active: RwLock::new(Map::new()),
        }
    }

    fn value(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.active.read().ok().and_then(|a| a.get(key).cloned()) {
            return Some(v);
        }
        self.defaults.read().ok().and_then(|d| d.get(key).cloned())
    }
}

#[async_trait]
impl RemoteConfigSource for HttpRemoteConfig {
    fn set_defaults(&self, defaults: HashMap<String, Value>) {
        if let Ok(mut current) = self.defaults.write() {
            *current = defaults;
        }
    }

    async fn fetch_and_activate(&self) -> Result<bool> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(NoteFlowError::RemoteConfig {
                message: format!("config endpoint returned {}", response.status()),
            });
        }

        let body: Value = response.json().await?;
        let entries = match body.get("entries").unwrap_or(&body) {
            Value::Object(entries) => entries.clone(),
            other => {
                return Err(NoteFlowError::RemoteConfig {
                    message: format!("expected an object, got {}", other),
                })
            }
        };

        let mut active = self
            .active
            .write()
            .map_err(|_| NoteFlowError::LockAcquisitionFailed {
                message: "Failed to acquire lock on remote config".to_string(),
            })?;
        let changed = *active != entries;
        *active = entries;
        debug!("Activated {} remote config entries", active.len());
        Ok(changed)
    }

    fn get_bool(&self, key: &str) -> bool {
        match self.value(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes" | "on"),
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    fn get_string(&self, key: &str) -> String {
        match self.value(key) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn get_i64(&self, key: &str) -> i64 {
        match self.value(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        }
    }
}

/// Stand-in for every remote service when none is configured.
///
/// Uploads and summaries fail, which leaves voice notes pending; config
/// fetches fail, which keeps the app enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

#[async_trait]
impl AudioUploader for Offline {
    async fn upload(&self, local_file: &Path) -> Result<String> {
        Err(NoteFlowError::UploadFailed {
            message: format!("no upload endpoint configured for {}", local_file.display()),
        })
    }
}

#[async_trait]
impl Summarizer for Offline {
    async fn summarize(&self, _audio_url: &str) -> Result<AiSummary> {
        Err(NoteFlowError::SummarizeFailed {
            message: "no summarization endpoint configured".to_string(),
        })
    }
}

#[async_trait]
impl RemoteConfigSource for Offline {
    fn set_defaults(&self, _defaults: HashMap<String, Value>) {}

    async fn fetch_and_activate(&self) -> Result<bool> {
        Err(NoteFlowError::RemoteConfig {
            message: "no remote config endpoint configured".to_string(),
        })
    }

    fn get_bool(&self, _key: &str) -> bool {
        false
    }

    fn get_string(&self, _key: &str) -> String {
        String::new()
    }

    fn get_i64(&self, _key: &str) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_backend_always_fails() {
        assert!(Offline.upload(Path::new("/tmp/a.3gp")).await.is_err());
        assert!(Offline.summarize("https://x").await.is_err());
        assert!(Offline.fetch_and_activate().await.is_err());
    }

    #[test]
    fn payload_with_all_fields() {
        let payload = json!({"title": "Standup", "summary": "talked", "tags": ["work", "daily"]});
        let summary = AiSummary::from_payload(&payload).unwrap();
        assert_eq!(summary.title, "Standup");
        assert_eq!(summary.summary, "talked");
        assert_eq!(summary.tags, vec!["work", "daily"]);
    }

    #[test]
    fn payload_fields_fall_back_individually() {
        let payload = json!({"title": 5, "tags": ["ok", 3, null]});
        let summary = AiSummary::from_payload(&payload).unwrap();
        assert_eq!(summary.title, SUMMARY_DEFAULT_TITLE);
        assert_eq!(summary.summary, "");
        assert_eq!(summary.tags, vec!["ok"]);
    }

    #[test]
    fn non_object_payload_is_an_error() {
        assert!(matches!(
            AiSummary::from_payload(&json!(["nope"])),
            Err(NoteFlowError::SummarizeFailed { .. })
        ));
    }

    #[test]
    fn getters_use_defaults_until_fetched() {
        let config = HttpRemoteConfig::new("http://127.0.0.1:9/unused");
        config.set_defaults(HashMap::from([
            ("app_enabled".to_string(), json!(true)),
            ("maintenance_message".to_string(), json!("down")),
            ("min_supported_version".to_string(), json!(3)),
        ]));
        assert!(config.get_bool("app_enabled"));
        assert_eq!(config.get_string("maintenance_message"), "down");
        assert_eq!(config.get_i64("min_supported_version"), 3);
        assert!(!config.get_bool("missing"));
        assert_eq!(config.get_string("missing"), "");
        assert_eq!(config.get_i64("missing"), 0);
    }
}
