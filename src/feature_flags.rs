//! Remote kill switch.
//!
//! Fetches a small configuration bundle once per session and tells the caller
//! whether to show the app or a maintenance message. A configuration outage
//! must never lock users out, so every failure resolves to "enabled".
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{sync::watch, task::JoinHandle};

use crate::{NoteFlowError, RemoteConfigSource, Result};

pub const KEY_APP_ENABLED: &str = "app_enabled";
pub const KEY_MAINTENANCE_MESSAGE: &str = "maintenance_message";
pub const KEY_MIN_SUPPORTED_VERSION: &str = "min_supported_version";

pub const DEFAULT_APP_ENABLED: bool = true;
pub const DEFAULT_MAINTENANCE_MESSAGE: &str =
    "This version is currently unavailable. Please check back later.";
pub const DEFAULT_MIN_SUPPORTED_VERSION: i64 = 1;

/// Observable gate fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateState {
    /// True until the current fetch attempt completes; withhold normal content meanwhile
    pub loading: bool,
    pub enabled: bool,
    pub message: String,
    pub min_supported_version: i64,
}

impl GateState {
    fn fallback() -> Self {
        Self {
            loading: false,
            enabled: DEFAULT_APP_ENABLED,
            message: DEFAULT_MAINTENANCE_MESSAGE.to_string(),
            min_supported_version: DEFAULT_MIN_SUPPORTED_VERSION,
        }
    }
}

impl Default for GateState {
    fn default() -> Self {
        Self {
            loading: true,
            enabled: DEFAULT_APP_ENABLED,
            message: String::new(),
            min_supported_version: DEFAULT_MIN_SUPPORTED_VERSION,
        }
    }
}

pub fn default_values() -> HashMap<String, Value> {
    HashMap::from([
        (KEY_APP_ENABLED.to_string(), json!(DEFAULT_APP_ENABLED)),
        (
            KEY_MAINTENANCE_MESSAGE.to_string(),
            json!(DEFAULT_MAINTENANCE_MESSAGE),
        ),
        (
            KEY_MIN_SUPPORTED_VERSION.to_string(),
            json!(DEFAULT_MIN_SUPPORTED_VERSION),
        ),
    ])
}

pub struct FeatureGate {
    source: Arc<dyn RemoteConfigSource>,
    timeout: Duration,
    state: Arc<watch::Sender<GateState>>,

    /// Bumped for every fetch; only the newest fetch may publish
    generation: Arc<AtomicU64>,
}

impl FeatureGate {
    /// Registers the defaults on `source` and starts the first fetch
    pub fn start(source: Arc<dyn RemoteConfigSource>, timeout: Duration) -> Self {
        source.set_defaults(default_values());
        let (state, _) = watch::channel(GateState::default());
        let gate = Self {
            source,
            timeout,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
        };
        let generation = gate.next_generation();
        gate.spawn_fetch(generation);
        gate
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn spawn_fetch(&self, generation: u64) -> JoinHandle<GateState> {
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let latest = Arc::clone(&self.generation);
        let timeout = self.timeout;
        tokio::spawn(async move {
            let fetched = fetch_with_fallback(source.as_ref(), timeout).await;
            // Checked under the channel lock so a superseded fetch cannot land after a newer one
            state.send_if_modified(|current| {
                if latest.load(Ordering::SeqCst) != generation {
                    debug!("Dropping result of superseded fetch {}", generation);
                    return false;
                }
                *current = fetched.clone();
                true
            });
            fetched
        })
    }

    /// Repeats the fetch-with-fallback sequence; `loading` is raised until it completes
    ///
    /// A fetch still in flight from before is superseded: its result is dropped.
    pub fn refresh(&self) -> JoinHandle<GateState> {
        info!("Refreshing remote config");
        let generation = self.next_generation();
        self.state.send_modify(|s| s.loading = true);
        self.spawn_fetch(generation)
    }

    pub fn state(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Waits until the current fetch attempt has completed
    pub async fn wait_ready(&self) -> Result<GateState> {
        let mut rx = self.state.subscribe();
        let ready = rx
            .wait_for(|s| !s.loading)
            .await
            .map_err(|e| NoteFlowError::RemoteConfig {
                message: format!("gate state closed: {}", e),
            })?;
        Ok(ready.clone())
    }

    pub fn is_version_supported(&self, version: i64) -> bool {
        version >= self.state.borrow().min_supported_version
    }
}

async fn fetch_with_fallback(source: &dyn RemoteConfigSource, timeout: Duration) -> GateState {
    match tokio::time::timeout(timeout, source.fetch_and_activate()).await {
        Ok(Ok(changed)) => {
            debug!("Remote config fetched (changed: {})", changed);
            let state = GateState {
                loading: false,
                enabled: source.get_bool(KEY_APP_ENABLED),
                message: source.get_string(KEY_MAINTENANCE_MESSAGE),
                min_supported_version: source.get_i64(KEY_MIN_SUPPORTED_VERSION),
            };
            if !state.enabled {
                warn!("App disabled by remote config: {}", state.message);
            }
            state
        }
        Ok(Err(e)) => {
            warn!("Remote config fetch failed, keeping app enabled: {}", e);
            GateState::fallback()
        }
        Err(_) => {
            warn!(
                "Remote config fetch timed out after {:?}, keeping app enabled",
                timeout
            );
            GateState::fallback()
        }
    }
}
