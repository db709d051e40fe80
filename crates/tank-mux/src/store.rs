//! Settings persistence
//!
//! The registry's bindings and the configured incoming service survive
//! restarts. Writes go through a background task so a slow or failing store
//! never blocks update processing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RepeaterError;
use crate::events::RepeaterEvent;
use crate::state::{IncomingServiceBinding, TankKey};

/// One persisted slot binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSlot {
    /// Slot index
    pub slot: u8,
    /// Tank bound to the slot
    pub key: TankKey,
    /// Operator-assigned name
    #[serde(default)]
    pub custom_name: String,
}

/// Everything the repeater persists
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Configured incoming service
    #[serde(default)]
    pub binding: Option<IncomingServiceBinding>,
    /// Slot bindings
    #[serde(default)]
    pub slots: Vec<PersistedSlot>,
    /// Original service hidden from the GUI, made visible again on uninstall
    #[serde(default)]
    pub hidden_original: Option<String>,
}

/// Backing storage for [`PersistedState`]
pub trait SettingsStore: Send + Sync {
    /// Load the stored state; a store that was never written loads as empty
    fn load(&self) -> Result<PersistedState, RepeaterError>;

    /// Replace the stored state
    fn save(&self, state: &PersistedState) -> Result<(), RepeaterError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<PersistedState, RepeaterError> {
        if !self.path.exists() {
            debug!("No registry file at {:?}", self.path);
            return Ok(PersistedState::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&contents)?;
        Ok(state)
    }

    fn save(&self, state: &PersistedState) -> Result<(), RepeaterError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(state)?;
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    saves: Mutex<usize>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with a state
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Last saved state
    pub fn current(&self) -> PersistedState {
        self.state.lock().clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<PersistedState, RepeaterError> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &PersistedState) -> Result<(), RepeaterError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepeaterError::PersistenceWriteFailure(
                "store is read-only".to_string(),
            ));
        }
        *self.state.lock() = state.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// Background persistence writer
///
/// Saves each received state, skipping ahead to the newest one when several
/// are queued. Failures are logged and reported as
/// [`RepeaterEvent::PersistenceFailed`]; the in-memory registry stays
/// authoritative.
pub async fn run_persistence_writer(
    store: Arc<dyn SettingsStore>,
    mut rx: mpsc::Receiver<PersistedState>,
    event_tx: Option<mpsc::Sender<RepeaterEvent>>,
) {
    info!("Persistence writer started");

    while let Some(mut state) = rx.recv().await {
        while let Ok(newer) = rx.try_recv() {
            state = newer;
        }

        let store = store.clone();
        let result = tokio::task::spawn_blocking(move || store.save(&state))
            .await
            .unwrap_or_else(|e| Err(RepeaterError::PersistenceWriteFailure(e.to_string())));

        match result {
            Ok(()) => debug!("Registry persisted"),
            Err(e) => {
                warn!("Failed to persist registry: {}", e);
                if let Some(tx) = &event_tx {
                    let _ = tx
                        .send(RepeaterEvent::PersistenceFailed {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
    }

    info!("Persistence writer stopped");
}
