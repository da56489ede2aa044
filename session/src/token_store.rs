//! Durable `{token, user}` slot shared by every context of one profile.
//!
//! ARCHITECTURE
//! ============
//! A [`StorageBackend`] owns the bytes (memory or a JSON file). Each
//! [`TokenStore`] is a per-context handle over that backend, tagged with a
//! [`ContextId`]. Writes and clears broadcast one [`StorageEvent`] per changed
//! slot; subscribers only see events raised by *other* contexts, mirroring
//! how browser storage events skip the tab that made the change.
//!
//! Changes made outside this process (another CLI invocation rewriting the
//! token file) are picked up by a polling watcher and reported with
//! [`ContextId::EXTERNAL`].
//!
//! TRADE-OFFS
//! ==========
//! There is no locking across processes: every write goes to its own temp
//! file (pid + sequence number) and is renamed into place, so readers never
//! see a partial record, but two writers simply race and the last rename wins.

#[cfg(test)]
#[path = "token_store_test.rs"]
mod tests;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::types::{PersistedTokenRecord, UserSummary};

const EVENT_CAPACITY: usize = 64;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("token store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("token store contents are corrupt: {0}")]
    Corrupt(String),
}

// =============================================================================
// EVENTS
// =============================================================================

/// The two named slots of the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Token,
    User,
}

impl SlotKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::User => "user",
        }
    }
}

/// Identifies the context (tab, process, manager) that changed the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Changes observed on the backend that no handle in this process made.
    pub const EXTERNAL: Self = Self(Uuid::nil());

    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// A change to one slot, carrying its old and new serialized values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: SlotKey,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub origin: ContextId,
}

/// Subscription to slot changes made by other contexts.
pub struct StorageEvents {
    rx: broadcast::Receiver<StorageEvent>,
    context: ContextId,
}

impl StorageEvents {
    /// Wait for the next foreign change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.context => {}
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "storage event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// =============================================================================
// BACKENDS
// =============================================================================

/// Raw persistence for the single slot.
pub trait StorageBackend: Send + Sync {
    /// Load the current record; `None` when never written or cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read or parsed.
    fn load(&self) -> Result<Option<PersistedTokenRecord>, StoreError>;

    /// Replace the record in one step. `None` clears it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn save(&self, record: Option<&PersistedTokenRecord>) -> Result<(), StoreError>;
}

/// Process-local backend.
#[derive(Default)]
pub struct MemoryBackend {
    record: Mutex<Option<PersistedTokenRecord>>,
}

impl StorageBackend for MemoryBackend {
    fn load(&self) -> Result<Option<PersistedTokenRecord>, StoreError> {
        Ok(self.record.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, record: Option<&PersistedTokenRecord>) -> Result<(), StoreError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = record.cloned();
        Ok(())
    }
}

/// JSON file backend: `{"token": "...", "user": {...}}`.
pub struct FileBackend {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct FileSlots {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<UserSummary>,
}

impl FileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unique per write, so concurrent writers never share a temp file.
    fn temp_path(&self) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut name = self.path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
        name.push(format!(".tmp.{}.{seq}", std::process::id()));
        self.path.with_file_name(name)
    }
}

impl StorageBackend for FileBackend {
    fn load(&self) -> Result<Option<PersistedTokenRecord>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let slots: FileSlots = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(slots
            .token
            .filter(|token| !token.is_empty())
            .map(|token| PersistedTokenRecord { token, user: slots.user }))
    }

    fn save(&self, record: Option<&PersistedTokenRecord>) -> Result<(), StoreError> {
        let Some(record) = record else {
            return match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let slots = FileSlots { token: Some(record.token.clone()), user: record.user.clone() };
        let json = serde_json::to_string_pretty(&slots).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

// =============================================================================
// TOKEN STORE
// =============================================================================

struct Shared {
    backend: Box<dyn StorageBackend>,
    /// Last record this process wrote or observed; the watcher diffs against it.
    last_known: Mutex<Option<PersistedTokenRecord>>,
    events: broadcast::Sender<StorageEvent>,
}

/// Per-context handle to the shared slot. Cheap to clone; clones share the
/// same context. Use [`TokenStore::open_context`] for an independent one.
#[derive(Clone)]
pub struct TokenStore {
    shared: Arc<Shared>,
    context: ContextId,
}

impl TokenStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        let initial = backend.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "token store unreadable at open; treating as empty");
            None
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared { backend: Box::new(backend), last_known: Mutex::new(initial), events }),
            context: ContextId::new(),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(FileBackend::new(path))
    }

    /// A new handle on the same slot with its own context, as a second tab.
    #[must_use]
    pub fn open_context(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), context: ContextId::new() }
    }

    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Read the current slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn read(&self) -> Result<Option<PersistedTokenRecord>, StoreError> {
        self.shared.backend.load()
    }

    /// The stored token, if any. Unreadable storage counts as empty.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        match self.read() {
            Ok(record) => record.map(|r| r.token),
            Err(e) => {
                tracing::warn!(error = %e, "token store read failed");
                None
            }
        }
    }

    /// Overwrite both slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write; no event is sent.
    pub fn write(&self, token: &str, user: Option<&UserSummary>) -> Result<(), StoreError> {
        let record = PersistedTokenRecord { token: token.to_owned(), user: user.cloned() };
        self.replace(Some(record), self.context)
    }

    /// Empty both slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the clear; no event is sent.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.replace(None, self.context)
    }

    /// Subscribe to changes made by other contexts.
    #[must_use]
    pub fn subscribe(&self) -> StorageEvents {
        StorageEvents { rx: self.shared.events.subscribe(), context: self.context }
    }

    /// Compare the backend against the last known record and report any
    /// difference as an external change. Returns the number of events sent.
    pub fn poll_external(&self) -> usize {
        let current = match self.shared.backend.load() {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(error = %e, "token store poll failed");
                return 0;
            }
        };
        let mut last = self.shared.last_known.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == current {
            return 0;
        }
        let events = diff_events(last.as_ref(), current.as_ref(), ContextId::EXTERNAL);
        *last = current;
        drop(last);
        self.publish(events)
    }

    /// Poll the backend every `interval` for changes made by other processes.
    #[must_use]
    pub fn spawn_watcher(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sent = store.poll_external();
                if sent > 0 {
                    tracing::debug!(sent, "external token store change detected");
                }
            }
        })
    }

    fn replace(&self, next: Option<PersistedTokenRecord>, origin: ContextId) -> Result<(), StoreError> {
        let mut last = self.shared.last_known.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.shared.backend.load().unwrap_or_else(|_| last.clone());
        self.shared.backend.save(next.as_ref())?;
        let events = diff_events(previous.as_ref(), next.as_ref(), origin);
        *last = next;
        drop(last);
        self.publish(events);
        Ok(())
    }

    fn publish(&self, events: Vec<StorageEvent>) -> usize {
        let count = events.len();
        for event in events {
            // No receivers is fine: nobody is listening yet.
            let _ = self.shared.events.send(event);
        }
        count
    }
}

fn diff_events(
    old: Option<&PersistedTokenRecord>,
    new: Option<&PersistedTokenRecord>,
    origin: ContextId,
) -> Vec<StorageEvent> {
    let mut events = Vec::with_capacity(2);

    let old_token = old.map(|r| r.token.clone());
    let new_token = new.map(|r| r.token.clone());
    if old_token != new_token {
        events.push(StorageEvent { key: SlotKey::Token, old_value: old_token, new_value: new_token, origin });
    }

    let old_user = old.and_then(|r| r.user.as_ref()).and_then(|u| serde_json::to_string(u).ok());
    let new_user = new.and_then(|r| r.user.as_ref()).and_then(|u| serde_json::to_string(u).ok());
    if old_user != new_user {
        events.push(StorageEvent { key: SlotKey::User, old_value: old_user, new_value: new_user, origin });
    }

    events
}
