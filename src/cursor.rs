//! Durable scan cursor
//!
//! The cursor records the last source block whose events have been fully
//! enqueued. It only ever moves forward: a lower value offered to
//! [`ScanCursor::advance`] is ignored, and a loaded value is never rewound.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::ScanState;

/// Errors surfaced by a [`StateStore`]
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The record exists but cannot be parsed; callers fall back to the start block
    #[error("scan state is corrupt: {0}")]
    Corrupt(String),

    /// The store cannot be reached
    #[error("scan state I/O failure: {0}")]
    Io(#[from] io::Error),
}

/// Persistence collaborator for [`ScanState`]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the stored state; `Ok(None)` when nothing has been saved yet
    async fn load(&self) -> Result<Option<ScanState>, StateStoreError>;

    /// Persist the state, replacing any previous record
    async fn save(&self, state: &ScanState) -> Result<(), StateStoreError>;
}

// ============================================================================
// JSON file store
// ============================================================================

/// Stores the scan state as a small pretty-printed JSON document.
///
/// Writes go to a sibling temp file first and are renamed into place so a
/// crash mid-write never leaves a truncated record behind.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self) -> Result<Option<ScanState>, StateStoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateStoreError::Io(e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StateStoreError::Corrupt(format!("{}: {}", self.path.display(), e)))
    }

    async fn save(&self, state: &ScanState) -> Result<(), StateStoreError> {
        let body = serde_json::to_string_pretty(state)
            .map_err(|e| StateStoreError::Corrupt(e.to_string()))?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store, useful for tests and dry runs. Counts successful saves.
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    state: Arc<Mutex<Option<ScanState>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: ScanState) -> Self {
        let store = Self::new();
        *store.lock() = Some(state);
        store
    }

    /// The most recently saved state
    pub fn current(&self) -> Option<ScanState> {
        *self.lock()
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ScanState>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<ScanState>, StateStoreError> {
        Ok(*self.lock())
    }

    async fn save(&self, state: &ScanState) -> Result<(), StateStoreError> {
        *self.lock() = Some(*state);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Monotonic watermark over the source chain, backed by a [`StateStore`]
pub struct ScanCursor {
    state: ScanState,
    store: Arc<dyn StateStore>,
}

impl ScanCursor {
    /// Load the cursor from the store.
    ///
    /// Missing or corrupt records fall back to `start_block`; an unreachable
    /// store is a startup failure.
    pub async fn load(store: Arc<dyn StateStore>, start_block: u64) -> eyre::Result<Self> {
        let state = match store.load().await {
            Ok(Some(state)) => {
                info!(
                    last_processed_block = state.last_processed_block,
                    "Loaded scan state"
                );
                state
            }
            Ok(None) => {
                warn!(start_block, "No scan state found, starting from configured start block");
                ScanState::new(start_block)
            }
            Err(StateStoreError::Corrupt(reason)) => {
                warn!(
                    start_block,
                    %reason,
                    "Scan state unreadable, starting from configured start block"
                );
                ScanState::new(start_block)
            }
            Err(e @ StateStoreError::Io(_)) => {
                return Err(eyre::Report::new(e).wrap_err("Failed to load scan state"));
            }
        };

        Ok(Self { state, store })
    }

    /// Last fully processed block
    pub fn position(&self) -> u64 {
        self.state.last_processed_block
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Move the watermark forward to `block`. Returns `false` (and leaves the
    /// cursor untouched) if that would move it backwards.
    pub fn advance(&mut self, block: u64) -> bool {
        if block < self.state.last_processed_block {
            warn!(
                current = self.state.last_processed_block,
                requested = block,
                "Refusing to rewind scan cursor"
            );
            return false;
        }
        self.state.last_processed_block = block;
        true
    }

    /// Write the current watermark to the store
    pub async fn persist(&self) -> Result<(), StateStoreError> {
        self.store.save(&self.state).await?;
        debug!(
            last_processed_block = self.state.last_processed_block,
            "Scan state saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("state.json"));

        assert!(store.load().await.unwrap().is_none());

        assert_ok!(store.save(&ScanState::new(1234)).await);
        assert_eq!(store.load().await.unwrap(), Some(ScanState::new(1234)));

        assert_ok!(store.save(&ScanState::new(1300)).await);
        assert_eq!(store.load().await.unwrap(), Some(ScanState::new(1300)));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_json_store_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStateStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(StateStoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_cursor_falls_back_to_start_block() {
        let store = Arc::new(MemoryStateStore::new());
        let cursor = ScanCursor::load(store, 1000).await.unwrap();
        assert_eq!(cursor.position(), 1000);
    }

    #[tokio::test]
    async fn test_cursor_falls_back_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"last_processed_block": "abc"}"#).unwrap();

        let cursor = ScanCursor::load(Arc::new(JsonFileStateStore::new(&path)), 77)
            .await
            .unwrap();
        assert_eq!(cursor.position(), 77);
    }

    #[tokio::test]
    async fn test_cursor_fails_when_store_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file
        let store = Arc::new(JsonFileStateStore::new(dir.path()));
        assert!(ScanCursor::load(store, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_cursor_prefers_stored_state() {
        let store = Arc::new(MemoryStateStore::with_state(ScanState::new(5000)));
        let cursor = ScanCursor::load(store, 1000).await.unwrap();
        assert_eq!(cursor.position(), 5000);
    }

    #[tokio::test]
    async fn test_cursor_never_rewinds() {
        let store = Arc::new(MemoryStateStore::new());
        let mut cursor = ScanCursor::load(store.clone(), 10).await.unwrap();

        assert!(cursor.advance(20));
        assert!(!cursor.advance(15));
        assert_eq!(cursor.position(), 20);

        cursor.persist().await.unwrap();
        assert_eq!(store.current(), Some(ScanState::new(20)));
        assert_eq!(store.save_count(), 1);
    }
}
