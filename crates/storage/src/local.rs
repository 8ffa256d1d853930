//! Client-side progress cache.
//!
//! Guest sessions keep their only copy here; authenticated sessions keep a
//! last-known mirror of the server snapshot to fall back on when the server
//! cannot be reached.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use practice_core::model::{ProgressSnapshot, UserId};
use tokio::sync::broadcast;

use crate::repository::StorageError;

/// Key of the guest record.
pub const GUEST_PROGRESS_KEY: &str = "solvedProblems";

const EVENT_BUFFER: usize = 64;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static NEXT_WRITE: AtomicU64 = AtomicU64::new(1);

fn next_handle_id() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Key of the mirror kept for an authenticated user.
#[must_use]
pub fn user_progress_key(user: &UserId) -> String {
    format!("{GUEST_PROGRESS_KEY}:{user}")
}

/// A record changed through some cache handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: String,
    /// `handle_id` of the writer.
    pub source: u64,
}

#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Identifies this handle in emitted events.
    fn handle_id(&self) -> u64;

    /// Load the record under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be read or parsed.
    async fn load(&self, key: &str) -> Result<Option<ProgressSnapshot>, StorageError>;

    /// Replace the record under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be written.
    async fn store(&self, key: &str, snapshot: &ProgressSnapshot) -> Result<(), StorageError>;

    /// Delete the record under `key`. Missing records are not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record exists but cannot be removed.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Change notifications from every handle sharing this cache.
    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Process-local cache. Clones made through [`MemoryCache::handle`] share the
/// records and the event channel, like several tabs of one browser profile.
pub struct MemoryCache {
    id: u64,
    records: Arc<Mutex<HashMap<String, String>>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            id: next_handle_id(),
            records: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Another handle onto the same records.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            id: next_handle_id(),
            records: Arc::clone(&self.records),
            events: self.events.clone(),
        }
    }

    /// Writes a raw record, bypassing serialization. Useful to simulate
    /// corrupted or legacy data.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn put_raw(&self, key: &str, raw: impl Into<String>) -> Result<(), StorageError> {
        self.records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .insert(key.to_owned(), raw.into());
        self.notify(key);
        Ok(())
    }

    fn notify(&self, key: &str) {
        // No receivers is fine.
        let _ = self.events.send(CacheEvent {
            key: key.to_owned(),
            source: self.id,
        });
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    fn handle_id(&self) -> u64 {
        self.id
    }

    async fn load(&self, key: &str) -> Result<Option<ProgressSnapshot>, StorageError> {
        let raw = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .get(key)
            .cloned();
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn store(&self, key: &str, snapshot: &ProgressSnapshot) -> Result<(), StorageError> {
        let raw =
            serde_json::to_string(snapshot).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.put_raw(key, raw)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .remove(key);
        if removed.is_some() {
            self.notify(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}

//
// ─── FILE ──────────────────────────────────────────────────────────────────────
//

/// One JSON file per key inside a directory.
///
/// Each write goes to its own temporary file that is then renamed over the
/// record, so concurrent writers never share a temp path.
/// Notifications only reach handles in the same process.
pub struct FileCache {
    id: u64,
    dir: PathBuf,
    events: broadcast::Sender<CacheEvent>,
}

impl FileCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            id: next_handle_id(),
            dir: dir.into(),
            events,
        }
    }

    /// Bytes outside `[A-Za-z0-9-]` are written as `_xx`, so distinct keys
    /// never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut file = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                file.push(char::from(byte));
            } else {
                file.push_str(&format!("_{byte:02x}"));
            }
        }
        self.dir.join(format!("{file}.json"))
    }

    /// A temp path owned by this write alone.
    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let seq = NEXT_WRITE.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("json.{}.{seq}.tmp", self.id))
    }

    fn notify(&self, key: &str) {
        let _ = self.events.send(CacheEvent {
            key: key.to_owned(),
            source: self.id,
        });
    }
}

fn io<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Io(e.to_string())
}

#[async_trait]
impl LocalCache for FileCache {
    fn handle_id(&self) -> u64 {
        self.id
    }

    async fn load(&self, key: &str) -> Result<Option<ProgressSnapshot>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io(err)),
        }
    }

    async fn store(&self, key: &str, snapshot: &ProgressSnapshot) -> Result<(), StorageError> {
        let raw = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;

        let path = self.path_for(key);
        let tmp = self.temp_path_for(&path);
        tokio::fs::write(&tmp, raw).await.map_err(io)?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io(err));
        }
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => {
                self.notify(key);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io(err)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}
