use async_trait::async_trait;
use practice_core::model::{ProgressSnapshot, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

/// Durable mapping from user identity to their progress snapshot.
///
/// Writes replace the whole snapshot; callers hand in an already-reconciled
/// value.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the snapshot for `user`.
    ///
    /// Absence is not an error: a user with no record gets the empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read or the stored
    /// record is malformed.
    async fn get_progress(&self, user: &UserId) -> Result<ProgressSnapshot, StorageError>;

    /// Replace the snapshot for `user`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn upsert_progress(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StorageError>;

    /// Store the empty snapshot for `user`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn reset_progress(&self, user: &UserId) -> Result<(), StorageError> {
        self.upsert_progress(user, &ProgressSnapshot::empty()).await
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<UserId, ProgressSnapshot>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(&self, user: &UserId) -> Result<ProgressSnapshot, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user).cloned().unwrap_or_default())
    }

    async fn upsert_progress(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(user.clone(), snapshot.clone());
        Ok(())
    }

    async fn reset_progress(&self, user: &UserId) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(user);
        Ok(())
    }
}

/// Repository handle behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let progress: Arc<dyn ProgressRepository> = Arc::new(InMemoryRepository::new());
        Self { progress }
    }
}
