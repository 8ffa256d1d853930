use std::sync::Arc;

use async_trait::async_trait;
use practice_core::ToggleIntent;
use practice_core::model::{ProgressSnapshot, UserId};

use crate::error::RemoteError;
use crate::progress_service::ProgressService;

/// The authoritative copy of one user's progress.
#[async_trait]
pub trait RemoteProgress: Send + Sync {
    /// Whose progress this handle reads and writes.
    fn user(&self) -> &UserId;

    /// # Errors
    ///
    /// Returns `RemoteError` if the store cannot be reached or refuses access.
    async fn fetch(&self) -> Result<ProgressSnapshot, RemoteError>;

    /// Apply one toggle remotely and return the stored result.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the write is rejected or fails.
    async fn update(&self, intent: &ToggleIntent) -> Result<ProgressSnapshot, RemoteError>;

    /// # Errors
    ///
    /// Returns `RemoteError` if the write fails.
    async fn reset(&self) -> Result<ProgressSnapshot, RemoteError>;
}

/// Talks to a `ProgressService` in the same process.
#[derive(Clone)]
pub struct InProcessRemote {
    service: Arc<ProgressService>,
    user: UserId,
}

impl InProcessRemote {
    #[must_use]
    pub fn new(service: Arc<ProgressService>, user: UserId) -> Self {
        Self { service, user }
    }
}

#[async_trait]
impl RemoteProgress for InProcessRemote {
    fn user(&self) -> &UserId {
        &self.user
    }

    async fn fetch(&self) -> Result<ProgressSnapshot, RemoteError> {
        Ok(self.service.get(&self.user).await?)
    }

    async fn update(&self, intent: &ToggleIntent) -> Result<ProgressSnapshot, RemoteError> {
        Ok(self.service.update(&self.user, intent).await?)
    }

    async fn reset(&self) -> Result<ProgressSnapshot, RemoteError> {
        Ok(self.service.reset(&self.user).await?)
    }
}
