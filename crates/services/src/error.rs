//! Shared error types for the services crate.

use thiserror::Error;

use practice_core::ToggleError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error(transparent)]
    Toggle(#[from] ToggleError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `Authenticator` implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("credential login is handled by the identity provider")]
    Unsupported,
}

/// Failures talking to the authoritative progress store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("not signed in")]
    Unauthorized,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Service(#[from] ProgressServiceError),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

/// Errors surfaced by `ProgressSync` to the UI layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The intent was rejected before any state changed.
    #[error(transparent)]
    Validation(#[from] ToggleError),
    /// The write failed and the optimistic change was rolled back.
    #[error("progress not saved: {0}")]
    NotSaved(String),
    /// The remote store requires a signed-in user.
    #[error("not signed in")]
    Unauthorized,
    #[error(transparent)]
    Cache(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
