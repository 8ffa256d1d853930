#![forbid(unsafe_code)]

pub mod app_services;
pub mod auth;
pub mod error;
pub mod progress_service;
pub mod sync;

pub use practice_core::Clock;

pub use app_services::AppServices;
pub use auth::{Authenticator, StaticTokenAuth, UserIdentity};
pub use error::{AppServicesError, AuthError, ProgressServiceError, RemoteError, SyncError};
pub use progress_service::ProgressService;
pub use sync::{
    GuestProgressPolicy, HttpProgressClient, InProcessRemote, ProgressSync, RemoteProgress,
    SyncNotice, SyncView,
};
