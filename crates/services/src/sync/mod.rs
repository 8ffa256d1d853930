//! Client-side progress synchronization.

pub mod http;
pub mod remote;
mod service;

pub use http::HttpProgressClient;
pub use remote::{InProcessRemote, RemoteProgress};
pub use service::{GuestProgressPolicy, ProgressSync, SyncNotice, SyncView};
