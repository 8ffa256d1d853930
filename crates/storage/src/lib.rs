#![forbid(unsafe_code)]

pub mod local;
pub mod repository;
pub mod sqlite;

pub use local::{CacheEvent, FileCache, GUEST_PROGRESS_KEY, LocalCache, MemoryCache, user_progress_key};
pub use repository::{InMemoryRepository, ProgressRepository, Storage, StorageError};
