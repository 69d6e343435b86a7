//! Shared key-value cache and the session operations built on it.
//!
//! [`CacheStore`] is the narrow seam to the backend (Redis in production, an
//! in-process map for `memory://` and tests). [`SessionStore`] adds typed
//! records, key namespaces and a deadline on every call.

pub mod keys;
pub mod memory;
pub mod redis;
mod session;

pub use session::{SessionMetadata, SessionStore, DEFAULT_STORE_DEADLINE};

use async_trait::async_trait;
use std::{future::Future, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("failed to encode or decode cached value: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("unexpected value stored at {key}")]
    Corrupt { key: String },
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Read and delete `key` in one step. Of several concurrent callers at
    /// most one sees the value.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Atomically increment the counter at `key`. The expiry is applied only
    /// when the counter is created, so the window is fixed, not sliding.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    /// Remaining lifetime, `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}

/// Run a cache call under `deadline`.
pub(crate) async fn bounded<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| StoreError::Timeout(deadline))?
}
