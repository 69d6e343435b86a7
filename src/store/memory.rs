//! In-process [`CacheStore`] for single-node development and tests.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use super::{CacheStore, StoreError};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("Poisoned lock".to_string()))
    }

    /// Store a value with no expiry. Used to seed fixtures.
    ///
    /// # Errors
    /// Returns an error if the map lock is poisoned.
    pub fn insert_raw(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.lock()?.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.lock()?.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .remove(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value))
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        let current = match entries.get(key) {
            Some(entry) if entry.live(now) => Some((
                std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| StoreError::Corrupt {
                        key: key.to_string(),
                    })?,
                entry.expires_at,
            )),
            _ => None,
        };

        let (count, expires_at) = match current {
            Some((count, expires_at)) => (count + 1, expires_at),
            None => (1, Some(now + window)),
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: count.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        let entries = self.lock()?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.live(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}
