use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{bounded, keys, CacheStore, StoreError};

pub const DEFAULT_STORE_DEADLINE: Duration = Duration::from_secs(3);

/// Server-side record backing a session. Replaced wholesale on login and
/// refresh, never patched in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionMetadata {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub user_tenant_id: Uuid,
    pub role_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
    pub user_agent: String,
    pub role_names: Vec<String>,
    pub permission_names: Vec<String>,
    pub permission_resources: Vec<String>,
    pub permission_actions: Vec<String>,
    pub issued_at: i64,
}

impl SessionMetadata {
    /// All identity scalars are set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !(self.user_id.is_nil()
            || self.session_id.is_nil()
            || self.role_id.is_nil()
            || self.tenant_id.is_nil()
            || self.user_tenant_id.is_nil())
    }
}

/// Typed access to the shared cache. Every call is bounded by a deadline.
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn CacheStore>,
    deadline: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            cache,
            deadline: DEFAULT_STORE_DEADLINE,
        }
    }

    /// Same backend, different deadline.
    #[must_use]
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            deadline,
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    #[instrument(skip(self, metadata))]
    pub async fn put_session(
        &self,
        session_id: Uuid,
        metadata: &SessionMetadata,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.put_json(&keys::session(session_id), metadata, ttl).await
    }

    /// `Ok(None)` covers unknown, expired, evicted and unreadable records alike.
    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionMetadata>, StoreError> {
        let key = keys::session(session_id);
        match self.get_json::<SessionMetadata>(&key).await {
            Ok(found) => Ok(found),
            Err(StoreError::Codec(err)) => {
                warn!("Discarding unreadable session record: {err}");
                self.delete_keys(vec![key]).await?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.delete_keys(vec![keys::session(session_id)]).await
    }

    /// Mark `token` revoked for the rest of its lifetime. A token with no
    /// lifetime left needs no marker.
    #[instrument(skip(self, token))]
    pub async fn revoke(&self, token: &str, remaining: Duration) -> Result<(), StoreError> {
        if remaining.is_zero() {
            return Ok(());
        }
        self.set_raw(&keys::revoked(token), keys::REVOKED_SENTINEL, remaining)
            .await
    }

    #[instrument(skip(self, token))]
    pub async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        self.exists(&keys::revoked(token)).await
    }

    /// Point the user at `session_id` and return the session it replaced.
    #[instrument(skip(self))]
    pub async fn replace_user_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<Uuid>, StoreError> {
        let previous = self.current_user_session(user_id).await?;
        self.set_raw(
            &keys::user_session(user_id),
            session_id.to_string().as_bytes(),
            ttl,
        )
        .await?;
        Ok(previous.filter(|prev| *prev != session_id))
    }

    pub async fn current_user_session(&self, user_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let key = keys::user_session(user_id);
        let Some(raw) = self.get_raw(&key).await? else {
            return Ok(None);
        };
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Some)
            .ok_or(StoreError::Corrupt { key })
    }

    /// Drop the user's session pointer if it still names `session_id`.
    pub async fn release_user_session(&self, user_id: Uuid, session_id: Uuid) -> Result<(), StoreError> {
        if self.current_user_session(user_id).await? == Some(session_id) {
            self.delete_keys(vec![keys::user_session(user_id)]).await?;
        }
        Ok(())
    }

    pub async fn store_csrf(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        self.set_raw(&keys::csrf(token), token.as_bytes(), ttl).await
    }

    pub async fn csrf_exists(&self, token: &str) -> Result<bool, StoreError> {
        self.exists(&keys::csrf(token)).await
    }

    pub async fn delete_csrf(&self, token: &str) -> Result<(), StoreError> {
        self.delete_keys(vec![keys::csrf(token)]).await
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        bounded(self.deadline, self.cache.get(key)).await
    }

    pub async fn set_raw(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        bounded(self.deadline, self.cache.set(key, value, ttl)).await
    }

    /// Atomic read-and-delete; see [`CacheStore::take`].
    pub async fn take_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        bounded(self.deadline, self.cache.take(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_raw(key).await?.is_some())
    }

    pub async fn delete_keys(&self, keys: Vec<String>) -> Result<(), StoreError> {
        bounded(self.deadline, self.cache.delete(&keys)).await
    }

    pub async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        bounded(self.deadline, self.cache.incr_window(key, window)).await
    }

    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        bounded(self.deadline, self.cache.ttl(key)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(value)?;
        self.set_raw(key, &raw, ttl).await
    }
}
