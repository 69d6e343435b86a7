//! Escalating block after repeated failures.
//!
//! Failed attempts are counted per `{scope, client}` in a fixed window.
//! When the count reaches the threshold a block entry is written with its
//! own expiry, so the client stays blocked for the full duration even if
//! the attempt window rolls over first.

use std::time::Duration;
use tracing::{error, info, warn};

use super::AttemptCount;
use crate::{
    error::AuthError,
    store::{keys, SessionStore, StoreError},
};

pub const DEFAULT_BLOCK_THRESHOLD: u64 = 3;
pub const DEFAULT_BLOCK_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(30 * 60);

const BLOCK_MARKER: &[u8] = b"1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockScope {
    Login,
    VerifyTwoFactor,
}

impl BlockScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::VerifyTwoFactor => "verify2fa",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPolicy {
    threshold: u64,
    window: Duration,
    duration: Duration,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BLOCK_THRESHOLD,
            window: DEFAULT_BLOCK_WINDOW,
            duration: DEFAULT_BLOCK_DURATION,
        }
    }
}

impl BlockPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub const fn threshold(&self) -> u64 {
        self.threshold
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureOutcome {
    pub attempts: u64,
    pub remaining: u64,
    /// Set when this failure tipped the client into a block.
    pub blocked_for: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct BlockGuard {
    store: SessionStore,
    policy: BlockPolicy,
}

fn unavailable(err: &StoreError) -> AuthError {
    error!("Block guard store failure: {err}");
    AuthError::Unavailable
}

impl BlockGuard {
    #[must_use]
    pub fn new(store: SessionStore, policy: BlockPolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &BlockPolicy {
        &self.policy
    }

    /// Reject a blocked client before any credential is looked at. Only the
    /// block entry counts; the attempt counter never blocks on its own.
    ///
    /// # Errors
    /// `Blocked` with the remaining block time, or `Unavailable` if the
    /// store cannot answer.
    pub async fn ensure_not_blocked(&self, scope: BlockScope, client: &str) -> Result<(), AuthError> {
        let block_key = keys::block(scope.as_str(), client);
        if !self.store.exists(&block_key).await.map_err(|e| unavailable(&e))? {
            return Ok(());
        }
        let retry_after = self
            .store
            .ttl(&block_key)
            .await
            .map_err(|e| unavailable(&e))?
            .unwrap_or(self.policy.duration);
        Err(AuthError::Blocked { retry_after })
    }

    /// Count one failure and block the client once it reaches the threshold.
    ///
    /// # Errors
    /// `Unavailable` if the store cannot be updated.
    pub async fn record_failure(
        &self,
        scope: BlockScope,
        client: &str,
    ) -> Result<FailureOutcome, AuthError> {
        let key = keys::attempts(scope.as_str(), client);
        let attempts = match self.store.incr_window(&key, self.policy.window).await {
            Ok(attempts) => attempts,
            Err(StoreError::Corrupt { .. }) => {
                warn!(scope = scope.as_str(), "Replacing attempt counter stored in an unsupported encoding");
                self.store
                    .delete_keys(vec![key.clone()])
                    .await
                    .map_err(|e| unavailable(&e))?;
                self.store
                    .incr_window(&key, self.policy.window)
                    .await
                    .map_err(|e| unavailable(&e))?
            }
            Err(err) => return Err(unavailable(&err)),
        };

        let remaining = self.policy.threshold.saturating_sub(attempts);
        let blocked_for = if remaining == 0 {
            self.store
                .set_raw(
                    &keys::block(scope.as_str(), client),
                    BLOCK_MARKER,
                    self.policy.duration,
                )
                .await
                .map_err(|e| unavailable(&e))?;
            warn!(
                scope = scope.as_str(),
                client, attempts, "Client blocked for {:?}", self.policy.duration
            );
            Some(self.policy.duration)
        } else {
            info!(
                scope = scope.as_str(),
                client, attempts, "Failed attempt, {remaining} attempts remaining"
            );
            None
        };

        Ok(FailureOutcome {
            attempts,
            remaining,
            blocked_for,
        })
    }

    /// Forget earlier failures after a success.
    ///
    /// # Errors
    /// `Unavailable` if the store cannot be updated.
    pub async fn reset(&self, scope: BlockScope, client: &str) -> Result<(), AuthError> {
        self.store
            .delete_keys(vec![keys::attempts(scope.as_str(), client)])
            .await
            .map_err(|e| unavailable(&e))
    }

    /// Failures counted in the current window. A counter in an unsupported
    /// encoding reads as zero until the next failure replaces it.
    ///
    /// # Errors
    /// `Unavailable` if the store cannot answer.
    pub async fn attempts(&self, scope: BlockScope, client: &str) -> Result<u64, AuthError> {
        let key = keys::attempts(scope.as_str(), client);
        let Some(raw) = self.store.get_raw(&key).await.map_err(|e| unavailable(&e))? else {
            return Ok(0);
        };
        match AttemptCount::decode(&key, &raw) {
            Ok(AttemptCount(count)) => Ok(count),
            Err(err) => {
                warn!("Ignoring attempt counter: {err}");
                Ok(0)
            }
        }
    }
}
