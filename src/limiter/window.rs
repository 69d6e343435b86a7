//! Fixed-window request limiting.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::store::{keys, SessionStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Request,
    Login,
    VerifyTwoFactor,
}

impl RateLimitAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Login => "login",
            Self::VerifyTwoFactor => "verify2fa",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one hit for `client` and decide whether it may proceed.
    async fn check(
        &self,
        action: RateLimitAction,
        client: &str,
    ) -> Result<RateLimitDecision, StoreError>;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check(
        &self,
        _action: RateLimitAction,
        _client: &str,
    ) -> Result<RateLimitDecision, StoreError> {
        Ok(RateLimitDecision::Allowed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowPolicy {
    pub max: u64,
    pub window: Duration,
}

impl WindowPolicy {
    #[must_use]
    pub const fn new(max: u64, window: Duration) -> Self {
        Self { max, window }
    }
}

pub const DEFAULT_REQUEST_POLICY: WindowPolicy = WindowPolicy::new(100, Duration::from_secs(60));
pub const DEFAULT_LOGIN_POLICY: WindowPolicy = WindowPolicy::new(10, Duration::from_secs(60));
pub const DEFAULT_VERIFY_POLICY: WindowPolicy = WindowPolicy::new(10, Duration::from_secs(60));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitConfig {
    request: WindowPolicy,
    login: WindowPolicy,
    verify_two_factor: WindowPolicy,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            request: DEFAULT_REQUEST_POLICY,
            login: DEFAULT_LOGIN_POLICY,
            verify_two_factor: DEFAULT_VERIFY_POLICY,
        }
    }
}

impl LimitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request(mut self, policy: WindowPolicy) -> Self {
        self.request = policy;
        self
    }

    #[must_use]
    pub fn with_login(mut self, policy: WindowPolicy) -> Self {
        self.login = policy;
        self
    }

    #[must_use]
    pub fn with_verify_two_factor(mut self, policy: WindowPolicy) -> Self {
        self.verify_two_factor = policy;
        self
    }

    #[must_use]
    pub const fn policy(&self, action: RateLimitAction) -> WindowPolicy {
        match action {
            RateLimitAction::Request => self.request,
            RateLimitAction::Login => self.login,
            RateLimitAction::VerifyTwoFactor => self.verify_two_factor,
        }
    }
}

/// Counter per `{action, client}` that starts its expiry on the first hit.
#[derive(Clone, Debug)]
pub struct WindowRateLimiter {
    store: SessionStore,
    config: LimitConfig,
}

impl WindowRateLimiter {
    #[must_use]
    pub fn new(store: SessionStore, config: LimitConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl RateLimiter for WindowRateLimiter {
    async fn check(
        &self,
        action: RateLimitAction,
        client: &str,
    ) -> Result<RateLimitDecision, StoreError> {
        let policy = self.config.policy(action);
        let key = keys::rate(action.as_str(), client);
        let hits = self.store.incr_window(&key, policy.window).await?;
        if hits <= policy.max {
            return Ok(RateLimitDecision::Allowed);
        }

        let retry_after = self.store.ttl(&key).await?.unwrap_or(policy.window);
        debug!(
            action = action.as_str(),
            hits, "Rate limit exceeded, retry in {retry_after:?}"
        );
        Ok(RateLimitDecision::Limited { retry_after })
    }
}
