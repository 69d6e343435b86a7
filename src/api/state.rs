//! Runtime configuration and the shared service objects handed to handlers.

use std::{sync::Arc, time::Duration};

use crate::{
    accounts::AccountDirectory,
    guard::AuthGuard,
    limiter::{BlockGuard, BlockPolicy, LimitConfig, RateLimiter, WindowRateLimiter},
    store::{CacheStore, SessionStore},
    tenants::{InvalidationBus, TenantAllowList},
    token::TokenCodec,
    two_factor::{TwoFactorFlow, DEFAULT_ISSUER},
};

pub const DEFAULT_ACCESS_TTL_SECONDS: u64 = 24 * 60 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_STORE_DEADLINE_MS: u64 = 3_000;
pub const DEFAULT_SESSION_DEADLINE_MS: u64 = 15_000;
pub const DEFAULT_CSRF_TTL_SECONDS: u64 = 60;
pub const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:5173";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store_deadline: Duration,
    session_deadline: Duration,
    csrf_ttl: Duration,
    strict_tenant_claims: bool,
    totp_issuer: String,
    block_policy: BlockPolicy,
    limits: LimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTEND_BASE_URL.to_string())
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECONDS),
            store_deadline: Duration::from_millis(DEFAULT_STORE_DEADLINE_MS),
            session_deadline: Duration::from_millis(DEFAULT_SESSION_DEADLINE_MS),
            csrf_ttl: Duration::from_secs(DEFAULT_CSRF_TTL_SECONDS),
            strict_tenant_claims: true,
            totp_issuer: DEFAULT_ISSUER.to_string(),
            block_policy: BlockPolicy::default(),
            limits: LimitConfig::default(),
        }
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_store_deadline(mut self, deadline: Duration) -> Self {
        self.store_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_session_deadline(mut self, deadline: Duration) -> Self {
        self.session_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_csrf_ttl(mut self, ttl: Duration) -> Self {
        self.csrf_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_strict_tenant_claims(mut self, strict: bool) -> Self {
        self.strict_tenant_claims = strict;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_block_policy(mut self, policy: BlockPolicy) -> Self {
        self.block_policy = policy;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: LimitConfig) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn store_deadline(&self) -> Duration {
        self.store_deadline
    }

    #[must_use]
    pub fn session_deadline(&self) -> Duration {
        self.session_deadline
    }

    #[must_use]
    pub fn csrf_ttl(&self) -> Duration {
        self.csrf_ttl
    }

    #[must_use]
    pub fn strict_tenant_claims(&self) -> bool {
        self.strict_tenant_claims
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub fn block_policy(&self) -> BlockPolicy {
        self.block_policy
    }

    #[must_use]
    pub fn limits(&self) -> LimitConfig {
        self.limits
    }
}

/// Service objects built once at startup and shared by every request.
pub struct AppState {
    config: AuthConfig,
    codec: TokenCodec,
    sessions: SessionStore,
    guard: AuthGuard,
    tenants: Arc<TenantAllowList>,
    bus: Arc<dyn InvalidationBus>,
    accounts: Arc<dyn AccountDirectory>,
    limiter: Arc<dyn RateLimiter>,
    blocks: BlockGuard,
    two_factor: TwoFactorFlow,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        codec: TokenCodec,
        cache: Arc<dyn CacheStore>,
        accounts: Arc<dyn AccountDirectory>,
        tenants: Arc<TenantAllowList>,
        bus: Arc<dyn InvalidationBus>,
    ) -> Self {
        let store = SessionStore::new(cache).with_deadline(config.store_deadline());
        let sessions = store.with_deadline(config.session_deadline());
        let guard = AuthGuard::new(codec.clone(), store.clone())
            .with_tenant_gate(Arc::clone(&tenants))
            .with_strict_tenant_claims(config.strict_tenant_claims());
        let limiter: Arc<dyn RateLimiter> =
            Arc::new(WindowRateLimiter::new(store.clone(), config.limits()));
        let blocks = BlockGuard::new(store.clone(), config.block_policy());
        let two_factor = TwoFactorFlow::new(store).with_issuer(config.totp_issuer());

        Self {
            config,
            codec,
            sessions,
            guard,
            tenants,
            bus,
            accounts,
            limiter,
            blocks,
            two_factor,
        }
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Store handle for login, refresh and logout, with the longer deadline.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn guard(&self) -> &AuthGuard {
        &self.guard
    }

    #[must_use]
    pub fn tenants(&self) -> &Arc<TenantAllowList> {
        &self.tenants
    }

    #[must_use]
    pub fn bus(&self) -> &dyn InvalidationBus {
        self.bus.as_ref()
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountDirectory {
        self.accounts.as_ref()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }

    #[must_use]
    pub fn blocks(&self) -> &BlockGuard {
        &self.blocks
    }

    #[must_use]
    pub fn two_factor(&self) -> &TwoFactorFlow {
        &self.two_factor
    }
}
