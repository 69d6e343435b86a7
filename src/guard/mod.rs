//! Bearer authentication against the shared session store.
//!
//! [`AuthGuard::authenticate`] runs the stages of [`Stage`] strictly in order
//! and stops at the first failure. Store errors while fetching the session
//! deny the request; the guard never retries.

mod header;
mod identity;

pub use header::extract_bearer;
pub use identity::Identity;

use axum::http::HeaderMap;
use std::{fmt, sync::Arc};
use tracing::{debug, error, instrument};

use crate::{
    error::AuthError,
    store::{SessionMetadata, SessionStore},
    tenants::TenantAllowList,
    token::{Claims, TokenCodec, TokenKind},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    ExtractToken,
    VerifyToken,
    FetchSession,
    CrossValidate,
    PopulateContext,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExtractToken => "extract_token",
            Self::VerifyToken => "verify_token",
            Self::FetchSession => "fetch_session",
            Self::CrossValidate => "cross_validate",
            Self::PopulateContext => "populate_context",
        };
        f.write_str(name)
    }
}

fn rejected(stage: Stage, err: AuthError) -> AuthError {
    debug!(%stage, reason = %err, "authentication rejected");
    err
}

#[derive(Clone)]
pub struct AuthGuard {
    codec: TokenCodec,
    sessions: SessionStore,
    tenants: Option<Arc<TenantAllowList>>,
    strict_tenant_claims: bool,
}

impl fmt::Debug for AuthGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGuard")
            .field("sessions", &self.sessions)
            .field("tenant_gate", &self.tenants.is_some())
            .field("strict_tenant_claims", &self.strict_tenant_claims)
            .finish_non_exhaustive()
    }
}

impl AuthGuard {
    #[must_use]
    pub fn new(codec: TokenCodec, sessions: SessionStore) -> Self {
        Self {
            codec,
            sessions,
            tenants: None,
            strict_tenant_claims: true,
        }
    }

    /// Also require the session's tenant to be on the allow-list.
    #[must_use]
    pub fn with_tenant_gate(mut self, tenants: Arc<TenantAllowList>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    /// When false, tokens without `tid`/`utid` are accepted and only
    /// mismatches fail.
    #[must_use]
    pub fn with_strict_tenant_claims(mut self, strict: bool) -> Self {
        self.strict_tenant_claims = strict;
        self
    }

    /// # Errors
    /// Returns the [`AuthError`] of the first failing stage.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = extract_bearer(headers).map_err(|e| rejected(Stage::ExtractToken, e))?;
        self.authenticate_token(token).await
    }

    /// Run every stage after token extraction.
    ///
    /// # Errors
    /// Returns the [`AuthError`] of the first failing stage.
    pub async fn authenticate_token(&self, token: &str) -> Result<Identity, AuthError> {
        let identity = self.authenticate_session(token).await?;

        if let Some(tenants) = &self.tenants {
            if !tenants.is_allowed(identity.tenant_id) {
                return Err(rejected(Stage::PopulateContext, AuthError::TenantNotAllowed));
            }
        }

        Ok(identity)
    }

    /// Every stage except the tenant gate. For callers that must work for
    /// a session whose tenant was withdrawn, such as logout.
    ///
    /// # Errors
    /// Returns the [`AuthError`] of the first failing stage.
    pub async fn authenticate_session(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self
            .codec
            .parse_kind(token, TokenKind::Access)
            .map_err(|e| rejected(Stage::VerifyToken, e.into()))?;

        let session = self
            .fetch_session(token, &claims)
            .await
            .map_err(|e| rejected(Stage::FetchSession, e))?;

        cross_validate(&claims, &session, self.strict_tenant_claims)
            .map_err(|e| rejected(Stage::CrossValidate, e))?;

        Ok(Identity::from_session(session, claims.exp))
    }

    async fn fetch_session(&self, token: &str, claims: &Claims) -> Result<SessionMetadata, AuthError> {
        match self.sessions.is_revoked(token).await {
            Ok(false) => {}
            Ok(true) => return Err(AuthError::SessionNotFound),
            Err(err) => {
                error!("Revocation lookup failed, denying request: {err}");
                return Err(AuthError::SessionNotFound);
            }
        }

        match self.sessions.get_session(claims.sid).await {
            Ok(Some(session)) if session.is_complete() => Ok(session),
            Ok(_) => Err(AuthError::SessionNotFound),
            Err(err) => {
                error!("Session lookup failed, denying request: {err}");
                Err(AuthError::SessionNotFound)
            }
        }
    }
}

/// Compare every claim the token and the session record have in common.
///
/// `sub`, `sid` and `rid` must match. `tid`, `utid` and `em` must match when
/// the token carries them; with `strict_tenant_claims` the tenant pair must
/// also be present.
///
/// # Errors
/// [`AuthError::ClaimMismatch`] on the first disagreement.
pub fn cross_validate(claims: &Claims, session: &SessionMetadata, strict_tenant_claims: bool) -> Result<(), AuthError> {
    if claims.sub != session.user_id || claims.sid != session.session_id || claims.rid != session.role_id {
        return Err(AuthError::ClaimMismatch);
    }

    let optional_matches = |claim: Option<uuid::Uuid>, expected: uuid::Uuid| match claim {
        Some(value) => value == expected,
        None => !strict_tenant_claims,
    };

    if !optional_matches(claims.tid, session.tenant_id)
        || !optional_matches(claims.utid, session.user_tenant_id)
    {
        return Err(AuthError::ClaimMismatch);
    }

    match &claims.em {
        Some(email) if *email != session.email => Err(AuthError::ClaimMismatch),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        store::{memory::MemoryCache, CacheStore, StoreError},
        tenants::TenantDirectory,
        token::ClaimSet,
    };
    use async_trait::async_trait;
    use axum::http::{header::AUTHORIZATION, HeaderValue};
    use secrecy::SecretString;
    use std::time::Duration;
    use uuid::Uuid;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn codec() -> TokenCodec {
        TokenCodec::new(&SecretString::from(SECRET.to_string())).unwrap()
    }

    fn session(session_id: Uuid) -> SessionMetadata {
        SessionMetadata {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            user_tenant_id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            session_id,
            user_agent: "test".to_string(),
            role_names: vec!["owner".to_string()],
            permission_names: vec!["manage tenants".to_string()],
            permission_resources: vec!["tenants".to_string()],
            permission_actions: vec!["manage".to_string()],
            issued_at: 0,
        }
    }

    fn claim_set(session: &SessionMetadata) -> ClaimSet {
        ClaimSet {
            user_id: session.user_id,
            session_id: session.session_id,
            role_id: session.role_id,
            tenant_id: Some(session.tenant_id),
            user_tenant_id: Some(session.user_tenant_id),
            email: Some(session.email.clone()),
        }
    }

    fn claims(session: &SessionMetadata) -> Claims {
        Claims {
            sub: session.user_id,
            sid: session.session_id,
            rid: session.role_id,
            tid: Some(session.tenant_id),
            utid: Some(session.user_tenant_id),
            em: Some(session.email.clone()),
            exp: i64::MAX,
            iat: 0,
            typ: TokenKind::Access,
            jti: Uuid::new_v4(),
        }
    }

    async fn fixture() -> (AuthGuard, SessionStore, SessionMetadata, String) {
        let store = SessionStore::new(Arc::new(MemoryCache::new()));
        let record = session(Uuid::new_v4());
        store
            .put_session(record.session_id, &record, Duration::from_secs(60))
            .await
            .unwrap();
        let token = codec()
            .issue(&claim_set(&record), TokenKind::Access, Duration::from_secs(60))
            .unwrap();
        (AuthGuard::new(codec(), store.clone()), store, record, token)
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn valid_token_populates_identity_from_session() {
        let (guard, _store, record, token) = fixture().await;

        let identity = guard.authenticate(&bearer(&token)).await.unwrap();

        assert_eq!(identity.user_id, record.user_id);
        assert_eq!(identity.tenant_id, record.tenant_id);
        assert_eq!(identity.user_tenant_id, record.user_tenant_id);
        assert_eq!(identity.role_id, record.role_id);
        assert_eq!(identity.session_id, record.session_id);
        assert_eq!(identity.email, record.email);
        assert_eq!(identity.permission_actions, record.permission_actions);
    }

    #[tokio::test]
    async fn revoked_token_is_indistinguishable_from_missing_session() {
        let (guard, store, _record, token) = fixture().await;
        store.revoke(&token, Duration::from_secs(60)).await.unwrap();

        assert_eq!(
            guard.authenticate(&bearer(&token)).await.unwrap_err(),
            AuthError::SessionNotFound
        );
    }

    #[tokio::test]
    async fn deleted_session_rejects_unexpired_token() {
        let (guard, store, record, token) = fixture().await;
        store.delete_session(record.session_id).await.unwrap();

        assert_eq!(
            guard.authenticate(&bearer(&token)).await.unwrap_err(),
            AuthError::SessionNotFound
        );
    }

    #[tokio::test]
    async fn refresh_token_cannot_authenticate() {
        let (guard, _store, record, _token) = fixture().await;
        let refresh = codec()
            .issue(&claim_set(&record), TokenKind::Refresh, Duration::from_secs(60))
            .unwrap();

        assert_eq!(
            guard.authenticate(&bearer(&refresh)).await.unwrap_err(),
            AuthError::InvalidTokenFormat
        );
    }

    #[tokio::test]
    async fn store_failure_denies() {
        struct BrokenCache;

        #[async_trait]
        impl CacheStore for BrokenCache {
            async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
                Err(StoreError::Backend("connection refused".to_string()))
            }
            async fn set(&self, _: &str, _: &[u8], _: Duration) -> Result<(), StoreError> {
                Err(StoreError::Backend("connection refused".to_string()))
            }
            async fn delete(&self, _: &[String]) -> Result<(), StoreError> {
                Err(StoreError::Backend("connection refused".to_string()))
            }
            async fn take(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
                Err(StoreError::Backend("connection refused".to_string()))
            }
            async fn incr_window(&self, _: &str, _: Duration) -> Result<u64, StoreError> {
                Err(StoreError::Backend("connection refused".to_string()))
            }
            async fn ttl(&self, _: &str) -> Result<Option<Duration>, StoreError> {
                Err(StoreError::Backend("connection refused".to_string()))
            }
        }

        let record = session(Uuid::new_v4());
        let token = codec()
            .issue(&claim_set(&record), TokenKind::Access, Duration::from_secs(60))
            .unwrap();
        let guard = AuthGuard::new(codec(), SessionStore::new(Arc::new(BrokenCache)));

        assert_eq!(
            guard.authenticate(&bearer(&token)).await.unwrap_err(),
            AuthError::SessionNotFound
        );
    }

    #[test]
    fn session_id_mismatch_always_fails() {
        let record = session(Uuid::new_v4());
        let mut claims = claims(&record);
        claims.sid = Uuid::new_v4();

        assert_eq!(
            cross_validate(&claims, &record, false),
            Err(AuthError::ClaimMismatch)
        );
        assert_eq!(
            cross_validate(&claims, &record, true),
            Err(AuthError::ClaimMismatch)
        );
    }

    #[test]
    fn tenant_mismatch_fails_even_when_identity_matches() {
        let record = session(Uuid::new_v4());
        let mut claims = claims(&record);
        claims.tid = Some(Uuid::new_v4());

        assert_eq!(
            cross_validate(&claims, &record, false),
            Err(AuthError::ClaimMismatch)
        );
    }

    #[test]
    fn role_and_email_mismatch_fail() {
        let record = session(Uuid::new_v4());

        let mut stale_role = claims(&record);
        stale_role.rid = Uuid::new_v4();
        assert_eq!(
            cross_validate(&stale_role, &record, true),
            Err(AuthError::ClaimMismatch)
        );

        let mut other_email = claims(&record);
        other_email.em = Some("eve@example.com".to_string());
        assert_eq!(
            cross_validate(&other_email, &record, true),
            Err(AuthError::ClaimMismatch)
        );
    }

    #[test]
    fn absent_tenant_claims_depend_on_strictness() {
        let record = session(Uuid::new_v4());
        let mut claims = claims(&record);
        claims.tid = None;
        claims.utid = None;
        claims.em = None;

        assert_eq!(cross_validate(&claims, &record, false), Ok(()));
        assert_eq!(
            cross_validate(&claims, &record, true),
            Err(AuthError::ClaimMismatch)
        );
    }

    struct FixedDirectory(Vec<Uuid>);

    #[async_trait]
    impl TenantDirectory for FixedDirectory {
        async fn allowed_tenant_ids(&self) -> anyhow::Result<Vec<Uuid>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn tenant_gate_rejects_unlisted_tenant() {
        let (guard, _store, record, token) = fixture().await;

        let denied = Arc::new(TenantAllowList::new(Arc::new(FixedDirectory(vec![]))));
        denied.init().await.unwrap();
        assert_eq!(
            guard
                .clone()
                .with_tenant_gate(denied)
                .authenticate(&bearer(&token))
                .await
                .unwrap_err(),
            AuthError::TenantNotAllowed
        );

        let allowed = Arc::new(TenantAllowList::new(Arc::new(FixedDirectory(vec![
            record.tenant_id,
        ]))));
        allowed.init().await.unwrap();
        assert!(guard
            .with_tenant_gate(allowed)
            .authenticate(&bearer(&token))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn session_check_ignores_tenant_gate() {
        let (guard, store, record, token) = fixture().await;

        let denied = Arc::new(TenantAllowList::new(Arc::new(FixedDirectory(vec![]))));
        denied.init().await.unwrap();
        let guard = guard.with_tenant_gate(denied);

        let identity = guard.authenticate_session(&token).await.unwrap();
        assert_eq!(identity.session_id, record.session_id);
        assert_eq!(identity.tenant_id, record.tenant_id);

        store.delete_session(record.session_id).await.unwrap();
        assert_eq!(
            guard.authenticate_session(&token).await.unwrap_err(),
            AuthError::SessionNotFound
        );
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::FetchSession.to_string(), "fetch_session");
        assert_eq!(Stage::CrossValidate.to_string(), "cross_validate");
    }
}
