use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Distinguishes access tokens from refresh tokens so one can never stand in
/// for the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Identity carried by a token, before the codec stamps `iat`/`exp`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimSet {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub role_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub user_tenant_id: Option<Uuid>,
    pub email: Option<String>,
}

/// Wire claims: `{sub, sid, rid, tid?, utid?, em?, exp, iat, typ, jti}`.
///
/// `sub`, `sid` and `rid` are typed as UUIDs, so a token missing any of
/// them, or carrying a malformed one, fails to decode instead of producing a
/// partial identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub rid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub em: Option<String>,
    pub exp: i64,
    pub iat: i64,
    pub typ: TokenKind,
    /// Unique per issued token, so two tokens minted in the same second for
    /// the same session never collide.
    #[serde(default)]
    pub jti: Uuid,
}

impl Claims {
    pub(super) fn stamp(set: &ClaimSet, kind: TokenKind, iat: i64, exp: i64) -> Self {
        Self {
            sub: set.user_id,
            sid: set.session_id,
            rid: set.role_id,
            tid: set.tenant_id,
            utid: set.user_tenant_id,
            em: set.email.clone(),
            exp,
            iat,
            typ: kind,
            jti: Uuid::new_v4(),
        }
    }

    /// Lifetime left at `now` (epoch seconds); zero once expired.
    #[must_use]
    pub fn remaining(&self, now: i64) -> Duration {
        u64::try_from(self.exp.saturating_sub(now))
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO)
    }
}
