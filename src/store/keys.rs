//! Key namespaces shared by every process talking to the cache.

use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const REVOKED_SENTINEL: &[u8] = b"revoked";

#[must_use]
pub fn session(session_id: Uuid) -> String {
    format!("session:{session_id}")
}

/// Revocation marker for a token. Keyed by a digest so raw bearer tokens
/// never become cache keys.
#[must_use]
pub fn revoked(token: &str) -> String {
    format!("revoked_token:{}", fingerprint(token))
}

#[must_use]
pub fn user_session(user_id: Uuid) -> String {
    format!("user_session:{user_id}")
}

#[must_use]
pub fn csrf(token: &str) -> String {
    format!("csrf:{token}")
}

#[must_use]
pub fn two_factor_secret(user_id: Uuid) -> String {
    format!("2fa:{user_id}")
}

#[must_use]
pub fn two_factor_challenge(challenge: &str) -> String {
    format!("status_2fa_user:{challenge}:pending_2fa")
}

#[must_use]
pub fn two_factor_verified(session_id: Uuid) -> String {
    format!("status_2fa_user:{session_id}:verified")
}

#[must_use]
pub fn rate(action: &str, client: &str) -> String {
    format!("rate:{action}:{client}")
}

#[must_use]
pub fn attempts(scope: &str, client: &str) -> String {
    format!("attempts:{scope}:{client}")
}

#[must_use]
pub fn block(scope: &str, client: &str) -> String {
    format!("block:{scope}:{client}")
}

/// SHA-256 of `value`, base64url without padding.
#[must_use]
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}
