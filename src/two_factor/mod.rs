//! TOTP enrollment and login challenges.
//!
//! Enrollment: `NotStarted → SecretIssued`, with the pending secret cached
//! per user so repeated setup calls hand back the same secret until it is
//! confirmed or expires. Login: a password-verified user without a
//! confirmed code sits in `PendingVerification` under an opaque challenge
//! token; a valid code makes the session `Verified`, and an abandoned
//! challenge reads as `Expired`.

mod totp;

pub use totp::{DIGITS, SKEW, STEP_SECONDS};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::AuthError,
    store::{keys, SessionStore, StoreError},
    token::opaque_token,
};

pub const DEFAULT_SECRET_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_ISSUER: &str = "Gatehouse";

const VERIFIED: &[u8] = b"1";

#[derive(Debug, Error)]
pub enum TwoFactorError {
    #[error("no pending two-factor state")]
    Expired,
    #[error("two-factor code rejected")]
    InvalidCode,
    #[error("totp failure: {0}")]
    Totp(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TwoFactorError> for AuthError {
    fn from(err: TwoFactorError) -> Self {
        match err {
            TwoFactorError::Expired | TwoFactorError::InvalidCode => Self::TwoFactorInvalid,
            TwoFactorError::Totp(_) | TwoFactorError::Store(_) => {
                error!("Two-factor flow failed: {err}");
                Self::Unavailable
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorState {
    NotStarted,
    SecretIssued,
    PendingVerification,
    Verified,
    Expired,
}

/// Secret handed to the user during enrollment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PendingSecret {
    pub user_id: Uuid,
    /// Base32 secret for manual entry.
    pub secret: String,
    pub otpauth_url: String,
    /// PNG data URL.
    pub qr_code: String,
}

#[derive(Clone, Debug)]
pub struct TwoFactorFlow {
    store: SessionStore,
    issuer: String,
    secret_ttl: Duration,
    challenge_ttl: Duration,
}

impl TwoFactorFlow {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            issuer: DEFAULT_ISSUER.to_string(),
            secret_ttl: DEFAULT_SECRET_TTL,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_secret_ttl(mut self, ttl: Duration) -> Self {
        self.secret_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Return the cached pending secret for `user_id`, or generate and
    /// cache a new one.
    ///
    /// # Errors
    /// Returns an error if the store fails or the secret cannot be built.
    #[instrument(skip(self, account))]
    pub async fn issue_secret(
        &self,
        user_id: Uuid,
        account: &str,
    ) -> Result<PendingSecret, TwoFactorError> {
        if let Some(pending) = self.pending_secret(user_id).await? {
            debug!("Reusing pending two-factor secret");
            return Ok(pending);
        }

        let enrollment =
            totp::enroll(&self.issuer, account).map_err(|e| TwoFactorError::Totp(e.to_string()))?;
        let pending = PendingSecret {
            user_id,
            secret: enrollment.secret,
            otpauth_url: enrollment.otpauth_url,
            qr_code: enrollment.qr_code,
        };
        self.store
            .put_json(&keys::two_factor_secret(user_id), &pending, self.secret_ttl)
            .await?;
        Ok(pending)
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn pending_secret(&self, user_id: Uuid) -> Result<Option<PendingSecret>, TwoFactorError> {
        let key = keys::two_factor_secret(user_id);
        match self.store.get_json::<PendingSecret>(&key).await {
            Ok(pending) => Ok(pending),
            Err(StoreError::Codec(err)) => {
                debug!("Discarding unreadable pending secret: {err}");
                self.store.delete_keys(vec![key]).await?;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Check `code` against the pending secret. On success the pending
    /// entry is consumed and the base32 secret returned for permanent
    /// storage; on failure it is left in place for another try.
    ///
    /// # Errors
    /// `Expired` without a pending secret, `InvalidCode` for a wrong code.
    #[instrument(skip(self, code))]
    pub async fn confirm_secret(&self, user_id: Uuid, code: &str) -> Result<String, TwoFactorError> {
        let pending = self
            .pending_secret(user_id)
            .await?
            .ok_or(TwoFactorError::Expired)?;
        if !self.check_code(&pending.secret, code)? {
            return Err(TwoFactorError::InvalidCode);
        }
        self.store
            .delete_keys(vec![keys::two_factor_secret(user_id)])
            .await?;
        Ok(pending.secret)
    }

    /// # Errors
    /// Returns an error if `secret` is not valid base32.
    pub fn check_code(&self, secret: &str, code: &str) -> Result<bool, TwoFactorError> {
        totp::check(secret, &self.issuer, code).map_err(|e| TwoFactorError::Totp(e.to_string()))
    }

    /// Park a password-verified login until a code is supplied.
    ///
    /// # Errors
    /// Returns an error if the token cannot be generated or stored.
    #[instrument(skip(self))]
    pub async fn begin_challenge(&self, user_id: Uuid) -> Result<String, TwoFactorError> {
        let challenge = opaque_token().map_err(|e| TwoFactorError::Totp(e.to_string()))?;
        self.store
            .set_raw(
                &keys::two_factor_challenge(&challenge),
                user_id.to_string().as_bytes(),
                self.challenge_ttl,
            )
            .await?;
        Ok(challenge)
    }

    /// User waiting on `challenge`, if it has not expired.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn challenge_user(&self, challenge: &str) -> Result<Option<Uuid>, TwoFactorError> {
        let raw = self
            .store
            .get_raw(&keys::two_factor_challenge(challenge))
            .await?;
        Ok(raw
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|text| Uuid::parse_str(&text).ok()))
    }

    /// Consume `challenge` for `user_id`. Only one caller can ever get
    /// `true` for a given challenge, however many race on it.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    #[instrument(skip(self, challenge))]
    pub async fn consume_challenge(&self, challenge: &str, user_id: Uuid) -> Result<bool, TwoFactorError> {
        let raw = self
            .store
            .take_raw(&keys::two_factor_challenge(challenge))
            .await?;
        Ok(raw
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|text| Uuid::parse_str(&text).ok())
            == Some(user_id))
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn mark_verified(&self, session_id: Uuid, ttl: Duration) -> Result<(), TwoFactorError> {
        self.store
            .set_raw(&keys::two_factor_verified(session_id), VERIFIED, ttl)
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn is_verified(&self, session_id: Uuid) -> Result<bool, TwoFactorError> {
        Ok(self
            .store
            .exists(&keys::two_factor_verified(session_id))
            .await?)
    }

    /// Renew the verified flag for `ttl` if the session has one. Returns
    /// whether it was present.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn extend_verified(&self, session_id: Uuid, ttl: Duration) -> Result<bool, TwoFactorError> {
        if !self.is_verified(session_id).await? {
            return Ok(false);
        }
        self.mark_verified(session_id, ttl).await?;
        Ok(true)
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn clear_verified(&self, session_id: Uuid) -> Result<(), TwoFactorError> {
        self.store
            .delete_keys(vec![keys::two_factor_verified(session_id)])
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn enrollment_state(&self, user_id: Uuid) -> Result<TwoFactorState, TwoFactorError> {
        Ok(if self.pending_secret(user_id).await?.is_some() {
            TwoFactorState::SecretIssued
        } else {
            TwoFactorState::NotStarted
        })
    }

    /// State of a login that was handed `challenge` for `session_id`.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn challenge_state(
        &self,
        challenge: &str,
        session_id: Option<Uuid>,
    ) -> Result<TwoFactorState, TwoFactorError> {
        if let Some(session_id) = session_id {
            if self.is_verified(session_id).await? {
                return Ok(TwoFactorState::Verified);
            }
        }
        Ok(if self.challenge_user(challenge).await?.is_some() {
            TwoFactorState::PendingVerification
        } else {
            TwoFactorState::Expired
        })
    }
}
