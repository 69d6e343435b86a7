//! Bearer token issuance and parsing.
//!
//! Tokens are HS256 JWTs signed with one shared secret. Parsing enforces the
//! signature, a present and unexpired `exp`, and well-formed `sub`/`sid`
//! claims; nothing falls back to defaults.

mod claims;
mod error;
mod opaque;

pub use claims::{ClaimSet, Claims, TokenKind};
pub use error::TokenError;
pub use opaque::opaque_token;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, time::Duration};

/// Shortest accepted HMAC secret.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// # Errors
    /// Returns [`TokenError::WeakSecret`] if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn new(secret: &SecretString) -> Result<Self, TokenError> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret(MIN_SECRET_LEN));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        })
    }

    /// Sign `claims` valid for `ttl` from now.
    ///
    /// # Errors
    /// Returns [`TokenError::Encoding`] if serialization or signing fails.
    pub fn issue(&self, claims: &ClaimSet, kind: TokenKind, ttl: Duration) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.issue_at(claims, kind, iat, iat.saturating_add(ttl))
    }

    fn issue_at(&self, claims: &ClaimSet, kind: TokenKind, iat: i64, exp: i64) -> Result<String, TokenError> {
        let claims = Claims::stamp(claims, kind, iat, exp);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify and decode any token issued by this codec.
    ///
    /// # Errors
    /// `SignatureInvalid`, `TokenExpired` or `MalformedClaims`.
    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }

    /// Like [`parse`](Self::parse), but a token of the other kind is malformed.
    ///
    /// # Errors
    /// Same as [`parse`](Self::parse).
    pub fn parse_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.parse(token)?;
        if claims.typ != kind {
            return Err(TokenError::MalformedClaims);
        }
        Ok(claims)
    }
}
