use thiserror::Error;

use crate::error::AuthError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("token expired")]
    TokenExpired,
    #[error("malformed claims")]
    MalformedClaims,
    #[error("signing secret must be at least {0} bytes")]
    WeakSecret(usize),
    #[error("failed to encode token: {0}")]
    Encoding(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat => Self::SignatureInvalid,
            _ => Self::MalformedClaims,
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::TokenExpired => Self::ExpiredToken,
            TokenError::SignatureInvalid | TokenError::MalformedClaims => Self::InvalidTokenFormat,
            TokenError::WeakSecret(_) | TokenError::Encoding(_) => Self::Unavailable,
        }
    }
}
