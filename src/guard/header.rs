use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::error::AuthError;

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// # Errors
/// `MissingToken` when the header is absent or blank, `InvalidAuthHeader`
/// for any other scheme or shape.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(AuthError::MissingToken);
    };
    let value = value
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?
        .trim();
    if value.is_empty() {
        return Err(AuthError::MissingToken);
    }

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthError::InvalidAuthHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn missing_header() {
        assert_eq!(
            extract_bearer(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        );
        assert_eq!(extract_bearer(&headers("   ")), Err(AuthError::MissingToken));
    }

    #[test]
    fn bearer_token() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(extract_bearer(&headers("bearer abc")), Ok("abc"));
    }

    #[test]
    fn wrong_scheme_or_shape() {
        assert_eq!(
            extract_bearer(&headers("Basic dXNlcjpwYXNz")),
            Err(AuthError::InvalidAuthHeader)
        );
        assert_eq!(
            extract_bearer(&headers("Bearer")),
            Err(AuthError::InvalidAuthHeader)
        );
        assert_eq!(
            extract_bearer(&headers("Bearer a b")),
            Err(AuthError::InvalidAuthHeader)
        );
    }
}
