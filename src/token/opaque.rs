use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};

/// Random 256-bit value, base64url without padding. Used for CSRF tokens
/// and two-factor login challenges.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn opaque_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate opaque token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
