use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

pub const DIGITS: usize = 6;
/// Steps accepted either side of the current one.
pub const SKEW: u8 = 1;
pub const STEP_SECONDS: u64 = 30;

pub(super) struct Enrollment {
    pub secret: String,
    pub otpauth_url: String,
    pub qr_code: String,
}

fn build(secret: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP> {
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECONDS,
        secret,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))
}

fn decode(secret_base32: &str) -> Result<Vec<u8>> {
    Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("Invalid TOTP secret: {e:?}"))
}

/// Fresh secret with its otpauth URL and a PNG QR code as a data URL.
pub(super) fn enroll(issuer: &str, account: &str) -> Result<Enrollment> {
    let secret = Secret::generate_secret()
        .to_bytes()
        .map_err(|e| anyhow!("Secret gen error: {e:?}"))?;
    let totp = build(secret, issuer, account)?;
    let qr = totp
        .get_qr_base64()
        .map_err(|e| anyhow!("QR gen error: {e}"))?;

    Ok(Enrollment {
        secret: totp.get_secret_base32(),
        otpauth_url: totp.get_url(),
        qr_code: format!("data:image/png;base64,{qr}"),
    })
}

pub(super) fn check(secret_base32: &str, issuer: &str, code: &str) -> Result<bool> {
    // The account label plays no part in the code itself.
    let totp = build(decode(secret_base32)?, issuer, "user")?;
    Ok(totp.check_current(code.trim()).unwrap_or(false))
}

#[cfg(test)]
pub(crate) fn current_code(secret_base32: &str) -> Result<String> {
    let totp = build(decode(secret_base32)?, "test", "user")?;
    totp.generate_current()
        .map_err(|e| anyhow!("clock error: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_round_trips_through_check() {
        let enrollment = enroll("Gatehouse", "ana@example.com").unwrap();
        assert!(enrollment.qr_code.starts_with("data:image/png;base64,"));
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        assert!(enrollment.otpauth_url.contains("issuer=Gatehouse"));

        let code = current_code(&enrollment.secret).unwrap();
        assert!(check(&enrollment.secret, "Gatehouse", &code).unwrap());
    }

    #[test]
    fn rejects_wrong_codes() {
        let enrollment = enroll("Gatehouse", "ana@example.com").unwrap();
        let code = current_code(&enrollment.secret).unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(!check(&enrollment.secret, "Gatehouse", wrong).unwrap());
        assert!(!check(&enrollment.secret, "Gatehouse", "abc").unwrap());
    }

    #[test]
    fn rejects_malformed_secret() {
        assert!(check("not base32!", "Gatehouse", "123456").is_err());
    }
}
