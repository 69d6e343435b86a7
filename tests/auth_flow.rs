mod common;

use anyhow::Result;
use axum::{body::Body, http::StatusCode};
use common::{get, post_json, request, totp_code, Harness, PASSWORD};
use gatehouse::{
    api::{handlers::auth::CSRF_HEADER, AuthConfig},
    limiter::{LimitConfig, WindowPolicy},
};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn login_opens_a_session_the_guard_accepts() -> Result<()> {
    let harness = Harness::new().await?;

    let reply = harness.login(PASSWORD).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("token_type")?, "Bearer");
    let session_id = Uuid::parse_str(&reply.str("session_id")?)?;
    let access = reply.str("access_token")?;

    let stored = harness.state.sessions().get_session(session_id).await?;
    assert!(stored.is_some_and(|session| session.user_id == harness.user_id));

    let me = harness.send(get("/v1/auth/session", Some(&access))).await?;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.str("tenant_id")?, harness.tenant_id.to_string());
    assert_eq!(me.str("email")?, common::EMAIL);
    Ok(())
}

#[tokio::test]
async fn missing_and_garbage_tokens_are_rejected() -> Result<()> {
    let harness = Harness::new().await?;

    let reply = harness.send(get("/v1/auth/session", None)).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error(), Some("Unauthorized - Missing token"));

    let reply = harness.send(get("/v1/auth/session", Some("not.a.jwt"))).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error(), Some("Unauthorized - Invalid token format"));
    Ok(())
}

#[tokio::test]
async fn logout_invalidates_both_tokens() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, refresh) = harness.tokens().await?;

    let reply = harness
        .send(post_json(
            "/v1/auth/logout",
            Some(&access),
            &json!({ "refresh_token": refresh }),
        ))
        .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let me = harness.send(get("/v1/auth/session", Some(&access))).await?;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    assert_eq!(me.error(), Some("Unauthorized - Session not found"));

    let again = harness
        .send(post_json(
            "/v1/auth/refresh",
            None,
            &json!({ "refresh_token": refresh }),
        ))
        .await?;
    assert_eq!(again.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_without_body_still_ends_the_session() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _refresh) = harness.tokens().await?;

    let reply = harness
        .send(request("POST", "/v1/auth/logout", Some(&access), &[], Body::empty()))
        .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let me = harness.send(get("/v1/auth/session", Some(&access))).await?;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn fourth_failed_login_is_blocked() -> Result<()> {
    let harness = Harness::new().await?;

    for _ in 0..3 {
        let reply = harness.login("wrong password").await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.error(), Some("Invalid credentials"));
    }

    // Even the right password is refused while blocked.
    let reply = harness.login(PASSWORD).await?;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(reply.headers.contains_key("retry-after"));
    Ok(())
}

#[tokio::test]
async fn successful_login_resets_failure_count() -> Result<()> {
    let harness = Harness::new().await?;

    for _ in 0..2 {
        assert_eq!(
            harness.login("wrong password").await?.status,
            StatusCode::UNAUTHORIZED
        );
    }
    assert_eq!(harness.login(PASSWORD).await?.status, StatusCode::OK);
    for _ in 0..2 {
        assert_eq!(
            harness.login("wrong password").await?.status,
            StatusCode::UNAUTHORIZED
        );
    }
    assert_eq!(harness.login(PASSWORD).await?.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_the_pair_on_the_same_session() -> Result<()> {
    let harness = Harness::new().await?;
    let login = harness.login(PASSWORD).await?;
    let refresh = login.str("refresh_token")?;
    let access = login.str("access_token")?;

    // An access token is not a refresh token.
    let wrong_kind = harness
        .send(post_json(
            "/v1/auth/refresh",
            None,
            &json!({ "refresh_token": access }),
        ))
        .await?;
    assert_eq!(wrong_kind.status, StatusCode::UNAUTHORIZED);

    let rotated = harness
        .send(post_json(
            "/v1/auth/refresh",
            None,
            &json!({ "refresh_token": refresh }),
        ))
        .await?;
    assert_eq!(rotated.status, StatusCode::OK);
    assert_eq!(rotated.str("session_id")?, login.str("session_id")?);
    assert_ne!(rotated.str("refresh_token")?, refresh);

    let me = harness
        .send(get("/v1/auth/session", Some(&rotated.str("access_token")?)))
        .await?;
    assert_eq!(me.status, StatusCode::OK);

    let replay = harness
        .send(post_json(
            "/v1/auth/refresh",
            None,
            &json!({ "refresh_token": refresh }),
        ))
        .await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn new_login_replaces_the_previous_session() -> Result<()> {
    let harness = Harness::new().await?;
    let (first, first_refresh) = harness.tokens().await?;
    let (second, _) = harness.tokens().await?;

    let old = harness.send(get("/v1/auth/session", Some(&first))).await?;
    assert_eq!(old.status, StatusCode::UNAUTHORIZED);

    let stale_refresh = harness
        .send(post_json(
            "/v1/auth/refresh",
            None,
            &json!({ "refresh_token": first_refresh }),
        ))
        .await?;
    assert_eq!(stale_refresh.status, StatusCode::UNAUTHORIZED);

    let current = harness.send(get("/v1/auth/session", Some(&second))).await?;
    assert_eq!(current.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn tampered_session_record_is_a_claim_mismatch() -> Result<()> {
    let harness = Harness::new().await?;
    let login = harness.login(PASSWORD).await?;
    let session_id = Uuid::parse_str(&login.str("session_id")?)?;

    let sessions = harness.state.sessions();
    let mut record = sessions
        .get_session(session_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("session missing"))?;
    record.tenant_id = Uuid::new_v4();
    sessions
        .put_session(session_id, &record, Duration::from_secs(60))
        .await?;

    let me = harness
        .send(get("/v1/auth/session", Some(&login.str("access_token")?)))
        .await?;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    assert_eq!(me.error(), Some("Unauthorized - Token mismatch"));
    Ok(())
}

#[tokio::test]
async fn removed_tenant_is_refused_after_reload() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _) = harness.tokens().await?;

    harness.tenants.set(Vec::new());
    harness.state.tenants().safe_refresh().await;

    let me = harness.send(get("/v1/auth/session", Some(&access))).await?;
    assert_eq!(me.status, StatusCode::FORBIDDEN);
    assert_eq!(me.error(), Some("Forbidden - Tenant is not allowed"));
    Ok(())
}

#[tokio::test]
async fn two_factor_enrollment_and_login() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _) = harness.tokens().await?;

    let setup = harness
        .send(request("POST", "/v1/auth/2fa/setup", Some(&access), &[], Body::empty()))
        .await?;
    assert_eq!(setup.status, StatusCode::OK);
    let secret = setup.str("secret")?;
    assert!(setup.str("qr_code")?.starts_with("data:image/png;base64,"));

    let again = harness
        .send(request("POST", "/v1/auth/2fa/setup", Some(&access), &[], Body::empty()))
        .await?;
    assert_eq!(again.str("secret")?, secret);

    let no_csrf = harness
        .send(post_json(
            "/v1/auth/2fa/enable",
            Some(&access),
            &json!({ "code": totp_code(&secret)? }),
        ))
        .await?;
    assert_eq!(no_csrf.status, StatusCode::FORBIDDEN);
    assert_eq!(no_csrf.error(), Some("Forbidden - Invalid CSRF token"));

    let csrf = harness.csrf(&access).await?;
    let enabled = harness
        .send(request(
            "POST",
            "/v1/auth/2fa/enable",
            Some(&access),
            &[("content-type", "application/json"), (CSRF_HEADER, &csrf)],
            Body::from(json!({ "code": totp_code(&secret)? }).to_string()),
        ))
        .await?;
    assert_eq!(enabled.status, StatusCode::OK);
    assert_eq!(
        harness
            .accounts
            .get(harness.user_id)
            .and_then(|account| account.two_factor_secret),
        Some(secret.clone())
    );

    let challenge = harness.login(PASSWORD).await?;
    assert_eq!(challenge.status, StatusCode::ACCEPTED);
    assert_eq!(challenge.str("status")?, "two_fa_required");
    let challenge_token = challenge.str("challenge_token")?;

    let wrong = harness
        .send(post_json(
            "/v1/auth/2fa/verify",
            None,
            &json!({ "challenge_token": challenge_token, "code": "abcdef" }),
        ))
        .await?;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.error(), Some("Invalid two-factor code"));

    let verified = harness
        .send(post_json(
            "/v1/auth/2fa/verify",
            None,
            &json!({ "challenge_token": challenge_token, "code": totp_code(&secret)? }),
        ))
        .await?;
    assert_eq!(verified.status, StatusCode::OK);
    let fresh = verified.str("access_token")?;

    // The challenge is single use.
    let replay = harness
        .send(post_json(
            "/v1/auth/2fa/verify",
            None,
            &json!({ "challenge_token": challenge_token, "code": totp_code(&secret)? }),
        ))
        .await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);

    let me = harness.send(get("/v1/auth/session", Some(&fresh))).await?;
    assert_eq!(me.status, StatusCode::OK);

    let setup_again = harness
        .send(request("POST", "/v1/auth/2fa/setup", Some(&fresh), &[], Body::empty()))
        .await?;
    assert_eq!(setup_again.status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn verified_session_can_trigger_tenant_refresh() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _) = harness.tokens().await?;

    let setup = harness
        .send(request("POST", "/v1/auth/2fa/setup", Some(&access), &[], Body::empty()))
        .await?;
    let secret = setup.str("secret")?;
    let csrf = harness.csrf(&access).await?;
    let enabled = harness
        .send(request(
            "POST",
            "/v1/auth/2fa/enable",
            Some(&access),
            &[("content-type", "application/json"), (CSRF_HEADER, &csrf)],
            Body::from(json!({ "code": totp_code(&secret)? }).to_string()),
        ))
        .await?;
    assert_eq!(enabled.status, StatusCode::OK);

    let added = Uuid::new_v4();
    harness.tenants.set(vec![harness.tenant_id, added]);
    assert!(!harness.state.tenants().is_allowed(added));

    let reply = harness
        .send(request(
            "POST",
            "/v1/tenants/refresh",
            Some(&access),
            &[(CSRF_HEADER, &csrf)],
            Body::empty(),
        ))
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);

    let tenants = harness.state.tenants().clone();
    assert!(
        common::eventually(Duration::from_secs(2), || tenants.is_allowed(added)).await,
        "allow-list never picked up the new tenant"
    );

    let listed = harness.send(get("/v1/tenants/allowed", Some(&access))).await?;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body["count"], 2);
    Ok(())
}

#[tokio::test]
async fn tenant_refresh_needs_two_factor() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _) = harness.tokens().await?;
    let csrf = harness.csrf(&access).await?;

    let reply = harness
        .send(request(
            "POST",
            "/v1/tenants/refresh",
            Some(&access),
            &[(CSRF_HEADER, &csrf)],
            Body::empty(),
        ))
        .await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.error(), Some("Forbidden - 2FA verification required"));
    Ok(())
}

#[tokio::test]
async fn global_limiter_applies_per_client() -> Result<()> {
    let limits = LimitConfig::default().with_request(WindowPolicy::new(2, Duration::from_secs(60)));
    let harness = Harness::with_config(AuthConfig::default().with_limits(limits)).await?;

    for _ in 0..2 {
        assert_eq!(harness.send(get("/health", None)).await?.status, StatusCode::OK);
    }
    let limited = harness.send(get("/health", None)).await?;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers.contains_key("retry-after"));

    // Another client has its own window.
    let other = axum::http::Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "198.51.100.77")
        .body(Body::empty())?;
    assert_eq!(harness.send(other).await?.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn health_reports_build_and_cache() -> Result<()> {
    let harness = Harness::new().await?;

    let reply = harness.send(get("/health", None)).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.str("cache")?, "ok");
    assert_eq!(reply.str("name")?, "gatehouse");
    assert_eq!(reply.body["tenants"], 1);

    let x_app = reply
        .headers
        .get("x-app")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(x_app.starts_with("gatehouse:"));
    assert!(reply.headers.contains_key("x-request-id"));
    Ok(())
}

/// Enrol a TOTP authenticator on the session behind `access` and return
/// the base32 secret together with the CSRF token used.
async fn enable_two_factor(harness: &Harness, access: &str) -> Result<(String, String)> {
    let setup = harness
        .send(request("POST", "/v1/auth/2fa/setup", Some(access), &[], Body::empty()))
        .await?;
    let secret = setup.str("secret")?;
    let csrf = harness.csrf(access).await?;
    let enabled = harness
        .send(request(
            "POST",
            "/v1/auth/2fa/enable",
            Some(access),
            &[("content-type", "application/json"), (CSRF_HEADER, &csrf)],
            Body::from(json!({ "code": totp_code(&secret)? }).to_string()),
        ))
        .await?;
    anyhow::ensure!(enabled.status == StatusCode::OK, "enable failed: {}", enabled.body);
    Ok((secret, csrf))
}

#[tokio::test]
async fn refreshed_session_outlives_the_first_refresh_lifetime() -> Result<()> {
    let config = AuthConfig::default()
        .with_access_ttl(Duration::from_secs(2))
        .with_refresh_ttl(Duration::from_secs(3));
    let harness = Harness::with_config(config).await?;
    let (access, refresh) = harness.tokens().await?;
    let (_secret, csrf) = enable_two_factor(&harness, &access).await?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let first = harness
        .send(post_json(
            "/v1/auth/refresh",
            None,
            &json!({ "refresh_token": refresh }),
        ))
        .await?;
    assert_eq!(first.status, StatusCode::OK);

    // Past the login's refresh lifetime, inside the rotated token's.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let second = harness
        .send(post_json(
            "/v1/auth/refresh",
            None,
            &json!({ "refresh_token": first.str("refresh_token")? }),
        ))
        .await?;
    assert_eq!(second.status, StatusCode::OK);

    // The 2FA confirmation followed the session along.
    let reply = harness
        .send(request(
            "POST",
            "/v1/tenants/refresh",
            Some(&second.str("access_token")?),
            &[(CSRF_HEADER, &csrf)],
            Body::empty(),
        ))
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    Ok(())
}

#[tokio::test]
async fn repeated_wrong_codes_block_two_factor_verification() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _) = harness.tokens().await?;
    let (secret, _) = enable_two_factor(&harness, &access).await?;

    let challenge = harness.login(PASSWORD).await?;
    assert_eq!(challenge.status, StatusCode::ACCEPTED);
    let challenge_token = challenge.str("challenge_token")?;

    let threshold = harness.state.config().block_policy().threshold();
    for _ in 0..threshold {
        let wrong = harness
            .send(post_json(
                "/v1/auth/2fa/verify",
                None,
                &json!({ "challenge_token": challenge_token, "code": "abcdef" }),
            ))
            .await?;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    }

    let blocked = harness
        .send(post_json(
            "/v1/auth/2fa/verify",
            None,
            &json!({ "challenge_token": challenge_token, "code": totp_code(&secret)? }),
        ))
        .await?;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(blocked.headers.contains_key("retry-after"));
    Ok(())
}

#[tokio::test]
async fn concurrent_verifies_open_one_session() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _) = harness.tokens().await?;
    let (secret, _) = enable_two_factor(&harness, &access).await?;

    let challenge = harness.login(PASSWORD).await?;
    let body = json!({
        "challenge_token": challenge.str("challenge_token")?,
        "code": totp_code(&secret)?,
    });

    let (first, second) = tokio::join!(
        harness.send(post_json("/v1/auth/2fa/verify", None, &body)),
        harness.send(post_json("/v1/auth/2fa/verify", None, &body)),
    );
    let mut statuses = [first?.status, second?.status];
    statuses.sort_by_key(StatusCode::as_u16);
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);
    Ok(())
}

#[tokio::test]
async fn withdrawn_tenant_can_still_log_out() -> Result<()> {
    let harness = Harness::new().await?;
    let (access, _) = harness.tokens().await?;

    harness.tenants.set(Vec::new());
    harness.state.tenants().safe_refresh().await;

    let reply = harness
        .send(request("POST", "/v1/auth/logout", Some(&access), &[], Body::empty()))
        .await?;
    assert_eq!(reply.status, StatusCode::OK);

    let me = harness.send(get("/v1/auth/session", Some(&access))).await?;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    assert_eq!(me.error(), Some("Unauthorized - Session not found"));
    Ok(())
}
