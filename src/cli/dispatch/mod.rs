//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, cache, tenants, ARG_DSN, ARG_PORT};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let cache = cache::Options::parse(matches)?;
    let auth = auth::Options::parse(matches)?;
    let tenants = tenants::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        cache_url: cache.url,
        store_deadline_ms: cache.store_deadline_ms,
        session_deadline_ms: cache.session_deadline_ms,
        jwt_secret: auth.jwt_secret,
        access_ttl_seconds: auth.access_ttl_seconds,
        refresh_ttl_seconds: auth.refresh_ttl_seconds,
        csrf_ttl_seconds: auth.csrf_ttl_seconds,
        block_threshold: auth.block_threshold,
        block_window_seconds: auth.block_window_seconds,
        block_duration_seconds: auth.block_duration_seconds,
        global_rate_limit: auth.global_rate_limit,
        totp_issuer: auth.totp_issuer,
        frontend_base_url: auth.frontend_base_url,
        strict_tenant_claims: auth.strict_tenant_claims,
        tenant_staleness_seconds: tenants.staleness_seconds,
        tenant_refresh_deadline_seconds: tenants.refresh_deadline_seconds,
        tenant_channel: tenants.channel,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                ("GATEHOUSE_DSN", Some("postgres://app:pw@db:5432/gatehouse")),
                ("GATEHOUSE_JWT_SECRET", Some(SECRET)),
                ("GATEHOUSE_CACHE_URL", Some("memory://")),
                ("GATEHOUSE_BLOCK_THRESHOLD", Some("4")),
                ("GATEHOUSE_TENANT_CHANNEL", Some("tenants")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["gatehouse"]);
                let result = handler(&matches);
                assert!(result.is_ok(), "{result:?}");
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.dsn, "postgres://app:pw@db:5432/gatehouse");
                    assert_eq!(args.cache_url, "memory://");
                    assert_eq!(args.jwt_secret.expose_secret(), SECRET);
                    assert_eq!(args.block_threshold, 4);
                    assert_eq!(args.tenant_channel, "tenants");
                    assert_eq!(args.store_deadline_ms, 3_000);
                    assert!(args.strict_tenant_claims);
                }
            },
        );
    }

    #[test]
    fn short_secret_is_rejected() {
        temp_env::with_vars(
            [
                ("GATEHOUSE_DSN", Some("postgres://db/gatehouse")),
                ("GATEHOUSE_JWT_SECRET", Some("too-short")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["gatehouse"]);
                assert!(handler(&matches).is_err());
            },
        );
    }
}
