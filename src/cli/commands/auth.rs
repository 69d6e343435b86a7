use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

use crate::{
    api::{DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_CSRF_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS},
    limiter::{DEFAULT_BLOCK_DURATION, DEFAULT_BLOCK_THRESHOLD, DEFAULT_BLOCK_WINDOW},
    token::MIN_SECRET_LEN,
};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";
pub const ARG_CSRF_TTL_SECONDS: &str = "csrf-ttl-seconds";
pub const ARG_BLOCK_THRESHOLD: &str = "block-threshold";
pub const ARG_BLOCK_WINDOW_SECONDS: &str = "block-window-seconds";
pub const ARG_BLOCK_DURATION_SECONDS: &str = "block-duration-seconds";
pub const ARG_GLOBAL_RATE_LIMIT: &str = "global-rate-limit";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_STRICT_TENANT_CLAIMS: &str = "strict-tenant-claims";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub csrf_ttl_seconds: u64,
    pub block_threshold: u64,
    pub block_window_seconds: u64,
    pub block_duration_seconds: u64,
    pub global_rate_limit: u64,
    pub totp_issuer: String,
    pub frontend_base_url: String,
    pub strict_tenant_claims: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if the signing secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_JWT_SECRET}"))?;
        if secret.len() < MIN_SECRET_LEN {
            anyhow::bail!("--{ARG_JWT_SECRET} must be at least {MIN_SECRET_LEN} bytes");
        }

        let number = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);
        let text = |id: &str| {
            matches
                .get_one::<String>(id)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };

        Ok(Self {
            jwt_secret: SecretString::from(secret.clone()),
            access_ttl_seconds: number(ARG_ACCESS_TTL_SECONDS, DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl_seconds: number(ARG_REFRESH_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS),
            csrf_ttl_seconds: number(ARG_CSRF_TTL_SECONDS, DEFAULT_CSRF_TTL_SECONDS),
            block_threshold: number(ARG_BLOCK_THRESHOLD, DEFAULT_BLOCK_THRESHOLD),
            block_window_seconds: number(ARG_BLOCK_WINDOW_SECONDS, DEFAULT_BLOCK_WINDOW.as_secs()),
            block_duration_seconds: number(
                ARG_BLOCK_DURATION_SECONDS,
                DEFAULT_BLOCK_DURATION.as_secs(),
            ),
            global_rate_limit: number(ARG_GLOBAL_RATE_LIMIT, 100),
            totp_issuer: text(ARG_TOTP_ISSUER),
            frontend_base_url: text(ARG_FRONTEND_BASE_URL),
            strict_tenant_claims: matches
                .get_one::<bool>(ARG_STRICT_TENANT_CLAIMS)
                .copied()
                .unwrap_or(true),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_abuse_args(command);
    with_frontend_args(command)
}

fn seconds_arg(id: &'static str, env: &'static str, help: &'static str, default: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64).range(1..))
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret for signing tokens (at least 32 bytes)")
                .env("GATEHOUSE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(seconds_arg(
            ARG_ACCESS_TTL_SECONDS,
            "GATEHOUSE_ACCESS_TTL_SECONDS",
            "Access token and session record TTL in seconds",
            "86400",
        ))
        .arg(seconds_arg(
            ARG_REFRESH_TTL_SECONDS,
            "GATEHOUSE_REFRESH_TTL_SECONDS",
            "Refresh token TTL in seconds",
            "604800",
        ))
        .arg(seconds_arg(
            ARG_CSRF_TTL_SECONDS,
            "GATEHOUSE_CSRF_TTL_SECONDS",
            "CSRF token TTL in seconds",
            "60",
        ))
}

fn with_abuse_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BLOCK_THRESHOLD)
                .long(ARG_BLOCK_THRESHOLD)
                .help("Failed attempts before a client is blocked")
                .env("GATEHOUSE_BLOCK_THRESHOLD")
                .default_value("3")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(seconds_arg(
            ARG_BLOCK_WINDOW_SECONDS,
            "GATEHOUSE_BLOCK_WINDOW_SECONDS",
            "Window in which failed attempts are counted, in seconds",
            "3600",
        ))
        .arg(seconds_arg(
            ARG_BLOCK_DURATION_SECONDS,
            "GATEHOUSE_BLOCK_DURATION_SECONDS",
            "How long a blocked client stays blocked, in seconds",
            "1800",
        ))
        .arg(
            Arg::new(ARG_GLOBAL_RATE_LIMIT)
                .long(ARG_GLOBAL_RATE_LIMIT)
                .help("Requests per minute allowed per client and HTTP method")
                .env("GATEHOUSE_GLOBAL_RATE_LIMIT")
                .default_value("100")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_frontend_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown in authenticator apps")
                .env("GATEHOUSE_TOTP_ISSUER")
                .default_value("Gatehouse"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL allowed by CORS")
                .env("GATEHOUSE_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
        .arg(
            Arg::new(ARG_STRICT_TENANT_CLAIMS)
                .long(ARG_STRICT_TENANT_CLAIMS)
                .help("Require token tenant claims to match the session record")
                .env("GATEHOUSE_STRICT_TENANT_CLAIMS")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
}
