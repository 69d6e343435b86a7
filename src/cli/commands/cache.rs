//! Shared cache connection and per-call deadlines.

use clap::{Arg, ArgMatches, Command};

use crate::api::{DEFAULT_SESSION_DEADLINE_MS, DEFAULT_STORE_DEADLINE_MS};

pub const ARG_CACHE_URL: &str = "cache-url";
pub const ARG_STORE_DEADLINE_MS: &str = "store-deadline-ms";
pub const ARG_SESSION_DEADLINE_MS: &str = "session-deadline-ms";

/// Scheme selecting the in-process cache and signal bus.
pub const MEMORY_URL: &str = "memory://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub url: String,
    pub store_deadline_ms: u64,
    pub session_deadline_ms: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if the cache URL is empty or not `redis://`,
    /// `rediss://` or `memory://`.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let url = matches
            .get_one::<String>(ARG_CACHE_URL)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_CACHE_URL}"))?;

        if !(url.starts_with("redis://") || url.starts_with("rediss://") || url == MEMORY_URL) {
            anyhow::bail!("--{ARG_CACHE_URL} must be redis://, rediss:// or {MEMORY_URL}");
        }

        Ok(Self {
            url,
            store_deadline_ms: matches
                .get_one::<u64>(ARG_STORE_DEADLINE_MS)
                .copied()
                .unwrap_or(DEFAULT_STORE_DEADLINE_MS),
            session_deadline_ms: matches
                .get_one::<u64>(ARG_SESSION_DEADLINE_MS)
                .copied()
                .unwrap_or(DEFAULT_SESSION_DEADLINE_MS),
        })
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_URL
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CACHE_URL)
                .long(ARG_CACHE_URL)
                .help("Shared cache URL (redis://host:port or memory:// for a single process)")
                .env("GATEHOUSE_CACHE_URL")
                .default_value("redis://127.0.0.1:6379"),
        )
        .arg(
            Arg::new(ARG_STORE_DEADLINE_MS)
                .long(ARG_STORE_DEADLINE_MS)
                .help("Deadline for cache calls on the request path, in milliseconds")
                .env("GATEHOUSE_STORE_DEADLINE_MS")
                .default_value("3000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_DEADLINE_MS)
                .long(ARG_SESSION_DEADLINE_MS)
                .help("Deadline for cache calls made by login, refresh and logout, in milliseconds")
                .env("GATEHOUSE_SESSION_DEADLINE_MS")
                .default_value("15000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
