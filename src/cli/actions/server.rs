use crate::{
    accounts::PgAccountDirectory,
    api::{self, AppState, AuthConfig},
    cli::{commands::cache::MEMORY_URL, telemetry},
    limiter::{BlockPolicy, LimitConfig, WindowPolicy},
    store::{memory::MemoryCache, redis::RedisCache, CacheStore},
    tenants::{
        spawn_listener, InvalidationBus, MemoryBus, PgTenantDirectory, RedisBus, TenantAllowList,
        RECONNECT_BACKOFF,
    },
    token::TokenCodec,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub cache_url: String,
    pub store_deadline_ms: u64,
    pub session_deadline_ms: u64,
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
    pub tenant_staleness_seconds: u64,
    pub tenant_refresh_deadline_seconds: u64,
    pub tenant_channel: String,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        let limits = LimitConfig::default().with_request(WindowPolicy::new(
            self.global_rate_limit,
            Duration::from_secs(60),
        ));
        let block_policy = BlockPolicy::new()
            .with_threshold(self.block_threshold)
            .with_window(Duration::from_secs(self.block_window_seconds))
            .with_duration(Duration::from_secs(self.block_duration_seconds));

        AuthConfig::new(self.frontend_base_url.clone())
            .with_access_ttl(Duration::from_secs(self.access_ttl_seconds))
            .with_refresh_ttl(Duration::from_secs(self.refresh_ttl_seconds))
            .with_csrf_ttl(Duration::from_secs(self.csrf_ttl_seconds))
            .with_store_deadline(Duration::from_millis(self.store_deadline_ms))
            .with_session_deadline(Duration::from_millis(self.session_deadline_ms))
            .with_strict_tenant_claims(self.strict_tenant_claims)
            .with_totp_issuer(self.totp_issuer.clone())
            .with_block_policy(block_policy)
            .with_limits(limits)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if a backend cannot be reached, the tenant allow-list
/// cannot be loaded, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let codec = TokenCodec::new(&args.jwt_secret).context("Invalid JWT secret")?;
    let config = args.auth_config();

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let (cache, bus): (Arc<dyn CacheStore>, Arc<dyn InvalidationBus>) =
        if args.cache_url == MEMORY_URL {
            warn!("Using the in-process cache, state is not shared between processes");
            (Arc::new(MemoryCache::new()), Arc::new(MemoryBus::new()))
        } else {
            let cache = RedisCache::connect(&args.cache_url)
                .await
                .context("Failed to connect to the shared cache")?;
            let bus = RedisBus::connect(&args.cache_url, &args.tenant_channel)
                .await
                .context("Failed to connect to the tenant signal channel")?;
            (Arc::new(cache), Arc::new(bus))
        };

    let tenants = Arc::new(
        TenantAllowList::new(Arc::new(PgTenantDirectory::new(pool.clone())))
            .with_staleness(Duration::from_secs(args.tenant_staleness_seconds))
            .with_refresh_deadline(Duration::from_secs(args.tenant_refresh_deadline_seconds)),
    );
    tenants
        .init()
        .await
        .context("Failed to load the tenant allow-list")?;

    let (stop, stopped) = watch::channel(false);
    let listener = spawn_listener(
        Arc::clone(&tenants),
        Arc::clone(&bus),
        stopped,
        RECONNECT_BACKOFF,
    );

    let state = Arc::new(AppState::new(
        config,
        codec,
        cache,
        Arc::new(PgAccountDirectory::new(pool)),
        tenants,
        bus,
    ));
    let app = api::app(state)?;

    let served = api::serve(args.port, app, shutdown_signal()).await;

    stop.send_replace(true);
    if let Err(err) = listener.await {
        warn!("Tenant listener ended abnormally: {err}");
    }
    telemetry::shutdown_tracer();

    served
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_url(&args.dsn)),
        ("cache_url", redact_url(&args.cache_url)),
        ("store_deadline_ms", args.store_deadline_ms.to_string()),
        ("session_deadline_ms", args.session_deadline_ms.to_string()),
        ("access_ttl_seconds", args.access_ttl_seconds.to_string()),
        ("refresh_ttl_seconds", args.refresh_ttl_seconds.to_string()),
        ("block_threshold", args.block_threshold.to_string()),
        ("block_window_seconds", args.block_window_seconds.to_string()),
        ("block_duration_seconds", args.block_duration_seconds.to_string()),
        ("global_rate_limit", args.global_rate_limit.to_string()),
        ("totp_issuer", args.totp_issuer.clone()),
        ("frontend_base_url", args.frontend_base_url.clone()),
        ("strict_tenant_claims", args.strict_tenant_claims.to_string()),
        ("tenant_staleness_seconds", args.tenant_staleness_seconds.to_string()),
        ("tenant_channel", args.tenant_channel.clone()),
    ];
    info!("{}", format_entries("Startup configuration", &entries));
}

/// Replace any password in a connection URL.
fn redact_url(raw: &str) -> String {
    if raw == MEMORY_URL {
        return raw.to_string();
    }
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn format_entries(title: &str, entries: &[(&str, String)]) -> String {
    let width = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let short_hash = crate::GIT_COMMIT_HASH.get(..7).unwrap_or(crate::GIT_COMMIT_HASH);
    let mut message = format!(
        "{} {} - {short_hash}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    for (key, value) in entries {
        let padding = " ".repeat(width.saturating_sub(key.len()));
        message.push_str(&format!("\n  {key}:{padding} {value}"));
    }
    message
}
