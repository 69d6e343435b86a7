//! # Gatehouse (session and tenant coordination layer)
//!
//! `gatehouse` sits in front of a multi-tenant API and decides whether a
//! request is allowed to reach it. It combines signed bearer tokens with a
//! shared, revocable session store so that a token is only as good as the
//! server-side session record backing it.
//!
//! ## Request pipeline
//!
//! Inbound requests pass a fixed-window limiter keyed by client address, then
//! (for login and code verification) an escalating block check, then the
//! [`guard::AuthGuard`] state machine:
//!
//! 1. extract the bearer token from `Authorization`
//! 2. verify signature and expiry with [`token::TokenCodec`]
//! 3. reject revoked tokens and fetch the session from [`store::SessionStore`]
//! 4. cross-validate token claims against the session record
//! 5. expose the resulting [`guard::Identity`] to the handler
//!
//! Revoked, expired and unknown sessions are indistinguishable to callers.
//!
//! ## Tenant allow-list
//!
//! Each process keeps a [`tenants::TenantAllowList`] loaded from the system
//! of record. Writers publish a `{"type":"refresh"}` signal on a shared
//! channel and every subscriber reloads from the source of truth, never from
//! the message. Refresh failures keep the last known-good set, while store
//! failures on the authentication path deny the request.
//!
//! ## Two-factor authentication
//!
//! TOTP secrets are issued once per user and cached until confirmed
//! ([`two_factor::TwoFactorFlow`]); failed codes are counted by
//! [`limiter::BlockGuard`].

pub mod accounts;
pub mod api;
pub mod cli;
pub mod error;
pub mod guard;
pub mod limiter;
pub mod store;
pub mod tenants;
pub mod token;
pub mod two_factor;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
