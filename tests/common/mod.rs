#![allow(dead_code, clippy::unwrap_used)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use gatehouse::{
    accounts::{hash_password, Account, AccountDirectory, Membership, PermissionGrant},
    api::{self, AppState, AuthConfig},
    store::memory::MemoryCache,
    tenants::{spawn_listener, MemoryBus, TenantAllowList, TenantDirectory},
    token::TokenCodec,
};
use secrecy::SecretString;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;
use totp_rs::{Algorithm, Secret, TOTP};
use tower::ServiceExt;
use uuid::Uuid;

pub const SECRET: &str = "integration-secret-0123456789abcdef";
pub const EMAIL: &str = "ana@example.com";
pub const PASSWORD: &str = "correct horse battery staple";

#[derive(Default)]
pub struct MemoryAccounts {
    accounts: Mutex<HashMap<Uuid, Account>>,
    memberships: Mutex<HashMap<Uuid, Membership>>,
}

impl MemoryAccounts {
    pub fn insert(&self, account: Account, membership: Membership) {
        self.memberships.lock().unwrap().insert(account.id, membership);
        self.accounts.lock().unwrap().insert(account.id, account);
    }

    pub fn get(&self, user_id: Uuid) -> Option<Account> {
        self.accounts.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccounts {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>> {
        Ok(self.get(user_id))
    }

    async fn membership(&self, user_id: Uuid) -> Result<Option<Membership>> {
        Ok(self.memberships.lock().unwrap().get(&user_id).cloned())
    }

    async fn enable_two_factor(&self, user_id: Uuid, secret: &str) -> Result<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("unknown user {user_id}"))?;
        account.two_factor_secret = Some(secret.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTenants {
    ids: Mutex<Vec<Uuid>>,
}

impl MemoryTenants {
    pub fn set(&self, ids: Vec<Uuid>) {
        *self.ids.lock().unwrap() = ids;
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenants {
    async fn allowed_tenant_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.ids.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub app: Router,
    pub state: Arc<AppState>,
    pub accounts: Arc<MemoryAccounts>,
    pub tenants: Arc<MemoryTenants>,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    _stop: watch::Sender<bool>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        Self::with_config(AuthConfig::default()).await
    }

    pub async fn with_config(config: AuthConfig) -> Result<Self> {
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let accounts = Arc::new(MemoryAccounts::default());
        accounts.insert(
            Account {
                id: user_id,
                email: EMAIL.to_string(),
                password_hash: hash_password(PASSWORD)?,
                two_factor_secret: None,
                active: true,
            },
            Membership {
                tenant_id,
                user_tenant_id: Uuid::new_v4(),
                role_id: Uuid::new_v4(),
                role_name: "owner".to_string(),
                permissions: vec![PermissionGrant {
                    name: "pages.read".to_string(),
                    resource: "pages".to_string(),
                    action: "read".to_string(),
                }],
            },
        );

        let tenants = Arc::new(MemoryTenants::default());
        tenants.set(vec![tenant_id]);
        let allow_list = Arc::new(TenantAllowList::new(tenants.clone()));
        allow_list.init().await?;

        let bus = Arc::new(MemoryBus::new());
        let (stop, stopped) = watch::channel(false);
        spawn_listener(
            Arc::clone(&allow_list),
            bus.clone(),
            stopped,
            Duration::from_millis(50),
        );
        // Let the listener subscribe before anything is published.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let codec = TokenCodec::new(&SecretString::from(SECRET.to_string()))?;
        let state = Arc::new(AppState::new(
            config,
            codec,
            Arc::new(MemoryCache::new()),
            accounts.clone(),
            allow_list,
            bus,
        ));
        let app = api::app(Arc::clone(&state))?;

        Ok(Self {
            app,
            state,
            accounts,
            tenants,
            user_id,
            tenant_id,
            _stop: stop,
        })
    }

    pub async fn send(&self, request: Request<Body>) -> Result<Reply> {
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    pub async fn login(&self, password: &str) -> Result<Reply> {
        self.send(post_json(
            "/v1/auth/login",
            None,
            &serde_json::json!({ "email": EMAIL, "password": password }),
        ))
        .await
    }

    /// Log in with the right password and return `(access, refresh)`.
    pub async fn tokens(&self) -> Result<(String, String)> {
        let reply = self.login(PASSWORD).await?;
        if reply.status != StatusCode::OK {
            return Err(anyhow!("login failed: {} {}", reply.status, reply.body));
        }
        Ok((reply.str("access_token")?, reply.str("refresh_token")?))
    }

    pub async fn csrf(&self, access: &str) -> Result<String> {
        let reply = self.send(get("/v1/auth/csrf", Some(access))).await?;
        reply.str("csrf_token")
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn str(&self, field: &str) -> Result<String> {
        self.body
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("missing {field} in {}", self.body))
    }

    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

/// Requests come from one fixed client address unless a test says otherwise.
pub const CLIENT: &str = "203.0.113.10";

pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    request("GET", uri, bearer, &[], Body::empty())
}

pub fn post_json(uri: &str, bearer: Option<&str>, body: &Value) -> Request<Body> {
    request(
        "POST",
        uri,
        bearer,
        &[("content-type", "application/json")],
        Body::from(body.to_string()),
    )
}

pub fn request(
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    extra: &[(&str, &str)],
    body: Body,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", CLIENT);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    builder.body(body).unwrap()
}

pub fn totp_code(secret_base32: &str) -> Result<String> {
    let bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("bad secret: {e:?}"))?;
    let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "user".to_string())
        .map_err(|e| anyhow!("totp: {e}"))?;
    Ok(totp.generate_current()?)
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
