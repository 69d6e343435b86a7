//! Users and their tenant memberships, as seen by the login flow.

mod postgres;

pub use postgres::PgAccountDirectory;

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use uuid::Uuid;

use crate::store::SessionMetadata;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Confirmed TOTP secret (base32). `None` until 2FA is enabled.
    pub two_factor_secret: Option<String>,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionGrant {
    pub name: String,
    pub resource: String,
    pub action: String,
}

/// The user's current tenant seat and the role attached to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Membership {
    pub tenant_id: Uuid,
    pub user_tenant_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub permissions: Vec<PermissionGrant>,
}

impl Membership {
    /// Snapshot this membership into a session record.
    #[must_use]
    pub fn session(
        &self,
        account: &Account,
        session_id: Uuid,
        user_agent: &str,
        issued_at: i64,
    ) -> SessionMetadata {
        // One role name per permission row, matching the denormalised layout.
        let role_names = if self.permissions.is_empty() {
            vec![self.role_name.clone()]
        } else {
            vec![self.role_name.clone(); self.permissions.len()]
        };
        SessionMetadata {
            user_id: account.id,
            tenant_id: self.tenant_id,
            user_tenant_id: self.user_tenant_id,
            role_id: self.role_id,
            email: account.email.clone(),
            session_id,
            user_agent: user_agent.to_string(),
            role_names,
            permission_names: self.permissions.iter().map(|p| p.name.clone()).collect(),
            permission_resources: self.permissions.iter().map(|p| p.resource.clone()).collect(),
            permission_actions: self.permissions.iter().map(|p| p.action.clone()).collect(),
            issued_at,
        }
    }
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>>;

    /// Active membership used for new sessions, `None` if the user has no
    /// seat in any live tenant.
    async fn membership(&self, user_id: Uuid) -> Result<Option<Membership>>;

    async fn enable_two_factor(&self, user_id: Uuid, secret: &str) -> Result<()>;
}

/// Normalize an email for lookups.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Constant-time check of `password` against an Argon2 PHC string. A
/// malformed hash never verifies.
#[must_use]
pub fn verify_password(password_hash: &str, password: &str) -> bool {
    PasswordHash::new(password_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "battery staple"));
        assert!(!verify_password("not a phc string", "correct horse"));
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ana@Example.COM "), "ana@example.com");
    }

    #[test]
    fn membership_snapshot_keeps_permission_order() {
        let account = Account {
            id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            password_hash: String::new(),
            two_factor_secret: None,
            active: true,
        };
        let membership = Membership {
            tenant_id: Uuid::new_v4(),
            user_tenant_id: Uuid::new_v4(),
            role_id: Uuid::new_v4(),
            role_name: "admin".to_string(),
            permissions: vec![
                PermissionGrant {
                    name: "read pages".to_string(),
                    resource: "pages".to_string(),
                    action: "read".to_string(),
                },
                PermissionGrant {
                    name: "write pages".to_string(),
                    resource: "pages".to_string(),
                    action: "write".to_string(),
                },
            ],
        };
        let session_id = Uuid::new_v4();
        let session = membership.session(&account, session_id, "curl/8", 1_700_000_000);

        assert_eq!(session.user_id, account.id);
        assert_eq!(session.role_id, membership.role_id);
        assert_eq!(session.session_id, session_id);
        assert_eq!(session.role_names, vec!["admin", "admin"]);
        assert_eq!(session.permission_actions, vec!["read", "write"]);
        assert!(session.is_complete());
    }
}
