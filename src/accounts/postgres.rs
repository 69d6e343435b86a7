use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{instrument, Instrument};
use uuid::Uuid;

use super::{normalize_email, Account, AccountDirectory, Membership, PermissionGrant};

#[derive(Clone, Debug)]
pub struct PgAccountDirectory {
    pool: PgPool,
}

impl PgAccountDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("db.query", db.system = "postgresql", db.operation = operation)
}

fn account_from_row(row: &PgRow) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        two_factor_secret: row.get("two_fa_secret"),
        active: row.get("is_active"),
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, two_fa_secret, is_active";

#[async_trait]
impl AccountDirectory for PgAccountDirectory {
    #[instrument(skip(self, email))]
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE lower(email) = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query(&query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await
            .context("Failed to look up user by email")?;
        Ok(row.as_ref().map(account_from_row))
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await
            .context("Failed to look up user by id")?;
        Ok(row.as_ref().map(account_from_row))
    }

    #[instrument(skip(self))]
    async fn membership(&self, user_id: Uuid) -> Result<Option<Membership>> {
        let query = r"
            SELECT ut.id AS user_tenant_id, ut.tenant_id, ut.role_id, r.name AS role_name
            FROM user_tenants ut
            JOIN tenants t ON t.id = ut.tenant_id AND t.deleted_at IS NULL
            JOIN roles r ON r.id = ut.role_id AND r.deleted_at IS NULL
            WHERE ut.user_id = $1 AND ut.is_active AND ut.deleted_at IS NULL
            ORDER BY ut.created_at
            LIMIT 1
        ";
        let Some(row) = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await
            .context("Failed to load tenant membership")?
        else {
            return Ok(None);
        };
        let role_id: Uuid = row.get("role_id");

        let query = r"
            SELECT p.name, p.resource, p.action
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id AND p.deleted_at IS NULL
            WHERE rp.role_id = $1 AND rp.deleted_at IS NULL
            ORDER BY p.resource, p.action
        ";
        let permissions = sqlx::query(query)
            .bind(role_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT"))
            .await
            .context("Failed to load role permissions")?
            .iter()
            .map(|row| PermissionGrant {
                name: row.get("name"),
                resource: row.get("resource"),
                action: row.get("action"),
            })
            .collect();

        Ok(Some(Membership {
            tenant_id: row.get("tenant_id"),
            user_tenant_id: row.get("user_tenant_id"),
            role_id,
            role_name: row.get("role_name"),
            permissions,
        }))
    }

    #[instrument(skip(self, secret))]
    async fn enable_two_factor(&self, user_id: Uuid, secret: &str) -> Result<()> {
        let query = "UPDATE users SET two_fa_secret = $2, updated_at = NOW() WHERE id = $1";
        sqlx::query(query)
            .bind(user_id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(db_span("UPDATE"))
            .await
            .context("Failed to store two-factor secret")?;
        Ok(())
    }
}
