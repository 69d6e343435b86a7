use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// System of record for which tenants may use the API.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn allowed_tenant_ids(&self) -> Result<Vec<Uuid>>;
}

#[derive(Clone, Debug)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    #[instrument(skip(self))]
    async fn allowed_tenant_ids(&self) -> Result<Vec<Uuid>> {
        let query = r"
            SELECT id FROM tenants
            WHERE subscription_status = 'active' AND deleted_at IS NULL
        ";
        sqlx::query_scalar::<_, Uuid>(query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load allowed tenant ids")
    }
}
