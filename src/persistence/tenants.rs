//! Tenant rows — not themselves tenant-scoped, since a tenant cannot be
//! scoped to itself. Created by the (out-of-scope) admin tool; exposed here
//! only to the extent the core needs to read/deactivate a tenant.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, name, active, created_at)
            VALUES ($1, $2, true, $3)
            RETURNING id, name, active, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                CoreError::Conflict(format!("tenant '{name}' already exists"))
            }
            other => other.into(),
        })
    }

    pub async fn get_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT id, name, active, created_at FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Deactivating a tenant does not delete its API keys; `AuthGate` already
    /// rejects them because it joins on `tenants.active`.
    pub async fn deactivate(&self, tenant_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE tenants SET active = false WHERE id = $1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("tenant {tenant_id} not found")));
        }
        Ok(())
    }
}
