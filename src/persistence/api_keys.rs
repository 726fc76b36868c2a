//! API key rows. Plaintext secrets are generated here and returned to the
//! caller exactly once; only `(key_hash, key_prefix)` are ever persisted or
//! logged.

use crate::auth::{hash_api_key, key_prefix, Scope};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEnvironment {
    Live,
    Test,
}

impl KeyEnvironment {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
        }
    }
}

/// Persisted shape — no plaintext field exists because none is ever stored.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub key_prefix: String,
    pub label: String,
    pub scopes: Vec<String>,
    pub rate_limit_prep: i32,
    pub rate_limit_check: i32,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Returned only from [`ApiKeyRepository::create`]; the plaintext is never
/// retrievable again afterward.
pub struct NewApiKey {
    pub plaintext: String,
    pub record: ApiKeyRecord,
}

fn generate_plaintext(env: KeyEnvironment) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("cs_{}_{}", env.as_str(), hex::encode(bytes))
}

pub struct ApiKeyRepository {
    pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        tenant_id: Uuid,
        label: &str,
        scopes: &[Scope],
        rate_limit_prep: u32,
        rate_limit_check: u32,
        expires_at: Option<DateTime<Utc>>,
        environment: KeyEnvironment,
    ) -> Result<NewApiKey> {
        let plaintext = generate_plaintext(environment);
        let key_hash = hash_api_key(&plaintext);
        let prefix = key_prefix(&plaintext);
        let scope_strings: Vec<String> = scopes
            .iter()
            .map(|s| serde_json::to_value(s).ok().and_then(|v| v.as_str().map(str::to_string)))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CoreError::Internal("failed to serialize scopes".to_string()))?;

        let record = sqlx::query_as::<_, ApiKeyRecord>(
            r#"
            INSERT INTO api_keys
                (id, tenant_id, key_hash, key_prefix, label, scopes,
                 rate_limit_prep, rate_limit_check, active, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, $9)
            RETURNING id, tenant_id, key_prefix, label, scopes,
                      rate_limit_prep, rate_limit_check, active, expires_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&key_hash)
        .bind(&prefix)
        .bind(label)
        .bind(&scope_strings)
        .bind(rate_limit_prep as i32)
        .bind(rate_limit_check as i32)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(NewApiKey { plaintext, record })
    }

    pub async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<ApiKeyRecord>> {
        sqlx::query_as::<_, ApiKeyRecord>(
            r#"
            SELECT id, tenant_id, key_prefix, label, scopes,
                   rate_limit_prep, rate_limit_check, active, expires_at
            FROM api_keys
            WHERE tenant_id = $1
            ORDER BY label
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// `tenant_id` is required so a caller cannot deactivate a key belonging
    /// to a different tenant by guessing its id.
    pub async fn deactivate(&self, tenant_id: Uuid, key_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE api_keys SET active = false WHERE id = $1 AND tenant_id = $2")
            .bind(key_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("api key {key_id} not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_plaintext_matches_wire_format() {
        let plaintext = generate_plaintext(KeyEnvironment::Live);
        assert!(plaintext.starts_with("cs_live_"));
        assert_eq!(plaintext.len(), "cs_live_".len() + 32);
        assert!(plaintext[8..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_plaintext_is_not_deterministic() {
        assert_ne!(generate_plaintext(KeyEnvironment::Test), generate_plaintext(KeyEnvironment::Test));
    }
}
