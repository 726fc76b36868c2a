//! Auth & Scope Gate (§4.8) — the only path that mints a `TenantContext`.
//! API keys are never compared or stored as plaintext: only a SHA-256 hash
//! and a short prefix (for display/audit) ever reach this process's memory
//! or the database, and `TenantContext`'s `Debug` impl redacts everything
//! but the prefix.

pub mod scope;

pub use scope::{Scope, ScopeGuard};

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

/// Per-request tenant context minted by the gate; repositories refuse to run
/// without one.
#[derive(Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub scopes: Vec<Scope>,
    pub rate_limit_prep: u32,
    pub rate_limit_check: u32,
    pub key_prefix: String,
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant_id", &self.tenant_id)
            .field("tenant_name", &self.tenant_name)
            .field("scopes", &self.scopes)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl TenantContext {
    pub fn rate_limit_for(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Prep => self.rate_limit_prep,
            Scope::Check => self.rate_limit_check,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    tenant_id: Uuid,
    tenant_name: String,
    tenant_active: bool,
    scopes: Vec<String>,
    rate_limit_prep: i32,
    rate_limit_check: i32,
    key_prefix: String,
    expires_at: Option<DateTime<Utc>>,
}

pub fn hash_api_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn key_prefix(plaintext: &str) -> String {
    plaintext.chars().take(12).collect()
}

/// Looks up API keys by their SHA-256 hash and mints tenant contexts.
pub struct AuthGate {
    pool: PgPool,
}

impl AuthGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn authenticate(&self, api_key: &str) -> Result<TenantContext> {
        let key_hash = hash_api_key(api_key);

        let row: Option<ApiKeyRow> = sqlx::query_as(
            r#"
            SELECT
                t.id AS tenant_id,
                t.name AS tenant_name,
                t.active AS tenant_active,
                k.scopes AS scopes,
                k.rate_limit_prep,
                k.rate_limit_check,
                k.key_prefix,
                k.expires_at
            FROM api_keys k
            JOIN tenants t ON t.id = k.tenant_id
            WHERE k.key_hash = $1 AND k.active = true AND t.active = true
            "#,
        )
        .bind(&key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Database(e.to_string()))?;

        let row = row.ok_or(CoreError::InvalidApiKey)?;

        if !row.tenant_active {
            return Err(CoreError::TenantInactive);
        }

        if let Some(expires_at) = row.expires_at {
            if expires_at < Utc::now() {
                return Err(CoreError::ApiKeyExpired);
            }
        }

        let scopes = row.scopes.iter().filter_map(|s| Scope::parse(s)).collect();

        Ok(TenantContext {
            tenant_id: row.tenant_id,
            tenant_name: row.tenant_name,
            scopes,
            rate_limit_prep: row.rate_limit_prep.max(0) as u32,
            rate_limit_check: row.rate_limit_check.max(0) as u32,
            key_prefix: row.key_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_never_plaintext() {
        let hash = hash_api_key("cs_live_abcdef0123456789abcdef0123456789");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, "cs_live_abcdef0123456789abcdef0123456789");
    }

    #[test]
    fn key_prefix_takes_first_twelve_chars() {
        assert_eq!(key_prefix("cs_live_abcdef0123456789abcdef0123456789"), "cs_live_abcd");
    }
}
