//! Call Ledger (§4.4) — persists one row per terminal per-model attempt using
//! its own pool connection, isolated from whatever business transaction the
//! request is running in, so a rollback there can never take the ledger row
//! with it. Write failures are swallowed with a structured log entry that
//! still carries the business error, if any, so the call is never silently
//! lost from the logs even when the ledger itself is down.

use crate::providers::LlmResponse;
use crate::router::LedgerSink;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

pub struct PgLedgerSink {
    pool: PgPool,
    tenant_id: Option<Uuid>,
}

impl PgLedgerSink {
    /// `tenant_id` is `None` for system-originated calls (background
    /// maintenance); every tenant-scoped router call threads its caller's
    /// tenant through here instead.
    pub fn new(pool: PgPool, tenant_id: Option<Uuid>) -> Self {
        Self { pool, tenant_id }
    }
}

#[async_trait]
impl LedgerSink for PgLedgerSink {
    async fn record(&self, response: &LlmResponse, success: bool, error_message: Option<String>) {
        let result = sqlx::query(
            r#"
            INSERT INTO llm_call_ledger
                (tenant_id, action, strategy, provider, model_id, tokens_in, tokens_out,
                 latency_ms, cost_usd, success, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(self.tenant_id)
        .bind(&response.action)
        .bind(&response.strategy)
        .bind(&response.provider)
        .bind(&response.model_id)
        .bind(response.tokens_in.map(|v| v as i64))
        .bind(response.tokens_out.map(|v| v as i64))
        .bind(response.latency_ms as i64)
        .bind(response.cost_usd)
        .bind(success)
        .bind(&error_message)
        .bind(response.finished_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            error!(
                tenant_id = ?self.tenant_id,
                action = %response.action,
                model_id = %response.model_id,
                success,
                business_error = ?error_message,
                ledger_error = %e,
                "ledger write failed; business call unaffected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `PgLedgerSink` holds its own pool handle rather than borrowing the
    /// request's transaction — a compile-time check that the type doesn't
    /// accidentally pick up a `Transaction<'_, Postgres>` lifetime.
    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn sink_is_send_sync() {
        _assert_send_sync::<PgLedgerSink>();
    }
}
