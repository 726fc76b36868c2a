//! Cost reporting — aggregates the LLM call ledger for
//! `GET /api/v1/reports/cost`. Read-only, tenant-scoped like every other
//! repository; the ledger's own writer ([`crate::ledger::PgLedgerSink`])
//! never reads through this path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CostReportRow {
    pub action: String,
    pub strategy: String,
    pub provider: String,
    pub model_id: String,
    pub call_count: i64,
    pub total_tokens_in: Option<i64>,
    pub total_tokens_out: Option<i64>,
    pub total_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    pub tenant_id: Uuid,
    pub since: DateTime<Utc>,
    pub rows: Vec<CostReportRow>,
    pub total_cost_usd: f64,
}

pub struct CostReportRepository {
    pool: PgPool,
    tenant_id: Uuid,
}

impl CostReportRepository {
    pub fn new(pool: PgPool, tenant_id: Uuid) -> Self {
        Self { pool, tenant_id }
    }

    pub async fn summary_since(&self, since: DateTime<Utc>) -> Result<CostReport> {
        let rows = sqlx::query_as::<_, CostReportRow>(
            r#"
            SELECT
                action,
                strategy,
                provider,
                model_id,
                COUNT(*) AS call_count,
                SUM(tokens_in) AS total_tokens_in,
                SUM(tokens_out) AS total_tokens_out,
                SUM(cost_usd) AS total_cost_usd
            FROM llm_call_ledger
            WHERE tenant_id = $1 AND created_at >= $2
            GROUP BY action, strategy, provider, model_id
            ORDER BY total_cost_usd DESC NULLS LAST
            "#,
        )
        .bind(self.tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let total_cost_usd = rows.iter().filter_map(|r| r.total_cost_usd).sum();

        Ok(CostReport { tenant_id: self.tenant_id, since, rows, total_cost_usd })
    }
}
