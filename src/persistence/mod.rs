//! Tenant-scoped Persistence (§4.10). Every repository is constructed with a
//! pool and an optional tenant id; every query ANDs `tenant_id = $n` into its
//! predicate except the ledger's own repository, which accepts a `None`
//! tenant for system-originated calls. `get_by_id` for a foreign tenant
//! returns "not found," never "forbidden," so existence is never leaked
//! across tenants.

pub mod api_keys;
pub mod cost;
pub mod courses;
pub mod materials;
pub mod tenants;

pub use api_keys::ApiKeyRepository;
pub use cost::CostReportRepository;
pub use courses::CourseRepository;
pub use materials::MaterialRepository;
pub use tenants::TenantRepository;

use crate::config::PostgresSettings;
use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Opens the shared connection pool used by the business-request path.
/// The ledger opens its own pool (see [`crate::ledger::PgLedgerSink`]) so a
/// rolled-back business transaction never drags the ledger row with it.
pub async fn connect_pool(settings: &PostgresSettings) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.connection_string())
        .await
        .map_err(Into::into)
}
