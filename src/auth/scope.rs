//! Scope guard: picks the first required scope (in guard-declared order)
//! that the tenant actually holds, then consults the rate limiter with
//! `(tenant_id, matched_scope)`.

use super::TenantContext;
use crate::error::{CoreError, Result};
use crate::ratelimit::RateLimiter;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Prep,
    Check,
}

impl Scope {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "prep" => Some(Self::Prep),
            "check" => Some(Self::Check),
            _ => None,
        }
    }
}

/// Declares the scopes accepted by an endpoint, in priority order.
pub struct ScopeGuard {
    required: Vec<Scope>,
}

impl ScopeGuard {
    pub fn new(required: Vec<Scope>) -> Self {
        Self { required }
    }

    /// First required scope (in declared order) that the tenant holds.
    fn matching_scope(&self, tenant: &TenantContext) -> Result<Scope> {
        self.required
            .iter()
            .find(|scope| tenant.scopes.contains(scope))
            .copied()
            .ok_or(CoreError::ScopeForbidden)
    }

    /// Picks the matching scope, then admits or rejects against the rate
    /// limiter using that scope's configured limit.
    pub async fn admit(&self, tenant: &TenantContext, limiter: &RateLimiter) -> Result<Scope> {
        let scope = self.matching_scope(tenant)?;
        let limit = tenant.rate_limit_for(scope);
        let key = (tenant.tenant_id, scope);

        let (allowed, retry_after) = limiter.check(key, limit, Duration::from_secs(60)).await;
        if !allowed {
            return Err(CoreError::RateLimitExceeded { retry_after: Duration::from_secs(retry_after) });
        }

        Ok(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tenant_with(scopes: Vec<Scope>) -> TenantContext {
        TenantContext {
            tenant_id: Uuid::new_v4(),
            tenant_name: "acme".to_string(),
            scopes,
            rate_limit_prep: 10,
            rate_limit_check: 100,
            key_prefix: "cs_live_abcd".to_string(),
        }
    }

    #[tokio::test]
    async fn picks_first_matching_scope_in_guard_order() {
        let guard = ScopeGuard::new(vec![Scope::Prep, Scope::Check]);
        let tenant = tenant_with(vec![Scope::Check, Scope::Prep]);
        let limiter = RateLimiter::new();

        let scope = guard.admit(&tenant, &limiter).await.unwrap();
        assert_eq!(scope, Scope::Prep);
    }

    #[tokio::test]
    async fn no_matching_scope_is_forbidden() {
        let guard = ScopeGuard::new(vec![Scope::Prep]);
        let tenant = tenant_with(vec![Scope::Check]);
        let limiter = RateLimiter::new();

        let err = guard.admit(&tenant, &limiter).await.unwrap_err();
        assert!(matches!(err, CoreError::ScopeForbidden));
    }
}
