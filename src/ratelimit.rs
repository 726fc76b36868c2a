//! Rate Limiter (§4.9) — single-process sliding window. State is a
//! `tokio::sync::Mutex`-guarded map from key to the monotonic timestamps of
//! admitted requests still inside the window.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::Scope;

pub type RateLimitKey = (Uuid, Scope);

#[derive(Default)]
struct Windows<K: Eq + Hash> {
    timestamps: HashMap<K, Vec<Instant>>,
}

pub struct RateLimiter {
    state: Mutex<Windows<RateLimitKey>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { state: Mutex::new(Windows { timestamps: HashMap::new() }) }
    }

    /// Returns `(allowed, retry_after_seconds)`. `retry_after_seconds` is
    /// meaningful only when `allowed` is `false`.
    pub async fn check(&self, key: RateLimitKey, limit: u32, window: Duration) -> (bool, u64) {
        let now = Instant::now();
        let cutoff = now.checked_sub(window).unwrap_or(now);

        let mut state = self.state.lock().await;
        let entry = state.timestamps.entry(key).or_default();
        entry.retain(|ts| *ts > cutoff);

        if entry.len() as u32 >= limit {
            let oldest = entry[0];
            let retry_after = oldest.checked_duration_since(cutoff).unwrap_or(Duration::ZERO);
            let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return (false, retry_after_secs);
        }

        entry.push(now);
        (true, 0)
    }

    /// Drops keys with no timestamps left in their window. Intended to be
    /// driven by a periodic background task so memory doesn't grow
    /// unboundedly with one-shot callers.
    pub async fn evict_empty(&self, window: Duration) {
        let now = Instant::now();
        let cutoff = now.checked_sub(window).unwrap_or(now);

        let mut state = self.state.lock().await;
        state.timestamps.retain(|_, timestamps| {
            timestamps.retain(|ts| *ts > cutoff);
            !timestamps.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RateLimitKey {
        (Uuid::new_v4(), Scope::Prep)
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::new();
        let key = key();
        let window = Duration::from_secs(60);

        for _ in 0..2 {
            let (allowed, _) = limiter.check(key, 2, window).await;
            assert!(allowed);
        }

        let (allowed, retry_after) = limiter.check(key, 2, window).await;
        assert!(!allowed);
        assert!(retry_after > 0);
    }

    #[tokio::test]
    async fn never_allows_more_than_limit_within_a_window() {
        let limiter = RateLimiter::new();
        let key = key();
        let window = Duration::from_millis(200);

        let mut admitted = 0;
        for _ in 0..10 {
            let (allowed, _) = limiter.check(key, 3, window).await;
            if allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[tokio::test]
    async fn eviction_drops_keys_with_no_recent_timestamps() {
        let limiter = RateLimiter::new();
        let key = key();
        limiter.check(key, 10, Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        limiter.evict_empty(Duration::from_millis(1)).await;
        let state = limiter.state.lock().await;
        assert!(!state.timestamps.contains_key(&key));
    }
}
