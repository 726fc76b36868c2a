//! Retry backoff for provider dispatch (§4.3). The router drives the retry
//! loop itself — against a specific model, up to `max_attempts` — and only
//! needs a delay calculation from this module.

use rand::Rng;
use std::time::Duration;

/// Strategy for calculating retry delays.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    Fixed(Duration),
    /// `delay = initial_delay * multiplier^(attempt-1)`, capped at `max_delay`.
    Exponential {
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl BackoffStrategy {
    pub fn calculate_delay(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let base_delay = match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial_delay, multiplier, max_delay } => {
                let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(attempt as i32 - 1);
                let delay = Duration::from_millis(delay_ms as u64);
                std::cmp::min(delay, *max_delay)
            }
        };

        if jitter_factor > 0.0 {
            let jitter_ms = (base_delay.as_millis() as f64 * jitter_factor) as u64;
            let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
            base_delay + Duration::from_millis(jitter)
        } else {
            base_delay
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub jitter_factor: f64,
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            jitter_factor: 0.1,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(200),
                multiplier: 2.0,
                max_delay: Duration::from_secs(5),
            },
        }
    }
}

impl RetryConfig {
    /// No delay, one attempt per model — used in tests to keep them fast.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            jitter_factor: 0.0,
            backoff: BackoffStrategy::Fixed(Duration::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(strategy.calculate_delay(1, 0.0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(2, 0.0), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(3, 0.0), Duration::from_millis(400));
        assert_eq!(strategy.calculate_delay(10, 0.0), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_only_adds_delay() {
        let strategy = BackoffStrategy::Fixed(Duration::from_millis(100));
        let delay = strategy.calculate_delay(1, 0.1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(110));
    }
}
