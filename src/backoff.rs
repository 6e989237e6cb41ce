//! Retry-delay jitter for cascade rescheduling (spec.md §4.3).
//!
//! Cascade retries use a flat `RetryDelay`, not exponential backoff; jitter
//! exists only to avoid many series retrying in lockstep.

use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Apply configured jitter to the base retry delay.
///
/// Uniformly distributed between 0% and 100% of `delay`, so the effective
/// delay falls between `delay` and `2 * delay`. A disabled `jitter` setting
/// returns `delay` unchanged.
pub fn jittered_delay(config: &RetryConfig) -> Duration {
    if !config.jitter {
        return config.retry_delay;
    }
    add_jitter(config.retry_delay)
}

fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

/// Compute the `scheduled_at` timestamp for a cascade retry: `now + RetryDelay`
/// (jittered per configuration).
pub fn next_scheduled_at(config: &RetryConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let delay = jittered_delay(config);
    now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_disabled_returns_unchanged_delay() {
        let config = RetryConfig {
            retry_delay: Duration::from_secs(60),
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(jittered_delay(&config), Duration::from_secs(60));
    }

    #[test]
    fn jitter_enabled_stays_within_one_to_two_times_base() {
        let config = RetryConfig {
            retry_delay: Duration::from_secs(60),
            jitter: true,
            ..RetryConfig::default()
        };
        for _ in 0..100 {
            let delay = jittered_delay(&config);
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(120));
        }
    }

    #[test]
    fn next_scheduled_at_is_after_now() {
        let config = RetryConfig {
            retry_delay: Duration::from_secs(60),
            jitter: false,
            ..RetryConfig::default()
        };
        let now = Utc::now();
        let scheduled = next_scheduled_at(&config, now);
        assert!(scheduled > now);
    }
}
