//! Reconnection Policy
//!
//! Exponential backoff for push-channel reconnects: the delay before
//! attempt `n` (0-based) is `min(max_delay, base_delay * 2^n)`, optionally
//! randomized by a jitter fraction. The attempt counter resets when the
//! connection goes live.

use std::time::Duration;

use rand::Rng;

/// Reconnect backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Random spread as a fraction of the delay; 0 disables it.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1200),
            max_delay: Duration::from_secs(15),
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Build a configuration.
    #[must_use]
    pub const fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor,
        }
    }
}

/// Tracks consecutive failures and hands out backoff delays.
///
/// # Example
///
/// ```rust
/// use market_feed::infrastructure::stream::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Duration::from_millis(1200));
/// assert_eq!(policy.next_delay(), Duration::from_millis(2400));
///
/// // Connection went live
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Start at attempt zero.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt; advances the counter.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let delay = backoff_delay(self.config.base_delay, self.config.max_delay, self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.jittered(delay).min(self.config.max_delay)
    }

    /// Back to the base delay once the connection is live.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Scale `delay` by a random factor in `1 ± jitter_factor`.
    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.config.jitter_factor.clamp(0.0, 1.0);
        if spread <= 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor).max(Duration::from_millis(1))
    }
}

/// `min(cap, base * 2^attempt)`, saturating.
#[must_use]
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |d| d.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_schedule() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(1200));
        assert_eq!(config.max_delay, Duration::from_secs(15));
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn delays_double_until_capped() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let delays: Vec<u128> = (0..6).map(|_| policy.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1200, 2400, 4800, 9600, 15000, 15000]);
        assert_eq!(policy.attempt_count(), 6);
    }

    #[test]
    fn reset_returns_to_base_delay() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..3 {
            let _ = policy.next_delay();
        }
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(1200));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let config = ReconnectConfig::new(Duration::from_millis(1000), Duration::from_secs(10), 0.1);
        for _ in 0..100 {
            let millis = ReconnectPolicy::new(config.clone()).next_delay().as_millis();
            assert!((899..=1101).contains(&millis), "{millis}ms outside 1000ms ± 10%");
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::new(
            Duration::from_secs(10),
            Duration::from_secs(10),
            0.5,
        ));
        for _ in 0..50 {
            assert!(policy.next_delay() <= Duration::from_secs(10));
        }
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        assert_eq!(
            backoff_delay(Duration::from_millis(1200), Duration::from_secs(15), 200),
            Duration::from_secs(15)
        );
    }
}
