//! Restart Guard
//!
//! Two limits on connect attempts:
//!
//! - a minimum interval between consecutive attempts, and
//! - a rolling window in which at most `cap` attempts may start. The first
//!   attempt that would exceed the cap is refused as a flood, and the caller
//!   stops reconnecting until the guard is cleared.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Guard limits.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Minimum time between two attempts.
    pub min_interval: Duration,
    /// Rolling window length.
    pub window: Duration,
    /// Maximum attempts allowed to start within `window`.
    pub cap: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1250),
            window: Duration::from_secs(60),
            cap: 8,
        }
    }
}

/// Verdict for a prospective connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    /// Attempt recorded; go ahead.
    Proceed,
    /// Too close to the previous attempt.
    TooSoon {
        /// Time until the minimum interval has passed.
        retry_in: Duration,
    },
    /// The window already holds `cap` attempts.
    Flooded {
        /// Attempts currently in the window.
        attempts: usize,
    },
}

/// Tracks recent connect attempts.
#[derive(Debug)]
pub struct RestartGuard {
    config: GuardConfig,
    attempts: VecDeque<Instant>,
}

impl RestartGuard {
    /// Create an empty guard.
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self {
            attempts: VecDeque::with_capacity(config.cap + 1),
            config,
        }
    }

    /// Time left until the minimum interval since the last attempt has
    /// passed, or `None` if an attempt may start at `now`.
    #[must_use]
    pub fn cooldown(&self, now: Instant) -> Option<Duration> {
        let since = now.saturating_duration_since(*self.attempts.back()?);
        (since < self.config.min_interval).then(|| self.config.min_interval - since)
    }

    /// Decide whether an attempt may start at `now`, recording it if so.
    pub fn check(&mut self, now: Instant) -> AttemptDecision {
        if let Some(retry_in) = self.cooldown(now) {
            return AttemptDecision::TooSoon { retry_in };
        }

        while let Some(oldest) = self.attempts.front() {
            if now.saturating_duration_since(*oldest) >= self.config.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }

        if self.attempts.len() >= self.config.cap {
            return AttemptDecision::Flooded {
                attempts: self.attempts.len(),
            };
        }

        self.attempts.push_back(now);
        AttemptDecision::Proceed
    }

    /// Attempts recorded within the window ending at `now`.
    #[must_use]
    pub fn attempts_in_window(&self, now: Instant) -> usize {
        self.attempts
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.config.window)
            .count()
    }

    /// Forget all recorded attempts.
    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn enforces_min_interval() {
        let mut guard = RestartGuard::new(GuardConfig::default());
        let start = Instant::now();

        assert_eq!(guard.check(start), AttemptDecision::Proceed);
        assert_eq!(
            guard.check(start + Duration::from_millis(1000)),
            AttemptDecision::TooSoon {
                retry_in: Duration::from_millis(250)
            }
        );
        assert_eq!(
            guard.check(start + Duration::from_millis(1250)),
            AttemptDecision::Proceed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_does_not_record() {
        let mut guard = RestartGuard::new(GuardConfig::default());
        let start = Instant::now();
        assert_eq!(guard.cooldown(start), None);

        guard.check(start);
        assert_eq!(
            guard.cooldown(start + Duration::from_millis(250)),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(guard.cooldown(start + Duration::from_millis(1250)), None);
        assert_eq!(guard.attempts_in_window(start + Duration::from_millis(250)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ninth_attempt_within_window_is_flooded() {
        let mut guard = RestartGuard::new(GuardConfig::default());
        let start = Instant::now();

        for i in 0..8 {
            assert_eq!(
                guard.check(start + Duration::from_secs(2 * i)),
                AttemptDecision::Proceed,
                "attempt {}",
                i + 1
            );
        }
        assert_eq!(
            guard.check(start + Duration::from_secs(16)),
            AttemptDecision::Flooded { attempts: 8 }
        );
        assert_eq!(
            guard.check(start + Duration::from_secs(18)),
            AttemptDecision::Flooded { attempts: 8 }
        );
        assert_eq!(guard.attempts_in_window(start + Duration::from_secs(18)), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn window_rolls_forward() {
        let mut guard = RestartGuard::new(GuardConfig::default());
        let start = Instant::now();

        for i in 0..8 {
            guard.check(start + Duration::from_secs(2 * i));
        }
        // The first attempt leaves the window at t=60s.
        assert_eq!(
            guard.check(start + Duration::from_secs(60)),
            AttemptDecision::Proceed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_forgets_attempts() {
        let mut guard = RestartGuard::new(GuardConfig::default());
        let start = Instant::now();
        for i in 0..8 {
            guard.check(start + Duration::from_secs(2 * i));
        }

        guard.clear();

        assert_eq!(guard.attempts_in_window(start + Duration::from_secs(16)), 0);
        assert_eq!(
            guard.check(start + Duration::from_secs(16)),
            AttemptDecision::Proceed
        );
    }
}
