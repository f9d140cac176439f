//! Silence Watchdog
//!
//! Detects a connection that is open but no longer carrying data. Any
//! inbound frame (trades, provider pings, protocol pings) counts as
//! activity. The watchdog only judges while armed, which the session does
//! for the duration of `Live`.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks the last inbound activity.
#[derive(Debug)]
pub struct SilenceWatchdog {
    threshold: Duration,
    last_activity: Option<Instant>,
}

impl SilenceWatchdog {
    /// Create a disarmed watchdog.
    #[must_use]
    pub const fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_activity: None,
        }
    }

    /// Start judging, counting `now` as activity.
    pub fn arm(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Record inbound activity. Ignored while disarmed.
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last_activity.as_mut() {
            *last = now;
        }
    }

    /// Stop judging.
    pub fn disarm(&mut self) {
        self.last_activity = None;
    }

    /// Whether the watchdog is armed.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.last_activity.is_some()
    }

    /// Time since the last activity, while armed.
    #[must_use]
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        self.last_activity
            .map(|last| now.saturating_duration_since(last))
    }

    /// Whether the silence threshold has been exceeded.
    #[must_use]
    pub fn is_silent(&self, now: Instant) -> bool {
        self.silence(now)
            .is_some_and(|silence| silence > self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn disarmed_watchdog_never_fires() {
        let watchdog = SilenceWatchdog::new(Duration::from_secs(18));
        assert!(!watchdog.is_armed());
        assert!(!watchdog.is_silent(Instant::now() + Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_threshold() {
        let mut watchdog = SilenceWatchdog::new(Duration::from_secs(18));
        let start = Instant::now();
        watchdog.arm(start);

        assert!(!watchdog.is_silent(start + Duration::from_secs(18)));
        assert!(watchdog.is_silent(start + Duration::from_millis(18_001)));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_silence() {
        let mut watchdog = SilenceWatchdog::new(Duration::from_secs(18));
        let start = Instant::now();
        watchdog.arm(start);
        watchdog.record(start + Duration::from_secs(10));

        assert!(!watchdog.is_silent(start + Duration::from_secs(25)));
        assert_eq!(
            watchdog.silence(start + Duration::from_secs(25)),
            Some(Duration::from_secs(15))
        );

        watchdog.disarm();
        watchdog.record(start + Duration::from_secs(30));
        assert!(!watchdog.is_armed());
    }
}
