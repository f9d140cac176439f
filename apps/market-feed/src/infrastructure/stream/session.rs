//! Connection Session State Machine
//!
//! Owns the lifecycle of one push-channel connection as an explicit state
//! machine with a single dispatch point, [`ConnectionSession::handle`].
//! Timers are deadlines held by the session; the driver sleeps until them
//! and feeds the matching event back in. The session performs no I/O: it
//! returns [`SessionAction`]s for the driver to execute.
//!
//! # States
//!
//! ```text
//!  Idle ──Start──► Connecting ──Opened──► Live
//!                     ▲  │                 │
//!       BackoffElapsed│  │ConnectFailed    │Closed / error frame / silence
//!                     │  ▼                 ▼
//!                  Reconnecting ◄──────────┘
//!                     │
//!                     │ flood (too many attempts in window)
//!                     ▼
//!                   Error
//!
//!  any state ──HardStopElapsed──► HardStopped (terminal)
//!  any state ──ManualRestart────► Connecting (fresh session)
//! ```
//!
//! # Invariants
//!
//! - Once hard-stopped, every event except `ManualRestart` is dropped.
//! - The hard-stop deadline is set on `Start` and `ManualRestart` only.
//!   Reconnects never move it, and it fires at most once per session.
//! - A `Start` or `ManualRestart` arriving within the guard's minimum
//!   interval of the last connect attempt is dropped without touching the
//!   session.
//! - An accepted `ManualRestart` clears the guard window, the backoff
//!   counter, any pending backoff and the stopped flag, then schedules
//!   exactly one new hard-stop deadline.

use std::time::Duration;

use tokio::time::Instant;

use super::guard::{AttemptDecision, GuardConfig, RestartGuard};
use super::messages::{FeedFrame, TradeRecord};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::watchdog::SilenceWatchdog;
use crate::domain::streaming::{ConnectionStatus, StatusReport};

// =============================================================================
// Configuration
// =============================================================================

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum interval and restart-flood window.
    pub guard: GuardConfig,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Silence longer than this while live forces a reconnect.
    pub silence_threshold: Duration,
    /// Absolute session lifetime.
    pub hard_stop: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            reconnect: ReconnectConfig::default(),
            silence_threshold: Duration::from_secs(18),
            hard_stop: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// States, Events, Actions
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    Idle,
    /// Connect in progress.
    Connecting,
    /// Open and subscribed.
    Live,
    /// Waiting for the backoff deadline.
    Reconnecting,
    /// Auto-reconnect suspended after a restart flood.
    Error,
    /// Session lifetime elapsed.
    HardStopped,
}

impl SessionState {
    /// Consumer-facing status for this state.
    #[must_use]
    pub const fn status(self) -> ConnectionStatus {
        match self {
            Self::Idle | Self::Connecting | Self::Reconnecting => ConnectionStatus::Connecting,
            Self::Live => ConnectionStatus::Live,
            Self::Error => ConnectionStatus::Error,
            Self::HardStopped => ConnectionStatus::HardStopped,
        }
    }

    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::HardStopped => "hard_stopped",
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Begin the session.
    Start,
    /// The socket opened.
    Opened,
    /// A decoded text frame arrived.
    Frame(FeedFrame),
    /// Protocol-level traffic (ping, pong, binary, undecodable text).
    Activity,
    /// The connect attempt failed.
    ConnectFailed {
        /// Failure description.
        reason: String,
    },
    /// The open socket closed or errored.
    Closed {
        /// Close description.
        reason: String,
    },
    /// Periodic silence check.
    SilenceCheck,
    /// The backoff deadline passed.
    BackoffElapsed,
    /// The hard-stop deadline passed.
    HardStopElapsed,
    /// Operator asked for a fresh session.
    ManualRestart,
}

/// Effects for the driver to perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open a new socket.
    Connect {
        /// Whether this attempt follows a failure in the same session.
        reconnect: bool,
    },
    /// Subscribe every symbol on the fresh socket.
    SubscribeAll,
    /// Apply these trades to the price store.
    Deliver(Vec<TradeRecord>),
    /// Close the socket and abandon any connect in progress.
    CloseSocket,
    /// Publish a new status.
    Status(StatusReport),
}

// =============================================================================
// Session
// =============================================================================

/// The Connection Manager state machine.
#[derive(Debug)]
pub struct ConnectionSession {
    config: SessionConfig,
    has_symbols: bool,
    state: SessionState,
    guard: RestartGuard,
    reconnect: ReconnectPolicy,
    watchdog: SilenceWatchdog,
    hard_stopped: bool,
    backoff_deadline: Option<Instant>,
    hard_stop_deadline: Option<Instant>,
    generation: u64,
}

impl ConnectionSession {
    /// Create an idle session. Without symbols `Start` is ignored.
    #[must_use]
    pub fn new(config: SessionConfig, has_symbols: bool) -> Self {
        Self {
            guard: RestartGuard::new(config.guard.clone()),
            reconnect: ReconnectPolicy::new(config.reconnect.clone()),
            watchdog: SilenceWatchdog::new(config.silence_threshold),
            config,
            has_symbols,
            state: SessionState::Idle,
            hard_stopped: false,
            backoff_deadline: None,
            hard_stop_deadline: None,
            generation: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the hard stop has fired.
    #[must_use]
    pub const fn is_hard_stopped(&self) -> bool {
        self.hard_stopped
    }

    /// When the pending reconnect is due.
    #[must_use]
    pub const fn backoff_deadline(&self) -> Option<Instant> {
        self.backoff_deadline
    }

    /// When the hard stop fires.
    #[must_use]
    pub const fn hard_stop_deadline(&self) -> Option<Instant> {
        self.hard_stop_deadline
    }

    /// Sessions begun so far (1 after `Start`, +1 per manual restart).
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Connect attempts since the last successful open.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempt_count()
    }

    /// Dispatch one event.
    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> Vec<SessionAction> {
        if self.hard_stopped && event != SessionEvent::ManualRestart {
            tracing::trace!(event = ?event, "Dropping event after hard stop");
            return Vec::new();
        }

        match event {
            SessionEvent::Start => self.on_start(now),
            SessionEvent::Opened => self.on_opened(now),
            SessionEvent::Frame(frame) => self.on_frame(frame, now),
            SessionEvent::Activity => {
                if self.state == SessionState::Live {
                    self.watchdog.record(now);
                }
                Vec::new()
            }
            SessionEvent::ConnectFailed { reason } => {
                if self.state != SessionState::Connecting {
                    return Vec::new();
                }
                tracing::warn!(reason = %reason, "Push channel connect failed");
                self.schedule_reconnect(now)
            }
            SessionEvent::Closed { reason } => {
                if !matches!(self.state, SessionState::Connecting | SessionState::Live) {
                    return Vec::new();
                }
                tracing::warn!(reason = %reason, state = self.state.as_str(), "Push channel closed");
                self.schedule_reconnect(now)
            }
            SessionEvent::SilenceCheck => self.on_silence_check(now),
            SessionEvent::BackoffElapsed => {
                if self.state != SessionState::Reconnecting || self.backoff_deadline.is_none() {
                    return Vec::new();
                }
                self.backoff_deadline = None;
                self.try_connect(now, true)
            }
            SessionEvent::HardStopElapsed => self.on_hard_stop(),
            SessionEvent::ManualRestart => self.on_manual_restart(now),
        }
    }

    fn on_start(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.state != SessionState::Idle {
            return Vec::new();
        }
        if !self.has_symbols {
            tracing::warn!("Symbol universe is empty, push channel not started");
            return Vec::new();
        }

        self.generation += 1;
        self.hard_stop_deadline = Some(now + self.config.hard_stop);
        tracing::info!(
            generation = self.generation,
            hard_stop_secs = self.config.hard_stop.as_secs(),
            "Push channel session started"
        );
        self.try_connect(now, false)
    }

    fn on_opened(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.state != SessionState::Connecting {
            return vec![SessionAction::CloseSocket];
        }

        self.state = SessionState::Live;
        self.reconnect.reset();
        self.watchdog.arm(now);
        tracing::info!(generation = self.generation, "Push channel live");
        vec![
            SessionAction::SubscribeAll,
            SessionAction::Status(StatusReport::plain(ConnectionStatus::Live)),
        ]
    }

    fn on_frame(&mut self, frame: FeedFrame, now: Instant) -> Vec<SessionAction> {
        if self.state != SessionState::Live {
            return Vec::new();
        }
        self.watchdog.record(now);

        match frame {
            FeedFrame::Trade { data } if !data.is_empty() => vec![SessionAction::Deliver(data)],
            FeedFrame::Error { msg } => {
                tracing::warn!(msg = %msg, "Provider error frame, reconnecting");
                let mut actions = vec![SessionAction::CloseSocket];
                actions.extend(self.schedule_reconnect(now));
                actions
            }
            FeedFrame::Trade { .. } | FeedFrame::Ping | FeedFrame::Other => Vec::new(),
        }
    }

    fn on_silence_check(&mut self, now: Instant) -> Vec<SessionAction> {
        if self.state != SessionState::Live || !self.watchdog.is_silent(now) {
            return Vec::new();
        }

        tracing::warn!(
            silence_ms = self
                .watchdog
                .silence(now)
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            "Push channel silent, forcing reconnect"
        );
        let mut actions = vec![SessionAction::CloseSocket];
        actions.extend(self.schedule_reconnect(now));
        actions
    }

    fn on_hard_stop(&mut self) -> Vec<SessionAction> {
        if self.hard_stop_deadline.take().is_none() {
            return Vec::new();
        }

        self.hard_stopped = true;
        self.backoff_deadline = None;
        self.watchdog.disarm();
        self.state = SessionState::HardStopped;

        let minutes = self.config.hard_stop.as_secs().div_ceil(60);
        let notice = format!(
            "Live updates stopped after {minutes} minute{}. Restart to resume.",
            if minutes == 1 { "" } else { "s" }
        );
        tracing::error!(generation = self.generation, notice = %notice, "Push channel hard stop");
        vec![
            SessionAction::CloseSocket,
            SessionAction::Status(StatusReport::with_notice(
                ConnectionStatus::HardStopped,
                notice,
            )),
        ]
    }

    fn on_manual_restart(&mut self, now: Instant) -> Vec<SessionAction> {
        if let Some(retry_in) = self.guard.cooldown(now) {
            tracing::debug!(
                retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                "Manual restart inside guard interval dropped"
            );
            return Vec::new();
        }

        let mut actions = Vec::new();
        if matches!(self.state, SessionState::Connecting | SessionState::Live) {
            actions.push(SessionAction::CloseSocket);
        }

        self.hard_stopped = false;
        self.guard.clear();
        self.reconnect.reset();
        self.backoff_deadline = None;
        self.watchdog.disarm();
        self.state = SessionState::Idle;
        self.hard_stop_deadline = None;

        tracing::info!("Manual restart, resetting push channel session");
        if !self.has_symbols {
            return actions;
        }

        self.generation += 1;
        self.hard_stop_deadline = Some(now + self.config.hard_stop);
        actions.extend(self.try_connect(now, false));
        actions
    }

    fn schedule_reconnect(&mut self, now: Instant) -> Vec<SessionAction> {
        let was_live = self.state == SessionState::Live;
        self.watchdog.disarm();
        self.state = SessionState::Reconnecting;

        let delay = self.reconnect.next_delay();
        self.backoff_deadline = Some(now + delay);
        tracing::info!(
            attempt = self.reconnect.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );

        if was_live {
            vec![SessionAction::Status(StatusReport::plain(
                ConnectionStatus::Connecting,
            ))]
        } else {
            Vec::new()
        }
    }

    fn try_connect(&mut self, now: Instant, reconnect: bool) -> Vec<SessionAction> {
        match self.guard.check(now) {
            AttemptDecision::Proceed => {
                self.state = SessionState::Connecting;
                vec![
                    SessionAction::Connect { reconnect },
                    SessionAction::Status(StatusReport::plain(ConnectionStatus::Connecting)),
                ]
            }
            AttemptDecision::TooSoon { retry_in } if reconnect => {
                // Hold the reconnect until the guard interval has passed.
                self.state = SessionState::Reconnecting;
                self.backoff_deadline = Some(now + retry_in);
                Vec::new()
            }
            AttemptDecision::TooSoon { retry_in } => {
                tracing::debug!(
                    retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                    "Connect request inside guard interval dropped"
                );
                Vec::new()
            }
            AttemptDecision::Flooded { attempts } => {
                self.state = SessionState::Error;
                self.backoff_deadline = None;
                tracing::error!(
                    attempts,
                    window_secs = self.config.guard.window.as_secs(),
                    "Restart flood, auto-reconnect suspended"
                );
                vec![SessionAction::Status(StatusReport::with_notice(
                    ConnectionStatus::Error,
                    "Disconnected after repeated reconnects. Restart to retry.",
                ))]
            }
        }
    }
}
