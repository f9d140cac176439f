//! Market Data Streaming Types
//!
//! Core domain types for the price feed: symbols and the symbol universe,
//! the per-symbol `TradeInfo` record, observations produced by the push
//! channel and the poller, and the connection status surfaced to consumers.
//! These types are transport-agnostic.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbols
// =============================================================================

/// An opaque instrument identifier (stock ticker or crypto asset id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from any string-like value.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The ordered, duplicate-free set of symbols known at startup.
///
/// Read-only after construction; clones share the same backing slice.
#[derive(Debug, Clone, Default)]
pub struct SymbolUniverse {
    symbols: Arc<[Symbol]>,
}

impl SymbolUniverse {
    /// Build a universe, trimming whitespace and dropping empty entries and
    /// duplicates while preserving first-seen order.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let mut seen = HashSet::new();
        let symbols: Vec<Symbol> = symbols
            .into_iter()
            .map(Into::into)
            .map(|s: Symbol| Symbol::new(s.as_str().trim()))
            .filter(|s| !s.as_str().is_empty())
            .filter(|s| seen.insert(s.clone()))
            .collect();

        Self {
            symbols: symbols.into(),
        }
    }

    /// Parse a comma-separated symbol list.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// All symbols in universe order.
    #[must_use]
    pub fn as_slice(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the universe is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Whether the universe contains a symbol.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s.as_str() == symbol)
    }

    /// Iterate over symbols in universe order.
    pub fn iter(&self) -> std::slice::Iter<'_, Symbol> {
        self.symbols.iter()
    }

    /// Fixed-size batches in universe order. A zero size is treated as one.
    pub fn batches(&self, size: usize) -> std::slice::Chunks<'_, Symbol> {
        self.symbols.chunks(size.max(1))
    }
}

impl<'a> IntoIterator for &'a SymbolUniverse {
    type Item = &'a Symbol;
    type IntoIter = std::slice::Iter<'a, Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Trade State
// =============================================================================

/// Short-term price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Price moved up.
    Up,
    /// Price moved down.
    Down,
    /// No movement, or nothing to compare against yet.
    #[default]
    Flat,
}

impl Direction {
    /// Compare a price against a baseline.
    #[must_use]
    pub fn between(price: f64, baseline: f64) -> Self {
        if price > baseline {
            Self::Up
        } else if price < baseline {
            Self::Down
        } else {
            Self::Flat
        }
    }
}

/// The authoritative "current price" record for one symbol.
///
/// A freshly seeded entry has no price, `Flat` direction and a zero flash key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeInfo {
    /// Last known trade or quote price; `None` until the first observation.
    pub price: Option<f64>,
    /// Prior session close, when known.
    pub prev_close: Option<f64>,
    /// Previous observed price from any source.
    pub prev_tick: Option<f64>,
    /// Percent change against the best available baseline.
    pub percent_change: f64,
    /// Tick-over-tick (or daily) direction.
    pub direction: Direction,
    /// Observation time (exchange time when provided, else receipt time).
    pub timestamp: Option<DateTime<Utc>>,
    /// Incremented exactly once per accepted price change.
    pub flash_key: u64,
}

impl TradeInfo {
    /// Neutral placeholder used to seed the store at startup.
    #[must_use]
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// Whether at least one observation has been accepted.
    #[must_use]
    pub const fn is_priced(&self) -> bool {
        self.price.is_some()
    }
}

// =============================================================================
// Observations
// =============================================================================

/// Which data source produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    /// Push channel (WebSocket trade).
    Push,
    /// Batch poller (REST quote).
    Poll,
}

impl ObservationSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

/// A single price observation (a tick) from either source.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Observed symbol.
    pub symbol: Symbol,
    /// Observed price.
    pub price: f64,
    /// Prior session close, when the source provides one.
    pub prev_close: Option<f64>,
    /// Exchange-provided observation time, if any.
    pub timestamp: Option<DateTime<Utc>>,
    /// Producing source.
    pub source: ObservationSource,
}

impl Observation {
    /// Observation from a pushed trade record.
    #[must_use]
    pub const fn push(symbol: Symbol, price: f64, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            symbol,
            price,
            prev_close: None,
            timestamp,
            source: ObservationSource::Push,
        }
    }

    /// Observation from a polled quote.
    #[must_use]
    pub const fn poll(
        symbol: Symbol,
        price: f64,
        prev_close: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            symbol,
            price,
            prev_close,
            timestamp,
            source: ObservationSource::Poll,
        }
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// Push-channel status as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// Connecting or waiting to reconnect.
    #[default]
    Connecting,
    /// Connected and receiving data.
    Live,
    /// Auto-reconnect suspended after a restart flood.
    Error,
    /// Session hard stop fired; manual restart required.
    HardStopped,
}

impl ConnectionStatus {
    /// Wire/log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Error => "error",
            Self::HardStopped => "hardStopped",
        }
    }

    /// Numeric encoding for the connection-state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Connecting => 0.0,
            Self::Live => 1.0,
            Self::Error => 2.0,
            Self::HardStopped => 3.0,
        }
    }
}

/// Status plus an optional consumer-facing notice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Current status.
    pub status: ConnectionStatus,
    /// Notice for the degraded and terminal tiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl StatusReport {
    /// Report without a notice.
    #[must_use]
    pub const fn plain(status: ConnectionStatus) -> Self {
        Self {
            status,
            notice: None,
        }
    }

    /// Report carrying a notice.
    #[must_use]
    pub fn with_notice(status: ConnectionStatus, notice: impl Into<String>) -> Self {
        Self {
            status,
            notice: Some(notice.into()),
        }
    }
}
