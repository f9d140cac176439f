//! Price State Store
//!
//! The merged "last known trade" view per symbol. Both the push channel and
//! the batch poller write through [`PriceStateStore::apply`], so consumers
//! cannot tell which source produced an update.
//!
//! # Update Rule
//!
//! Given the stored entry `E` and an observation `(price, prevClose?)`:
//!
//! 1. Reject unless `price` is finite and positive.
//! 2. Reject as stale if the observation carries an exchange time older
//!    than the newest exchange time already applied.
//! 3. `prevTick := E.price`.
//! 4. Baseline is `prevClose` (or the stored one), else `prevTick`, else none.
//! 5. `percentChange := (price - baseline) / baseline * 100`, or 0.
//! 6. Direction compares against `prevTick`, else `prevClose`, else keeps
//!    the previous direction.
//! 7. `flashKey` increments only when `price != E.price`.
//!
//! # Concurrency
//!
//! The symbol map sits behind a `RwLock` and every entry behind its own
//! `Mutex`. A writer takes the map read lock only long enough to clone the
//! entry handle, then performs the read-modify-write under that entry's
//! lock. Updates to different symbols never contend, and the map is never
//! replaced wholesale. The map write lock is taken only to insert a symbol
//! seen for the first time.
//!
//! # Ordering
//!
//! Exchange time and local receipt time come from different clocks, so they
//! are never compared. Each entry remembers the newest exchange time it has
//! applied; only an observation that carries its own exchange time can be
//! judged stale against it. Receipt-stamped observations always apply.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::streaming::{Direction, Observation, ObservationSource, Symbol, SymbolUniverse, TradeInfo};

/// Capacity of the change-notification channel.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Result of applying an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Accepted and the price changed (flash key incremented).
    Changed,
    /// Accepted but the price was identical to the stored one.
    Unchanged,
    /// Older than the stored observation; discarded.
    Stale,
    /// Price was not a finite positive number; discarded.
    Rejected,
}

impl ApplyOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
            Self::Stale => "stale",
            Self::Rejected => "rejected",
        }
    }

    /// Whether the observation was written to the store.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Changed | Self::Unchanged)
    }
}

/// Change notification published once per flash-key increment.
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    /// Updated symbol.
    pub symbol: Symbol,
    /// New state.
    pub info: TradeInfo,
    /// Source of the observation.
    pub source: ObservationSource,
}

/// Stored state for one symbol plus the ordering watermark.
#[derive(Debug, Default)]
struct Slot {
    info: TradeInfo,
    exchange_time: Option<DateTime<Utc>>,
}

type SlotHandle = Arc<Mutex<Slot>>;

/// Concurrent per-symbol price state.
pub struct PriceStateStore {
    entries: RwLock<HashMap<Symbol, SlotHandle>>,
    updates: broadcast::Sender<PriceUpdate>,
}

impl Default for PriceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PriceStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceStateStore")
            .field("symbols", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl PriceStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Create a store with a neutral placeholder for every symbol, so
    /// consumers never observe a missing entry for a known symbol.
    #[must_use]
    pub fn seeded(universe: &SymbolUniverse) -> Self {
        let store = Self::new();
        {
            let mut entries = store.entries.write();
            for symbol in universe {
                entries
                    .entry(symbol.clone())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(Slot {
                            info: TradeInfo::placeholder(),
                            exchange_time: None,
                        }))
                    });
            }
        }
        store
    }

    /// Apply an observation, stamping it with the current time when the
    /// source gave none.
    pub fn apply(&self, observation: &Observation) -> ApplyOutcome {
        self.apply_at(observation, Utc::now())
    }

    /// Apply an observation using `now` as the receipt time.
    pub fn apply_at(&self, observation: &Observation, now: DateTime<Utc>) -> ApplyOutcome {
        if !is_valid_price(observation.price) {
            return ApplyOutcome::Rejected;
        }

        let observed_at = observation.timestamp.unwrap_or(now);
        let entry = self.entry(&observation.symbol);

        let updated = {
            let mut slot = entry.lock();
            if let (Some(exchange_time), Some(held)) = (observation.timestamp, slot.exchange_time) {
                if exchange_time < held {
                    return ApplyOutcome::Stale;
                }
            }

            let next = next_state(
                &slot.info,
                observation.price,
                observation.prev_close,
                observed_at,
            );
            let changed = next.flash_key != slot.info.flash_key;
            slot.info = next;
            if observation.timestamp.is_some() {
                slot.exchange_time = observation.timestamp;
            }
            changed.then(|| slot.info.clone())
        };

        match updated {
            Some(info) => {
                // No receivers is fine; the store is the source of truth.
                let _ = self.updates.send(PriceUpdate {
                    symbol: observation.symbol.clone(),
                    info,
                    source: observation.source,
                });
                ApplyOutcome::Changed
            }
            None => ApplyOutcome::Unchanged,
        }
    }

    /// Current state for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<TradeInfo> {
        let entry = self.entries.read().get(symbol).cloned()?;
        let info = entry.lock().info.clone();
        Some(info)
    }

    /// Consistent-per-entry copy of every symbol's state.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Symbol, TradeInfo> {
        let handles: Vec<(Symbol, SlotHandle)> = self
            .entries
            .read()
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), Arc::clone(entry)))
            .collect();

        handles
            .into_iter()
            .map(|(symbol, entry)| {
                let info = entry.lock().info.clone();
                (symbol, info)
            })
            .collect()
    }

    /// Subscribe to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.updates.subscribe()
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no symbols are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of symbols with at least one accepted observation.
    #[must_use]
    pub fn priced_count(&self) -> usize {
        self.snapshot().values().filter(|info| info.is_priced()).count()
    }

    fn entry(&self, symbol: &Symbol) -> SlotHandle {
        if let Some(entry) = self.entries.read().get(symbol) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(symbol.clone()).or_default())
    }
}

/// Whether a price is usable: finite and strictly positive.
#[must_use]
pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// Compute the next state for an entry. `price` must already be valid.
#[must_use]
pub fn next_state(
    current: &TradeInfo,
    price: f64,
    prev_close: Option<f64>,
    timestamp: DateTime<Utc>,
) -> TradeInfo {
    let prev_tick = current.price.filter(|p| is_valid_price(*p));
    let prev_close = prev_close
        .filter(|p| is_valid_price(*p))
        .or_else(|| current.prev_close.filter(|p| is_valid_price(*p)));

    let percent_change = prev_close
        .or(prev_tick)
        .map_or(0.0, |baseline| percent_change(price, baseline));

    let direction = match (prev_tick, prev_close) {
        (Some(tick), _) => Direction::between(price, tick),
        (None, Some(close)) => Direction::between(price, close),
        (None, None) => current.direction,
    };

    #[allow(clippy::float_cmp)]
    let flash_key = if current.price == Some(price) {
        current.flash_key
    } else {
        current.flash_key + 1
    };

    TradeInfo {
        price: Some(price),
        prev_close,
        prev_tick,
        percent_change,
        direction,
        timestamp: Some(timestamp),
        flash_key,
    }
}

fn percent_change(price: f64, baseline: f64) -> f64 {
    let change = (price - baseline) / baseline * 100.0;
    if change.is_finite() { change } else { 0.0 }
}
