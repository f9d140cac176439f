//! Batch Poller
//!
//! Keeps every symbol's quote warm through the REST endpoint without
//! tripping provider limits, then lags behind to enrich profile metadata.
//!
//! # Pacing
//!
//! ```text
//! batch 1: s1 ─item─ s2 ─item─ s3 ─item─ s4 ─item─ s5
//!                                                     ─batch─
//! batch 2: s6 ─item─ s7
//!                       ─batch─
//! profiles: priority group (short delay) → background (long delay)
//!                       ─cycle─ → repeat
//! ```
//!
//! Quotes for the whole universe always finish before any profile is
//! touched. Every write first checks that its run is still current.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::metadata::{MetadataCache, RefreshOutcome};
use super::run::RunContext;
use crate::application::ports::{FetchError, MarketDataApi};
use crate::domain::price_state::{ApplyOutcome, PriceStateStore};
use crate::domain::streaming::{Observation, ObservationSource, Symbol, SymbolUniverse};
use crate::infrastructure::metrics;

/// Poller pacing.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Symbols per batch.
    pub batch_size: usize,
    /// Delay between symbols within a batch.
    pub item_delay: Duration,
    /// Delay between batches.
    pub batch_delay: Duration,
    /// Leading symbols whose profiles are fetched first.
    pub priority_count: usize,
    /// Delay after each priority profile fetch.
    pub priority_profile_delay: Duration,
    /// Delay after each background profile fetch.
    pub background_profile_delay: Duration,
    /// Pause between full cycles.
    pub cycle_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            item_delay: Duration::from_millis(220),
            batch_delay: Duration::from_millis(950),
            priority_count: 12,
            priority_profile_delay: Duration::from_millis(250),
            background_profile_delay: Duration::from_millis(1200),
            cycle_delay: Duration::from_millis(950),
        }
    }
}

/// Totals for one quote sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Quotes fetched successfully.
    pub fetched: usize,
    /// Observations that changed a price.
    pub changed: usize,
    /// Fetches that failed (no update this cycle).
    pub failed: usize,
    /// Failures the provider answered with a 4xx other than 429.
    pub client_errors: usize,
}

/// Walks the symbol universe refreshing quotes and profiles.
pub struct BatchPoller {
    universe: SymbolUniverse,
    api: Arc<dyn MarketDataApi>,
    prices: Arc<PriceStateStore>,
    metadata: Arc<MetadataCache>,
    config: PollerConfig,
}

impl std::fmt::Debug for BatchPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPoller")
            .field("symbols", &self.universe.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchPoller {
    /// Create a poller.
    #[must_use]
    pub fn new(
        universe: SymbolUniverse,
        api: Arc<dyn MarketDataApi>,
        prices: Arc<PriceStateStore>,
        metadata: Arc<MetadataCache>,
        config: PollerConfig,
    ) -> Self {
        Self {
            universe,
            api,
            prices,
            metadata,
            config,
        }
    }

    /// Poll forever until the run is cancelled or superseded.
    pub async fn run(&self, ctx: RunContext) {
        tracing::info!(
            run_id = ctx.id(),
            symbols = self.universe.len(),
            batch_size = self.config.batch_size,
            "Batch poller started"
        );

        let mut cycle: u64 = 0;
        while ctx.is_current() {
            cycle += 1;
            let started = Instant::now();
            let summary = self.refresh_quotes(&ctx).await;
            metrics::record_poll_sweep(started.elapsed());
            tracing::debug!(
                run_id = ctx.id(),
                cycle,
                fetched = summary.fetched,
                changed = summary.changed,
                failed = summary.failed,
                "Quote sweep complete"
            );

            if !ctx.is_current() {
                break;
            }
            self.refresh_profiles(&ctx).await;

            if !ctx.sleep(self.config.cycle_delay).await {
                break;
            }
        }

        tracing::info!(run_id = ctx.id(), cycles = cycle, "Batch poller stopped");
    }

    /// Refresh quotes for the entire universe once.
    pub async fn refresh_quotes(&self, ctx: &RunContext) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let mut batches = self.universe.batches(self.config.batch_size).peekable();

        while let Some(batch) = batches.next() {
            for (index, symbol) in batch.iter().enumerate() {
                if !ctx.is_current() {
                    return summary;
                }

                self.refresh_quote(ctx, symbol, &mut summary).await;

                if index + 1 < batch.len() && !ctx.sleep(self.config.item_delay).await {
                    return summary;
                }
            }

            if batches.peek().is_some() && !ctx.sleep(self.config.batch_delay).await {
                return summary;
            }
        }

        summary
    }

    async fn refresh_quote(&self, ctx: &RunContext, symbol: &Symbol, summary: &mut SweepSummary) {
        let quote = match self.api.quote(symbol).await {
            Ok(quote) => quote,
            Err(e) => {
                summary.failed += 1;
                if is_client_error(&e) {
                    summary.client_errors += 1;
                    // Usually a wrong endpoint or token; say so once per sweep.
                    if summary.client_errors == 1 {
                        tracing::warn!(symbol = %symbol, error = %e, "Quote endpoint rejected request");
                        return;
                    }
                }
                tracing::debug!(symbol = %symbol, error = %e, "Quote unavailable this cycle");
                return;
            }
        };
        summary.fetched += 1;

        // A superseded run's result is dropped.
        if !ctx.is_current() {
            return;
        }

        let observation = Observation::poll(
            symbol.clone(),
            quote.price,
            quote.prev_close,
            quote.observed_at(),
        );
        let outcome = self.prices.apply(&observation);
        metrics::record_observation(ObservationSource::Poll, outcome);
        match outcome {
            ApplyOutcome::Changed => summary.changed += 1,
            ApplyOutcome::Rejected => {
                tracing::debug!(symbol = %symbol, price = quote.price, "Quote price rejected");
            }
            ApplyOutcome::Unchanged | ApplyOutcome::Stale => {}
        }
    }

    /// Refresh profiles: the priority group first, then the rest.
    pub async fn refresh_profiles(&self, ctx: &RunContext) {
        let symbols = self.universe.as_slice();
        let split = self.config.priority_count.min(symbols.len());
        let (priority, background) = symbols.split_at(split);

        for (group, delay) in [
            (priority, self.config.priority_profile_delay),
            (background, self.config.background_profile_delay),
        ] {
            for symbol in group {
                if !ctx.is_current() {
                    return;
                }
                let outcome = self.metadata.refresh(symbol).await;
                if outcome.hit_network() && !ctx.sleep(delay).await {
                    return;
                }
            }
        }
    }
}

fn is_client_error(error: &FetchError) -> bool {
    matches!(error.last_error(), FetchError::Status { status, .. } if (400..500).contains(status))
}
