//! Market Feed Facade
//!
//! The outbound contract to consumers: a read-only snapshot of per-symbol
//! price state and cached profiles, the push-channel status, change
//! notifications, and the single `manual_restart` action.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::metadata::{MetadataCache, ProfileView, Resolution};
use super::poller::BatchPoller;
use super::run::RunRegistry;
use crate::application::ports::StreamCommand;
use crate::domain::price_state::{PriceStateStore, PriceUpdate};
use crate::domain::streaming::{ConnectionStatus, StatusReport, Symbol, SymbolUniverse, TradeInfo};

/// Errors surfaced by feed actions.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The streaming connection task is no longer running.
    #[error("streaming connection is not running")]
    StreamClosed,
}

/// Point-in-time view of everything the feed knows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    /// Push-channel status.
    pub status: ConnectionStatus,
    /// Degraded or terminal notice, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Per-symbol price state.
    pub prices: BTreeMap<Symbol, TradeInfo>,
    /// Cached profiles and logos.
    pub profiles: BTreeMap<Symbol, ProfileView>,
}

/// Shared handles wired by the binary.
pub struct MarketFeed {
    universe: SymbolUniverse,
    prices: Arc<PriceStateStore>,
    metadata: Arc<MetadataCache>,
    poller: Arc<BatchPoller>,
    runs: RunRegistry,
    status: watch::Receiver<StatusReport>,
    commands: mpsc::Sender<StreamCommand>,
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeed")
            .field("symbols", &self.universe.len())
            .field("status", &self.status.borrow().status)
            .field("run_id", &self.runs.current_id())
            .finish_non_exhaustive()
    }
}

impl MarketFeed {
    /// Assemble the feed. Poller runs are children of `shutdown`.
    #[must_use]
    pub fn new(
        universe: SymbolUniverse,
        prices: Arc<PriceStateStore>,
        metadata: Arc<MetadataCache>,
        poller: Arc<BatchPoller>,
        shutdown: CancellationToken,
        status: watch::Receiver<StatusReport>,
        commands: mpsc::Sender<StreamCommand>,
    ) -> Self {
        Self {
            universe,
            prices,
            metadata,
            poller,
            runs: RunRegistry::new(shutdown),
            status,
            commands,
        }
    }

    /// The symbol universe.
    #[must_use]
    pub const fn universe(&self) -> &SymbolUniverse {
        &self.universe
    }

    /// The shared price store.
    #[must_use]
    pub const fn prices(&self) -> &Arc<PriceStateStore> {
        &self.prices
    }

    /// Current status and notice.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn status_updates(&self) -> watch::Receiver<StatusReport> {
        self.status.clone()
    }

    /// Subscribe to price change notifications.
    #[must_use]
    pub fn price_updates(&self) -> broadcast::Receiver<PriceUpdate> {
        self.prices.subscribe()
    }

    /// Snapshot of prices, profiles and status.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        let StatusReport { status, notice } = self.status();
        FeedSnapshot {
            status,
            notice,
            prices: self.prices.snapshot(),
            profiles: self.metadata.snapshot(),
        }
    }

    /// Resolve a symbol's profile, starting a fetch on a miss. Symbols
    /// outside the universe are not looked up.
    #[must_use]
    pub fn resolve_profile(&self, symbol: &str) -> Option<Resolution> {
        let symbol = self.universe.iter().find(|s| s.as_str() == symbol)?;
        Some(self.metadata.resolve(symbol))
    }

    /// Begin a new poller run, superseding any previous one.
    /// Returns the new run id.
    pub fn start_polling(&self) -> u64 {
        let ctx = self.runs.begin();
        let id = ctx.id();
        let poller = Arc::clone(&self.poller);
        tokio::spawn(async move { poller.run(ctx).await });
        id
    }

    /// Stop the active poller run.
    pub fn stop_polling(&self) {
        self.runs.stop();
    }

    /// Reset the streaming session and resync through a fresh poller run.
    ///
    /// A restart already queued is not duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::StreamClosed`] if the streaming task has exited.
    pub fn manual_restart(&self) -> Result<u64, FeedError> {
        match self.commands.try_send(StreamCommand::ManualRestart) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(FeedError::StreamClosed),
        }
        let run_id = self.start_polling();
        tracing::info!(run_id, "Manual restart requested");
        Ok(run_id)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{CompanyProfile, FetchError, MarketDataApi, QuoteSnapshot};
    use crate::application::services::metadata::MetadataConfig;
    use crate::application::services::poller::PollerConfig;
    use crate::domain::streaming::Observation;
    use crate::infrastructure::persistence::InMemoryCacheStore;

    struct StaticApi;

    #[async_trait]
    impl MarketDataApi for StaticApi {
        async fn quote(&self, _symbol: &Symbol) -> Result<QuoteSnapshot, FetchError> {
            Ok(QuoteSnapshot {
                price: 10.0,
                prev_close: None,
                timestamp: None,
            })
        }

        async fn profile(&self, _symbol: &Symbol) -> Result<CompanyProfile, FetchError> {
            Ok(CompanyProfile::default())
        }
    }

    fn feed() -> (
        MarketFeed,
        watch::Sender<StatusReport>,
        mpsc::Receiver<StreamCommand>,
    ) {
        let universe = SymbolUniverse::new(["AAPL", "MSFT"]);
        let api: Arc<dyn MarketDataApi> = Arc::new(StaticApi);
        let prices = Arc::new(PriceStateStore::seeded(&universe));
        let metadata = Arc::new(MetadataCache::new(
            Arc::clone(&api),
            Arc::new(InMemoryCacheStore::new()),
            MetadataConfig::default(),
        ));
        let poller = Arc::new(BatchPoller::new(
            universe.clone(),
            api,
            Arc::clone(&prices),
            Arc::clone(&metadata),
            PollerConfig::default(),
        ));
        let (status_tx, status_rx) = watch::channel(StatusReport::default());
        let (command_tx, command_rx) = mpsc::channel(1);
        let feed = MarketFeed::new(
            universe,
            prices,
            metadata,
            poller,
            CancellationToken::new(),
            status_rx,
            command_tx,
        );
        (feed, status_tx, command_rx)
    }

    #[tokio::test]
    async fn snapshot_contains_seeded_symbols_and_status() {
        let (feed, status_tx, _commands) = feed();
        status_tx
            .send(StatusReport::with_notice(
                ConnectionStatus::HardStopped,
                "Session ended",
            ))
            .unwrap();
        feed.prices()
            .apply(&Observation::push(Symbol::new("AAPL"), 187.0, None));

        let snapshot = feed.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::HardStopped);
        assert_eq!(snapshot.prices.len(), 2);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "hardStopped");
        assert_eq!(json["notice"], "Session ended");
        assert_eq!(json["prices"]["AAPL"]["flashKey"], 1);
        assert!(json["prices"]["MSFT"]["price"].is_null());
    }

    #[tokio::test]
    async fn manual_restart_sends_command_and_begins_new_run() {
        let (feed, _status, mut commands) = feed();
        let first = feed.start_polling();

        let second = feed.manual_restart().unwrap();
        assert!(second > first);
        assert_eq!(commands.recv().await, Some(StreamCommand::ManualRestart));

        // Queue full: a pending restart is not duplicated.
        feed.manual_restart().unwrap();
        feed.manual_restart().unwrap();
        assert_eq!(commands.recv().await, Some(StreamCommand::ManualRestart));
        assert!(commands.try_recv().is_err());
        feed.stop_polling();
    }

    #[tokio::test]
    async fn manual_restart_fails_when_stream_closed() {
        let (feed, _status, commands) = feed();
        drop(commands);
        assert!(matches!(feed.manual_restart(), Err(FeedError::StreamClosed)));
    }

    #[tokio::test]
    async fn resolve_profile_ignores_unknown_symbols() {
        let (feed, _status, _commands) = feed();
        assert!(feed.resolve_profile("GOOG").is_none());
        assert_eq!(feed.resolve_profile("AAPL"), Some(Resolution::Pending));
    }
}
