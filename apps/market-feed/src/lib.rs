#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss
    )
)]

//! Market Feed - Real-Time Quote Streaming Client
//!
//! Keeps a live, per-symbol view of market prices for a fixed symbol
//! universe by combining a WebSocket push channel of trade updates with a
//! paced REST poller, plus a TTL cache of company profiles.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and price-state rules
//!   - `streaming`: Symbols, observations, trade info and connection status
//!   - `price_state`: The shared per-symbol price store
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: REST and durable cache interfaces
//!   - `services`: Batch poller, metadata cache, run registry, feed facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: Rate-limited fetcher and REST adapter
//!   - `stream`: Push channel state machine and WebSocket client
//!   - `persistence`: Durable profile cache
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! WebSocket trades ──► StreamClient ──┐
//!                                     ├──► PriceStateStore ──► snapshot / updates
//! REST quotes ──► BatchPoller ────────┘
//!                     │
//!                     └──► MetadataCache ──► memory + JSON file
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and price-state rules.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::price_state::{ApplyOutcome, PriceStateStore, PriceUpdate};
pub use domain::streaming::{
    ConnectionStatus, Direction, Observation, ObservationSource, StatusReport, Symbol,
    SymbolUniverse, TradeInfo,
};

// Application services
pub use application::services::{
    BatchPoller, FeedSnapshot, MarketFeed, MetadataCache, PollerConfig, Resolution,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Push channel
pub use infrastructure::stream::{StreamClient, StreamClientConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
