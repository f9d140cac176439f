//! Prometheus Metrics Module
//!
//! Exposes feed metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Observations**: Ticks applied to the price store, by source and outcome
//! - **Fetches**: REST retries and exhausted fetches
//! - **Connection**: Reconnect attempts, current state, inbound frames
//! - **Metadata**: Profile lookups by where they were answered
//! - **Polling**: Duration of full quote sweeps
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::price_state::ApplyOutcome;
use crate::domain::streaming::{ConnectionStatus, ObservationSource};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Price store
    describe_counter!(
        "market_feed_observations_total",
        "Observations offered to the price store, by source and outcome"
    );

    // REST fetches
    describe_counter!(
        "market_feed_fetch_retries_total",
        "REST fetch retries by reason"
    );
    describe_counter!(
        "market_feed_fetch_failures_total",
        "REST fetches that failed after all attempts"
    );

    // Push channel
    describe_counter!(
        "market_feed_reconnects_total",
        "Push channel connect attempts after the first"
    );
    describe_gauge!(
        "market_feed_connection_state",
        "Push channel status (0 connecting, 1 live, 2 error, 3 hard stopped)"
    );
    describe_counter!(
        "market_feed_frames_received_total",
        "Frames received on the push channel by kind"
    );

    // Metadata
    describe_counter!(
        "market_feed_profile_lookups_total",
        "Profile lookups by result"
    );

    // Polling
    describe_histogram!(
        "market_feed_poll_sweep_seconds",
        "Time to refresh quotes for the whole symbol universe"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Where a profile lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// In-memory map hit.
    Memory,
    /// Durable store hit within TTL.
    Store,
    /// Network fetch succeeded.
    Fetched,
    /// A fetch for the symbol was already in flight.
    InFlight,
    /// Network fetch failed.
    Failed,
}

impl LookupResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Store => "store",
            Self::Fetched => "fetched",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
        }
    }
}

/// Kinds of inbound push-channel frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Batch of trade records.
    Trade,
    /// Provider keep-alive.
    Ping,
    /// Provider error control frame.
    Error,
    /// Anything else (including undecodable frames).
    Other,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Ping => "ping",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

/// Record an observation offered to the price store.
pub fn record_observation(source: ObservationSource, outcome: ApplyOutcome) {
    counter!(
        "market_feed_observations_total",
        "source" => source.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a REST fetch retry.
pub fn record_fetch_retry(reason: &'static str) {
    counter!("market_feed_fetch_retries_total", "reason" => reason).increment(1);
}

/// Record a REST fetch that gave up.
pub fn record_fetch_failure() {
    counter!("market_feed_fetch_failures_total").increment(1);
}

/// Record a push channel reconnect attempt.
pub fn record_reconnect() {
    counter!("market_feed_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(status: ConnectionStatus) {
    gauge!("market_feed_connection_state").set(status.as_gauge());
}

/// Record an inbound push-channel frame.
pub fn record_frame(kind: FrameKind) {
    counter!("market_feed_frames_received_total", "kind" => kind.as_str()).increment(1);
}

/// Record a profile lookup.
pub fn record_profile_lookup(result: LookupResult) {
    counter!("market_feed_profile_lookups_total", "result" => result.as_str()).increment(1);
}

/// Record the duration of one full quote sweep.
pub fn record_poll_sweep(duration: Duration) {
    histogram!("market_feed_poll_sweep_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
