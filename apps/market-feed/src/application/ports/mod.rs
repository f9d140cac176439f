//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataApi`: Quote and company-profile endpoints
//! - `CacheStore`: Durable namespaced key-value store for cached profiles
//!
//! ## Driver Ports (Inbound)
//!
//! - `StreamCommand`: Commands accepted by the streaming connection

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::streaming::Symbol;

// =============================================================================
// Market Data
// =============================================================================

/// A polled quote.
///
/// Accepts both the camelCase contract shape (`price`, `prevClose`,
/// `timestamp`) and the provider's short keys (`c`, `pc`, `t`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSnapshot {
    /// Current price.
    #[serde(alias = "c")]
    pub price: f64,
    /// Previous session close.
    #[serde(default, alias = "pc")]
    pub prev_close: Option<f64>,
    /// Quote time in Unix seconds, when the provider reports one.
    #[serde(default, alias = "t")]
    pub timestamp: Option<i64>,
}

impl QuoteSnapshot {
    /// Provider-reported quote time. Zero and out-of-range values are
    /// treated as absent.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .filter(|secs| *secs > 0)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Company profile metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Provider-supplied logo image.
    #[serde(default, alias = "logo")]
    pub logo_url: Option<String>,
    /// Company website, used to derive a favicon.
    #[serde(default, alias = "weburl")]
    pub website_url: Option<String>,
}

/// Errors from a single logical fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Provider answered HTTP 429.
    #[error("rate limited")]
    RateLimited {
        /// `Retry-After` in seconds, when the provider sent one.
        retry_after_secs: Option<u64>,
    },

    /// Provider answered with an error status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// Connection-level failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Every attempt failed; carries the last attempt's error.
    #[error("gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Label used in metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Status { .. } => "status",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::MaxRetriesExceeded { last, .. } => last.reason(),
        }
    }

    /// The underlying per-attempt error.
    #[must_use]
    pub fn last_error(&self) -> &Self {
        match self {
            Self::MaxRetriesExceeded { last, .. } => last.last_error(),
            other => other,
        }
    }
}

/// Quote and profile endpoints.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Fetch the latest quote for a symbol.
    async fn quote(&self, symbol: &Symbol) -> Result<QuoteSnapshot, FetchError>;

    /// Fetch company profile metadata for a symbol.
    async fn profile(&self, symbol: &Symbol) -> Result<CompanyProfile, FetchError>;
}

// =============================================================================
// Durable Cache
// =============================================================================

/// Errors from the durable cache store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Namespaced key-value store that survives process restarts.
///
/// Implementations must not block the async runtime on disk access.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    async fn get(&self, namespace: &str, key: &str)
    -> Result<Option<serde_json::Value>, StoreError>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;
}

// =============================================================================
// Commands
// =============================================================================

/// Commands accepted by the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    /// Reset counters, flags and timers and begin a new session.
    ManualRestart,
}
