//! Push Channel Message Types
//!
//! Wire format of the provider's WebSocket stream.
//!
//! # Outbound
//!
//! ```json
//! {"type":"subscribe","symbol":"AAPL"}
//! ```
//!
//! # Inbound
//!
//! ```json
//! {"type":"trade","data":[{"s":"AAPL","p":187.12,"t":1700000000123,"v":100}]}
//! {"type":"ping"}
//! {"type":"error","msg":"Invalid API key"}
//! ```
//!
//! Records inside a trade batch are decoded one by one. A malformed record
//! is skipped without losing the rest of its batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::streaming::{Observation, Symbol};

// =============================================================================
// Outbound
// =============================================================================

/// Per-symbol subscription control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Message type, always `subscribe`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Target symbol.
    pub symbol: Symbol,
}

impl SubscribeRequest {
    /// Subscribe to trades for `symbol`.
    #[must_use]
    pub fn subscribe(symbol: Symbol) -> Self {
        Self {
            kind: "subscribe".to_string(),
            symbol,
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A single pushed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Symbol.
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: Symbol,
    /// Trade price.
    #[serde(rename = "p", alias = "price")]
    pub price: f64,
    /// Exchange time in Unix milliseconds.
    #[serde(rename = "t", alias = "timestamp", default)]
    pub timestamp_ms: Option<i64>,
    /// Trade volume.
    #[serde(rename = "v", alias = "volume", default)]
    pub volume: Option<f64>,
}

impl TradeRecord {
    /// Exchange time, if present and representable.
    #[must_use]
    pub fn traded_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms
            .filter(|ms| *ms > 0)
            .and_then(DateTime::from_timestamp_millis)
    }

    /// Convert into a push-sourced observation.
    #[must_use]
    pub fn to_observation(&self) -> Observation {
        Observation::push(self.symbol.clone(), self.price, self.traded_at())
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedFrame {
    /// Batch of trades.
    Trade {
        /// Trades in arrival order.
        #[serde(default, deserialize_with = "lenient_records")]
        data: Vec<TradeRecord>,
    },
    /// Provider keep-alive.
    Ping,
    /// Provider error control frame (for example an unauthorized token).
    Error {
        /// Provider message.
        #[serde(default)]
        msg: String,
    },
    /// Any other frame type.
    #[serde(other)]
    Other,
}

fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<TradeRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<TradeRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed trade record");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_serialization() {
        let json = serde_json::to_string(&SubscribeRequest::subscribe(Symbol::new("AAPL"))).unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"AAPL"}"#);
    }

    #[test]
    fn trade_record_to_observation() {
        let record: TradeRecord =
            serde_json::from_str(r#"{"s":"AAPL","p":187.12,"t":1700000000123,"v":100}"#).unwrap();
        let observation = record.to_observation();

        assert_eq!(observation.symbol.as_str(), "AAPL");
        assert!((observation.price - 187.12).abs() < f64::EPSILON);
        assert_eq!(
            observation.timestamp.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_123)
        );
    }

    #[test]
    fn malformed_record_keeps_rest_of_batch() {
        let frame: FeedFrame = serde_json::from_str(
            r#"{"type":"trade","data":[
                {"s":"AAPL","p":"n/a","t":1700000000000},
                {"p":12.0},
                {"s":"MSFT","p":402.5,"t":1700000000001}
            ]}"#,
        )
        .unwrap();

        let FeedFrame::Trade { data } = frame else {
            panic!("expected trade frame");
        };
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].symbol.as_str(), "MSFT");
    }

    #[test]
    fn trade_record_accepts_long_names() {
        let record: TradeRecord =
            serde_json::from_str(r#"{"symbol":"BTC","price":50000.5,"timestamp":0}"#).unwrap();
        assert_eq!(record.symbol.as_str(), "BTC");
        assert!(record.traded_at().is_none());
    }
}
