//! Stream Codec Module
//!
//! JSON encoding and decoding for the push channel. Every inbound text
//! frame is a single JSON object tagged by `type`; unknown types decode to
//! [`FeedFrame::Other`] rather than failing.

use crate::domain::streaming::Symbol;

use super::messages::{FeedFrame, SubscribeRequest};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the push channel.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or does not match
    /// the shape declared by its `type`.
    pub fn decode(&self, text: &str) -> Result<FeedFrame, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {preview}..."
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Encode a subscribe request for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscribe(&self, symbol: &Symbol) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&SubscribeRequest::subscribe(symbol.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn decode_trade_batch() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(
                r#"{"type":"trade","data":[
                    {"s":"AAPL","p":187.1,"t":1700000000000,"v":5},
                    {"s":"MSFT","p":402.5,"t":1700000000001,"v":1}
                ]}"#,
            )
            .unwrap();

        let FeedFrame::Trade { data } = frame else {
            panic!("expected trade frame");
        };
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].symbol.as_str(), "MSFT");
    }

    #[test_case(r#"{"type":"ping"}"#, &FeedFrame::Ping ; "ping")]
    #[test_case(r#"{"type":"news","data":[]}"#, &FeedFrame::Other ; "unknown type")]
    #[test_case(r#"{"type":"trade"}"#, &FeedFrame::Trade { data: vec![] } ; "trade without data")]
    #[test_case(r#"{"type":"trade","data":null}"#, &FeedFrame::Trade { data: vec![] } ; "trade with null data")]
    fn decode_control_frames(text: &str, expected: &FeedFrame) {
        assert_eq!(&JsonCodec::new().decode(text).unwrap(), expected);
    }

    #[test]
    fn decode_error_frame() {
        let frame = JsonCodec::new()
            .decode(r#"{"type":"error","msg":"Invalid API key"}"#)
            .unwrap();
        assert_eq!(
            frame,
            FeedFrame::Error {
                msg: "Invalid API key".into()
            }
        );
    }

    #[test]
    fn decode_rejects_non_objects() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode("{oops"), Err(CodecError::Json(_))));
        assert!(codec.decode(r#"{"data":[]}"#).is_err());
    }

    #[test]
    fn encode_subscribe() {
        let json = JsonCodec::new()
            .encode_subscribe(&Symbol::new("BINANCE:BTCUSDT"))
            .unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"BINANCE:BTCUSDT"}"#);
    }
}
