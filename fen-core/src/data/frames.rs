//! Market stream frames.
//!
//! The transport delivers loosely-typed frames: a channel, a kind tag, and a
//! JSON payload. The ingestor owns payload parsing so that malformed frames
//! are counted and recovered from here rather than inside the transport.

use crate::config::MarketId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// Frame kind tag as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    MidUpdate,
    Ping,
    Pong,
    SubscriptionAck,
    Error,
}

/// A raw inbound frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Channel key; mid-update channels are keyed by market.
    pub channel: String,
    pub kind: FrameKind,
    pub payload: Value,
}

impl RawFrame {
    pub fn mid_update(market: &MarketId, payload: Value) -> Self {
        Self {
            channel: market.as_str().to_string(),
            kind: FrameKind::MidUpdate,
            payload,
        }
    }

    pub fn ping() -> Self {
        Self {
            channel: String::new(),
            kind: FrameKind::Ping,
            payload: Value::Null,
        }
    }
}

/// Parsed top-of-book update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MidUpdate {
    pub market: MarketId,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub ts: DateTime<Utc>,
}

impl MidUpdate {
    /// Arithmetic mid of the top of book.
    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }

    /// A usable update has positive prices and an uncrossed top.
    pub fn is_valid(&self) -> bool {
        self.best_bid > Decimal::ZERO && self.best_ask > self.best_bid
    }
}

/// Errors raised while decoding a frame payload.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("payload did not decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("book top is crossed or non-positive")]
    InvalidBook,
}

/// Decode and validate a mid-update payload.
pub fn parse_mid_update(payload: &Value) -> Result<MidUpdate, ParseError> {
    let update: MidUpdate = serde_json::from_value(payload.clone())?;
    if !update.is_valid() {
        return Err(ParseError::InvalidBook);
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_and_computes_mid() {
        let payload = json!({
            "market": "market:2",
            "best_bid": "142.99",
            "best_ask": "143.01",
            "ts": "2023-11-14T22:13:20Z",
        });
        let update = parse_mid_update(&payload).unwrap();
        assert_eq!(update.market, MarketId::from("market:2"));
        assert_eq!(update.mid(), dec!(143.00));
    }

    #[test]
    fn rejects_crossed_top() {
        let payload = json!({
            "market": "market:2",
            "best_bid": "143.02",
            "best_ask": "143.01",
            "ts": "2023-11-14T22:13:20Z",
        });
        assert!(matches!(
            parse_mid_update(&payload),
            Err(ParseError::InvalidBook)
        ));
    }

    #[test]
    fn rejects_garbage() {
        let payload = json!({"best_bid": "not a number"});
        assert!(matches!(
            parse_mid_update(&payload),
            Err(ParseError::Decode(_))
        ));
    }
}
