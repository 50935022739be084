use crate::config::MarketId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Book side of an order or fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Signed direction: bids add to inventory, asks remove.
    pub fn sign(self) -> Decimal {
        match self {
            Side::Bid => Decimal::ONE,
            Side::Ask => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// Logical producer of an order; used for accounting and per-role mutual
/// exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Maker,
    Hedger,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Maker => write!(f, "maker"),
            Role::Hedger => write!(f, "hedger"),
        }
    }
}

/// A resting order as the StateStore tracks it: created on ack, shrunk by
/// partial fills, removed on terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub market: MarketId,
    pub side: Side,
    pub price: Decimal,
    pub size_remaining: Decimal,
    pub role: Role,
    pub submit_ts: SystemTime,
}

/// An order the core wants on the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub market: MarketId,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub post_only: bool,
    pub role: Role,
}

impl OrderRequest {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Classified submit failure. The transport maps raw exchange responses into
/// these kinds so the core can react deterministically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("order below exchange minimum notional")]
    MinNotional,
    #[error("order would cross the book")]
    Crossed,
    #[error("nonce collision")]
    Nonce,
    #[error("rate limited by exchange")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Network(String),
    #[error("exchange rejection: {0}")]
    Other(String),
}

impl SubmitError {
    /// Transient failures are retried with backoff; permanent ones are
    /// surfaced and the order is not re-sent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SubmitError::Nonce
                | SubmitError::RateLimited
                | SubmitError::Timeout
                | SubmitError::Network(_)
        )
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Acked,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_signs() {
        assert_eq!(Side::Bid.sign(), dec!(1));
        assert_eq!(Side::Ask.sign(), dec!(-1));
        assert_eq!(Side::Bid.opposite(), Side::Ask);
    }

    #[test]
    fn submit_error_classification() {
        assert!(SubmitError::Timeout.is_transient());
        assert!(SubmitError::RateLimited.is_transient());
        assert!(SubmitError::Nonce.is_transient());
        assert!(SubmitError::Network("reset".into()).is_transient());
        assert!(!SubmitError::MinNotional.is_transient());
        assert!(!SubmitError::Crossed.is_transient());
        assert!(!SubmitError::Other("margin".into()).is_transient());
    }

    #[test]
    fn request_notional() {
        let req = OrderRequest {
            market: MarketId::from("market:2"),
            side: Side::Ask,
            price: dec!(142.97),
            size: dec!(0.0735),
            post_only: true,
            role: Role::Hedger,
        };
        assert_eq!(req.notional(), dec!(10.508295));
    }

    #[test]
    fn side_serde_roundtrip() {
        let json = serde_json::to_string(&Side::Bid).unwrap();
        assert_eq!(json, "\"bid\"");
        let side: Side = serde_json::from_str("\"ask\"").unwrap();
        assert_eq!(side, Side::Ask);
    }
}
