//! Account stream: authoritative fills and position snapshots.

pub mod router;

pub use router::{AccountRouter, ReconcileStats};

use crate::config::MarketId;
use crate::data::StreamError;
use crate::execution::{OrderId, Role, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Exchange-reported position snapshot. Used to reconcile the store and to
/// log authoritative PnL alongside the internally computed numbers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PositionUpdate {
    pub market: MarketId,
    pub signed_size: Decimal,
    pub avg_entry: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub ts: DateTime<Utc>,
}

/// Exchange-reported fill. Delivery is at-least-once; `(order_id,
/// fill_sequence)` dedupes replays.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountFill {
    pub market: MarketId,
    pub side: Side,
    pub role: Role,
    pub size: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub ts: DateTime<Utc>,
    pub order_id: OrderId,
    pub fill_sequence: u64,
}

impl AccountFill {
    /// Signed quote-currency flow including the fee: buys pay, sells
    /// receive.
    pub fn quote_delta(&self) -> Decimal {
        let notional = self.price * self.size;
        match self.side {
            Side::Bid => -notional - self.fee,
            Side::Ask => notional - self.fee,
        }
    }
}

/// Inbound account frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFrame {
    Position(PositionUpdate),
    Fill(AccountFill),
    Balance { currency: String, total: Decimal },
}

#[async_trait]
pub trait AccountStream: Send {
    async fn connect(&mut self) -> Result<Box<dyn AccountConnection>, StreamError>;
}

#[async_trait]
pub trait AccountConnection: Send {
    /// Next account frame; None means the connection is gone.
    async fn next_frame(&mut self) -> Option<AccountFrame>;
}
