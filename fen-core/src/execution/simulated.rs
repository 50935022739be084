//! Simulated exchange for paper trading and integration tests.
//!
//! Orders rest in an internal book and fill when the simulated top of book
//! crosses their price: a resting bid fills once the best ask trades at or
//! below it, a resting ask once the best bid trades at or above it.
//! Non-post-only orders that cross on arrival fill immediately at their
//! limit. Fills accumulate until drained by the driver, which replays them
//! through the account stream like a real venue would.

use super::client::TradingClient;
use super::types::{CancelOutcome, OrderId, OrderRequest, Role, Side, SubmitError};
use crate::config::MarketId;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A fill produced by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFill {
    pub order_id: OrderId,
    pub fill_sequence: u64,
    pub market: MarketId,
    pub side: Side,
    pub role: Role,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone)]
struct RestingOrder {
    id: OrderId,
    request: OrderRequest,
}

#[derive(Default)]
struct SimInner {
    tops: HashMap<MarketId, (Decimal, Decimal)>,
    resting: Vec<RestingOrder>,
    fills: Vec<SimFill>,
}

pub struct SimClient {
    inner: Mutex<SimInner>,
    next_order: AtomicU64,
    next_fill: AtomicU64,
    maker_fee_bps: Decimal,
    taker_fee_bps: Decimal,
    /// When set, submits fail with this error (for failure-path tests).
    fail_submits_with: Mutex<Option<SubmitError>>,
}

impl SimClient {
    pub fn new() -> Self {
        // Venue-typical schedule: small maker fee, larger taker fee.
        Self::with_fees(dec!(0.2), dec!(2))
    }

    pub fn with_fees(maker_fee_bps: Decimal, taker_fee_bps: Decimal) -> Self {
        Self {
            inner: Mutex::new(SimInner::default()),
            next_order: AtomicU64::new(1),
            next_fill: AtomicU64::new(1),
            maker_fee_bps,
            taker_fee_bps,
            fail_submits_with: Mutex::new(None),
        }
    }

    /// Update the top of book and match resting orders against it.
    pub fn set_top(&self, market: &MarketId, best_bid: Decimal, best_ask: Decimal) {
        let mut inner = self.inner.lock();
        inner.tops.insert(market.clone(), (best_bid, best_ask));

        let mut still_resting = Vec::with_capacity(inner.resting.len());
        let mut matched = Vec::new();
        for order in inner.resting.drain(..) {
            let crossed = order.request.market == *market
                && match order.request.side {
                    Side::Bid => best_ask <= order.request.price,
                    Side::Ask => best_bid >= order.request.price,
                };
            if crossed {
                matched.push(order);
            } else {
                still_resting.push(order);
            }
        }
        inner.resting = still_resting;

        for order in matched {
            let fill = self.make_fill(&order, self.maker_fee_bps);
            inner.fills.push(fill);
        }
    }

    /// Drain accumulated fills in match order.
    pub fn take_fills(&self) -> Vec<SimFill> {
        std::mem::take(&mut self.inner.lock().fills)
    }

    pub fn resting_count(&self, market: &MarketId) -> usize {
        self.inner
            .lock()
            .resting
            .iter()
            .filter(|o| &o.request.market == market)
            .count()
    }

    /// Arrange for subsequent submits to fail.
    pub fn fail_submits_with(&self, error: Option<SubmitError>) {
        *self.fail_submits_with.lock() = error;
    }

    fn make_fill(&self, order: &RestingOrder, fee_bps: Decimal) -> SimFill {
        let notional = order.request.price * order.request.size;
        SimFill {
            order_id: order.id.clone(),
            fill_sequence: self.next_fill.fetch_add(1, Ordering::Relaxed),
            market: order.request.market.clone(),
            side: order.request.side,
            role: order.request.role,
            price: order.request.price,
            size: order.request.size,
            fee: notional * fee_bps / Decimal::from(10_000),
        }
    }
}

impl Default for SimClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradingClient for SimClient {
    async fn submit_limit(&self, request: OrderRequest) -> Result<OrderId, SubmitError> {
        if let Some(error) = self.fail_submits_with.lock().clone() {
            return Err(error);
        }

        let id = OrderId::new(format!("sim-{}", self.next_order.fetch_add(1, Ordering::Relaxed)));
        let mut inner = self.inner.lock();

        let crossing = inner
            .tops
            .get(&request.market)
            .map(|(bid, ask)| match request.side {
                Side::Bid => request.price >= *ask,
                Side::Ask => request.price <= *bid,
            })
            .unwrap_or(false);

        if crossing && request.post_only {
            return Err(SubmitError::Crossed);
        }

        let order = RestingOrder {
            id: id.clone(),
            request,
        };
        if crossing {
            let fill = self.make_fill(&order, self.taker_fee_bps);
            inner.fills.push(fill);
        } else {
            inner.resting.push(order);
        }
        Ok(id)
    }

    async fn cancel(&self, order_id: &OrderId) -> Result<CancelOutcome, SubmitError> {
        let mut inner = self.inner.lock();
        let before = inner.resting.len();
        inner.resting.retain(|o| &o.id != order_id);
        if inner.resting.len() < before {
            Ok(CancelOutcome::Acked)
        } else {
            Ok(CancelOutcome::NotFound)
        }
    }

    async fn cancel_all(&self, market: &MarketId) -> Result<usize, SubmitError> {
        let mut inner = self.inner.lock();
        let before = inner.resting.len();
        inner.resting.retain(|o| &o.request.market != market);
        Ok(before - inner.resting.len())
    }
}
