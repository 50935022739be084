//! Test and paper-trading fixtures: channel-backed stream fakes and a
//! self-contained paper exchange that drives the full pipeline without a
//! venue.

use crate::account::{AccountConnection, AccountFill, AccountFrame, AccountStream};
use crate::config::{MarketId, MarketSpec};
use crate::data::{FrameKind, MarketConnection, MarketStream, RawFrame, StreamError};
use crate::execution::SimClient;
use crate::resilience::ShutdownLatch;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ── Market stream fake ──────────────────────────────────────────────────

/// Frames observed/sent through the fake, for assertions.
#[derive(Default)]
pub struct StreamLog {
    pub resubscribed: Mutex<Vec<MarketId>>,
    pub pongs: Mutex<u64>,
}

/// A market stream whose sessions are fed through channels. Each call to
/// `connect` consumes the next scripted session; when none remain, connect
/// fails (which exercises the reconnect path).
pub struct ChannelMarketStream {
    sessions: VecDeque<mpsc::UnboundedReceiver<RawFrame>>,
    log: Arc<StreamLog>,
}

impl ChannelMarketStream {
    pub fn new() -> (Self, Arc<StreamLog>) {
        let log = Arc::new(StreamLog::default());
        (
            Self {
                sessions: VecDeque::new(),
                log: log.clone(),
            },
            log,
        )
    }

    /// Queue one session; returns the sender that feeds it.
    pub fn push_session(&mut self) -> mpsc::UnboundedSender<RawFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.push_back(rx);
        tx
    }
}

#[async_trait]
impl MarketStream for ChannelMarketStream {
    async fn connect(
        &mut self,
        _subscriptions: &[MarketId],
    ) -> Result<Box<dyn MarketConnection>, StreamError> {
        match self.sessions.pop_front() {
            Some(rx) => Ok(Box::new(ChannelMarketConnection {
                rx,
                log: self.log.clone(),
            })),
            None => Err(StreamError::Connect("no scripted session".to_string())),
        }
    }
}

struct ChannelMarketConnection {
    rx: mpsc::UnboundedReceiver<RawFrame>,
    log: Arc<StreamLog>,
}

#[async_trait]
impl MarketConnection for ChannelMarketConnection {
    async fn next_frame(&mut self) -> Option<RawFrame> {
        self.rx.recv().await
    }

    async fn send_pong(&mut self) -> Result<(), StreamError> {
        *self.log.pongs.lock() += 1;
        Ok(())
    }

    async fn resubscribe(&mut self, market: &MarketId) -> Result<(), StreamError> {
        self.log.resubscribed.lock().push(market.clone());
        Ok(())
    }
}

/// Build a mid-update frame the way a live transport would.
pub fn mid_frame(market: &MarketId, best_bid: Decimal, best_ask: Decimal) -> RawFrame {
    RawFrame::mid_update(
        market,
        json!({
            "market": market.as_str(),
            "best_bid": best_bid,
            "best_ask": best_ask,
            "ts": Utc::now(),
        }),
    )
}

/// A frame whose payload will not parse as a mid update.
pub fn garbled_frame(market: &MarketId) -> RawFrame {
    RawFrame {
        channel: market.as_str().to_string(),
        kind: FrameKind::MidUpdate,
        payload: json!({"best_bid": "not a number"}),
    }
}

// ── Account stream fake ─────────────────────────────────────────────────

pub struct ChannelAccountStream {
    sessions: VecDeque<mpsc::UnboundedReceiver<AccountFrame>>,
}

impl ChannelAccountStream {
    pub fn new() -> Self {
        Self {
            sessions: VecDeque::new(),
        }
    }

    pub fn push_session(&mut self) -> mpsc::UnboundedSender<AccountFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.push_back(rx);
        tx
    }
}

impl Default for ChannelAccountStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStream for ChannelAccountStream {
    async fn connect(&mut self) -> Result<Box<dyn AccountConnection>, StreamError> {
        match self.sessions.pop_front() {
            Some(rx) => Ok(Box::new(ChannelAccountConnection { rx })),
            None => Err(StreamError::Connect("no scripted session".to_string())),
        }
    }
}

struct ChannelAccountConnection {
    rx: mpsc::UnboundedReceiver<AccountFrame>,
}

#[async_trait]
impl AccountConnection for ChannelAccountConnection {
    async fn next_frame(&mut self) -> Option<AccountFrame> {
        self.rx.recv().await
    }
}

// ── Paper exchange ──────────────────────────────────────────────────────

/// Drives a random-walk market into both the market stream and the
/// simulated client, and replays the simulator's fills through the account
/// stream. With this running, the whole core operates as it would against a
/// live venue.
pub struct PaperExchange {
    client: Arc<SimClient>,
    market_tx: mpsc::UnboundedSender<RawFrame>,
    account_tx: mpsc::UnboundedSender<AccountFrame>,
    specs: Vec<MarketSpec>,
    mids: HashMap<MarketId, Decimal>,
    /// Half spread of the simulated book, in bps.
    half_spread_bps: Decimal,
    /// Random walk step bound, in bps.
    step_bps: Decimal,
}

impl PaperExchange {
    pub fn new(
        client: Arc<SimClient>,
        market_tx: mpsc::UnboundedSender<RawFrame>,
        account_tx: mpsc::UnboundedSender<AccountFrame>,
        specs: Vec<MarketSpec>,
        start_mids: HashMap<MarketId, Decimal>,
    ) -> Self {
        Self {
            client,
            market_tx,
            account_tx,
            specs,
            mids: start_mids,
            half_spread_bps: Decimal::new(5, 0),
            step_bps: Decimal::new(3, 0),
        }
    }

    pub async fn run(mut self, shutdown: ShutdownLatch, tick: Duration) {
        while !shutdown.is_tripped() {
            tokio::time::sleep(tick).await;
            self.step();
        }
    }

    /// One market tick: move every mid, publish the tops, replay fills.
    pub fn step(&mut self) {
        let bps = Decimal::from(10_000);
        for spec in &self.specs {
            let Some(mid) = self.mids.get_mut(&spec.id) else {
                continue;
            };
            let step_fraction: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            let step = *mid * self.step_bps / bps
                * Decimal::try_from(step_fraction).unwrap_or(Decimal::ZERO);
            *mid += step;

            let half = *mid * self.half_spread_bps / bps;
            let best_bid = spec.round_price_down(*mid - half);
            let best_ask = spec.round_price_up(*mid + half);

            self.client.set_top(&spec.id, best_bid, best_ask);
            let _ = self
                .market_tx
                .send(mid_frame(&spec.id, best_bid, best_ask));
        }

        for fill in self.client.take_fills() {
            let frame = AccountFrame::Fill(AccountFill {
                market: fill.market,
                side: fill.side,
                role: fill.role,
                size: fill.size,
                price: fill.price,
                fee: fill.fee,
                ts: Utc::now(),
                order_id: fill.order_id,
                fill_sequence: fill.fill_sequence,
            });
            let _ = self.account_tx.send(frame);
        }
    }
}
