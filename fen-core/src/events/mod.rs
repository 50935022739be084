//! Structured event bus.
//!
//! Every component reports through here rather than binding to a transport:
//! events carry a monotonic sequence number and a wall-clock timestamp, get
//! mirrored to `tracing`, and fan out to any number of subscribers over a
//! broadcast channel. Routing to sinks (files, webhooks, dashboards) is the
//! operator's problem, not the core's.

use crate::config::MarketId;
use crate::execution::{OrderId, Role, Side};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::info;

/// Event payloads. One variant per reportable occurrence.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    OrderSubmit {
        market: MarketId,
        side: Side,
        role: Role,
        price: Decimal,
        size: Decimal,
    },
    OrderAck {
        market: MarketId,
        order_id: OrderId,
        role: Role,
    },
    OrderReject {
        market: MarketId,
        side: Side,
        role: Role,
        reason: String,
    },
    Fill {
        market: MarketId,
        side: Side,
        role: Role,
        price: Decimal,
        size: Decimal,
        inventory_after: Decimal,
    },
    GuardBlock {
        market: MarketId,
        side: Side,
        role: Role,
        reason: String,
    },
    GuardLatch {
        reason: String,
    },
    GuardReset,
    HedgerStateChange {
        market: MarketId,
        from: String,
        to: String,
    },
    MakerCycle {
        market: MarketId,
        quoted_bid: bool,
        quoted_ask: bool,
    },
    ReconcileSnap {
        market: MarketId,
        local: Decimal,
        exchange: Decimal,
    },
    IngestorReconnect {
        attempt: u32,
    },
    IngestorStalled {
        outage_secs: u64,
    },
    LedgerDegraded {
        buffered: usize,
    },
    LedgerFatal {
        buffered: usize,
    },
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::OrderSubmit { .. } => "order_submit",
            Event::OrderAck { .. } => "order_ack",
            Event::OrderReject { .. } => "order_reject",
            Event::Fill { .. } => "fill",
            Event::GuardBlock { .. } => "guard_block",
            Event::GuardLatch { .. } => "guard_latch",
            Event::GuardReset => "guard_reset",
            Event::HedgerStateChange { .. } => "hedger_state_change",
            Event::MakerCycle { .. } => "maker_cycle",
            Event::ReconcileSnap { .. } => "reconcile_snap",
            Event::IngestorReconnect { .. } => "ingestor_reconnect",
            Event::IngestorStalled { .. } => "ingestor_stalled",
            Event::LedgerDegraded { .. } => "ledger_degraded",
            Event::LedgerFatal { .. } => "ledger_fatal",
        }
    }
}

/// An event stamped with its bus sequence number and wall-clock time.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub ts: SystemTime,
    #[serde(flatten)]
    pub event: Event,
}

/// Fan-out bus. Cheap to clone; all clones share the sequence counter.
#[derive(Clone)]
pub struct EventBus {
    seq: Arc<AtomicU64>,
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            tx,
        }
    }

    /// Stamp and publish an event. Lagging subscribers drop oldest-first;
    /// publication never blocks a trading task.
    pub fn emit(&self, event: Event) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            seq,
            ts: SystemTime::now(),
            event,
        };
        info!(
            target: "fen::events",
            seq,
            kind = envelope.event.name(),
            detail = ?envelope.event,
        );
        let _ = self.tx.send(envelope);
        seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
