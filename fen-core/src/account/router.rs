//! Routes account frames into the ledger, the store, and the guard.
//!
//! Fills are deduplicated, persisted to the ledger first, then applied to
//! the store. Position snapshots reconcile the store against the exchange:
//! inside one lot of agreement nothing happens; beyond it the store snaps to
//! the exchange value and maker quoting cools off.

use super::{AccountFill, AccountFrame, AccountStream, PositionUpdate};
use crate::config::{MarketId, MarketSpec};
use crate::events::{Event, EventBus};
use crate::execution::OrderId;
use crate::ledger::{AppendOutcome, FillLedger, FillRecord};
use crate::resilience::{Backoff, BackoffConfig, ShutdownLatch};
use crate::risk::Guard;
use crate::state::{ReconcileOutcome, StateStore, SOURCE_ACCOUNT};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Replay window for at-least-once dedup.
const DEDUP_CAPACITY: usize = 65_536;

/// Running reconciliation tallies.
#[derive(Debug, Default, Clone)]
pub struct ReconcileStats {
    pub snapshots: u64,
    pub in_sync: u64,
    pub snapped: u64,
    pub stale_dropped: u64,
    pub max_drift: rust_decimal::Decimal,
}

pub struct AccountRouter {
    specs: HashMap<MarketId, MarketSpec>,
    store: Arc<StateStore>,
    guard: Arc<Guard>,
    events: EventBus,
    shutdown: ShutdownLatch,
    ledger: FillLedger,
    seen: HashSet<(OrderId, u64)>,
    seen_order: VecDeque<(OrderId, u64)>,
    last_position_ts: HashMap<MarketId, DateTime<Utc>>,
    ledger_fatal_reported: bool,
    reconcile_stats: ReconcileStats,
}

impl AccountRouter {
    pub fn new(
        markets: impl IntoIterator<Item = MarketSpec>,
        store: Arc<StateStore>,
        guard: Arc<Guard>,
        events: EventBus,
        shutdown: ShutdownLatch,
        ledger: FillLedger,
    ) -> Self {
        Self {
            specs: markets.into_iter().map(|m| (m.id.clone(), m)).collect(),
            store,
            guard,
            events,
            shutdown,
            ledger,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            last_position_ts: HashMap::new(),
            ledger_fatal_reported: false,
            reconcile_stats: ReconcileStats::default(),
        }
    }

    pub fn reconcile_stats(&self) -> ReconcileStats {
        self.reconcile_stats.clone()
    }

    /// Drive the account stream until shutdown, then drain the ledger.
    pub async fn run(mut self, mut stream: Box<dyn AccountStream>) -> FillLedger {
        let mut backoff = Backoff::new(BackoffConfig::default());

        while !self.shutdown.is_tripped() {
            match stream.connect().await {
                Ok(mut conn) => {
                    info!("account stream connected");
                    backoff.reset();
                    loop {
                        if self.shutdown.is_tripped() {
                            break;
                        }
                        // Wake periodically even when idle so a degraded
                        // ledger keeps retrying.
                        match tokio::time::timeout(Duration::from_secs(1), conn.next_frame()).await
                        {
                            Ok(Some(frame)) => self.handle_frame(frame),
                            Ok(None) => {
                                warn!("account stream closed");
                                break;
                            }
                            Err(_) => {}
                        }
                        self.tend_ledger();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "account stream connect failed");
                }
            }

            if self.shutdown.is_tripped() {
                break;
            }
            let delay = backoff
                .next_delay()
                .unwrap_or_else(|| Duration::from_secs(30));
            tokio::time::sleep(delay).await;
        }

        // Bounded final drain so buffered fills reach stable storage.
        let drain_deadline = Instant::now() + Duration::from_secs(5);
        while self.ledger.is_degraded() && Instant::now() < drain_deadline {
            self.ledger.drain_retry();
            if self.ledger.is_degraded() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        info!("account router stopped");
        self.ledger
    }

    pub fn handle_frame(&mut self, frame: AccountFrame) {
        self.store.heartbeats().beat(SOURCE_ACCOUNT);
        match frame {
            AccountFrame::Fill(fill) => self.handle_fill(fill),
            AccountFrame::Position(position) => self.handle_position(position),
            AccountFrame::Balance { currency, total } => {
                debug!(%currency, %total, "balance frame");
            }
        }
    }

    fn handle_fill(&mut self, fill: AccountFill) {
        let key = (fill.order_id.clone(), fill.fill_sequence);
        if self.seen.contains(&key) {
            debug!(order_id = %fill.order_id, seq = fill.fill_sequence, "duplicate fill dropped");
            return;
        }
        self.remember(key);

        // Ledger first: the record carries inventory_after, so compute the
        // store effect, then persist, then report.
        let (inventory_after, realized, consistent) = self.store.apply_fill(
            &fill.market,
            Some(&fill.order_id),
            fill.side,
            fill.size,
            fill.price,
            fill.fee,
            SystemTime::from(fill.ts),
        );
        if !consistent {
            // Lot queue and inventory disagree: a fill bypassed this path.
            error!(
                market = %fill.market,
                inventory = %inventory_after,
                "lot-sum drifted from inventory after fill"
            );
        }
        debug!(
            market = %fill.market,
            side = %fill.side,
            size = %fill.size,
            price = %fill.price,
            realized = %realized,
            "fill applied"
        );

        let record = FillRecord {
            ts: fill.ts,
            market: fill.market.clone(),
            side: fill.side,
            role: fill.role,
            size: fill.size,
            price: fill.price,
            fee: fill.fee,
            quote_delta: fill.quote_delta(),
            inventory_after,
        };
        match self.ledger.append(record) {
            AppendOutcome::Written => {}
            AppendOutcome::OutOfOrder => {
                warn!(market = %fill.market, "fill older than ledger watermark");
            }
            AppendOutcome::Buffered { queued } => {
                self.guard.note_ledger_degraded(Instant::now());
                self.events.emit(Event::LedgerDegraded { buffered: queued });
            }
        }

        self.events.emit(Event::Fill {
            market: fill.market,
            side: fill.side,
            role: fill.role,
            price: fill.price,
            size: fill.size,
            inventory_after,
        });
    }

    fn handle_position(&mut self, position: PositionUpdate) {
        // Stale snapshots are detected by timestamp and discarded.
        if let Some(last) = self.last_position_ts.get(&position.market) {
            if position.ts <= *last {
                self.reconcile_stats.stale_dropped += 1;
                debug!(market = %position.market, "stale position snapshot dropped");
                return;
            }
        }
        self.reconcile_stats.snapshots += 1;
        self.last_position_ts
            .insert(position.market.clone(), position.ts);

        let Some(spec) = self.specs.get(&position.market) else {
            warn!(market = %position.market, "position for unregistered market");
            return;
        };
        let Some(mid) = self.store.mid(&position.market) else {
            debug!(market = %position.market, "no mid yet; reconcile deferred");
            return;
        };

        let outcome = self.store.reconcile_position(
            &position.market,
            position.signed_size,
            mid.price,
            spec.lot_size(),
            SystemTime::from(position.ts),
        );
        match outcome {
            ReconcileOutcome::Snapped { local, exchange } => {
                self.reconcile_stats.snapped += 1;
                let drift = (local - exchange).abs();
                if drift > self.reconcile_stats.max_drift {
                    self.reconcile_stats.max_drift = drift;
                }
                warn!(
                    market = %position.market,
                    %local,
                    %exchange,
                    "inventory snapped to exchange position"
                );
                self.guard.note_reconcile_snap(Instant::now());
                self.events.emit(Event::ReconcileSnap {
                    market: position.market.clone(),
                    local,
                    exchange,
                });
            }
            ReconcileOutcome::InSync => {
                self.reconcile_stats.in_sync += 1;
            }
        }

        // The venue's own PnL figures ride along for operator comparison.
        debug!(
            market = %position.market,
            exchange_realized = %position.realized_pnl,
            exchange_unrealized = %position.unrealized_pnl,
            local_realized = %self.store.total_realized(&position.market),
            "position snapshot"
        );
    }

    /// Retry buffered ledger writes and manage the maker hold.
    fn tend_ledger(&mut self) {
        if !self.ledger.is_degraded() {
            return;
        }
        let remaining = self.ledger.drain_retry();
        if remaining == 0 {
            info!("ledger recovered; releasing maker hold");
            self.guard.note_ledger_recovered();
            self.ledger_fatal_reported = false;
        } else if self.ledger.deadline_exceeded(Instant::now()) && !self.ledger_fatal_reported {
            self.ledger_fatal_reported = true;
            self.events.emit(Event::LedgerFatal {
                buffered: remaining,
            });
        }
    }

    fn remember(&mut self, key: (OrderId, u64)) {
        if self.seen_order.len() >= DEDUP_CAPACITY {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.seen.insert(key.clone());
        self.seen_order.push_back(key);
    }

    #[cfg(test)]
    pub(crate) fn ledger_ref(&self) -> &FillLedger {
        &self.ledger
    }
}
