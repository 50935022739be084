//! The maker engine: two-sided quote refresh per market.
//!
//! Each cycle takes one consistent snapshot of (mid, inventory, orders),
//! composes the enabled features' adjustments, forms and quantizes the
//! quotes, and reconciles the book side by side: a resting order close
//! enough to the intent is left alone (sticky quote), otherwise the old
//! order is canceled through the throttle and the new one submitted through
//! the guard. The cycle finishes on its snapshot even if fills land
//! mid-cycle; the next cycle re-reads.

use super::feature::{Adjustment, FeatureContext, MarketEvent, QuoteFeature};
use super::quote::{form_quotes, QuoteIntent};
use super::throttle::CancelWindow;
use crate::config::{MakerConfig, MarketId, MarketSpec};
use crate::events::{Event, EventBus};
use crate::execution::{
    CancelOutcome, InflightGate, OpenOrder, OrderRequest, Role, Side, TradingClient,
};
use crate::resilience::{Backoff, BackoffConfig, ShutdownLatch};
use crate::risk::{Guard, GuardVerdict};
use crate::state::{MarketView, StateStore, SOURCE_QUOTES};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// What happened on one side during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideAction {
    /// Feature gates withheld the side.
    Gated,
    /// An acceptable order was already resting.
    Sticky,
    /// A new order was submitted and acked.
    Submitted,
    /// The guard refused the order.
    GuardRejected,
    /// The cancel throttle suppressed the replacement.
    Throttled,
    /// A prior request for this slot is still in flight.
    Busy,
    /// Submission failed after retries.
    SubmitFailed,
}

/// Why a cycle produced no quotes at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoMid,
    SyntheticMid,
    StaleMid,
    UnknownMarket,
    QuoteAborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    Skipped(SkipReason),
    Quoted { bid: SideAction, ask: SideAction },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MakerStats {
    pub cycles: u64,
    pub submits: u64,
    pub sticky_holds: u64,
    pub cancels: u64,
    pub cancels_suppressed: u64,
    pub guard_rejects: u64,
    pub aborts: u64,
}

pub struct MakerEngine {
    config: MakerConfig,
    mid_max_age: Duration,
    specs: HashMap<MarketId, MarketSpec>,
    features: HashMap<MarketId, Vec<Box<dyn QuoteFeature>>>,
    store: Arc<StateStore>,
    guard: Arc<Guard>,
    client: Arc<dyn TradingClient>,
    inflight: InflightGate,
    events: EventBus,
    shutdown: ShutdownLatch,
    throttle: CancelWindow,
    stats: MakerStats,
}

impl MakerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MakerConfig,
        mid_max_age: Duration,
        markets: impl IntoIterator<Item = MarketSpec>,
        store: Arc<StateStore>,
        guard: Arc<Guard>,
        client: Arc<dyn TradingClient>,
        inflight: InflightGate,
        events: EventBus,
        shutdown: ShutdownLatch,
    ) -> Self {
        let throttle = CancelWindow::new(config.max_cancels_per_minute);
        Self {
            config,
            mid_max_age,
            specs: markets.into_iter().map(|m| (m.id.clone(), m)).collect(),
            features: HashMap::new(),
            store,
            guard,
            client,
            inflight,
            events,
            shutdown,
            throttle,
            stats: MakerStats::default(),
        }
    }

    /// Install the feature stack for a market. Quoting works with none.
    pub fn set_features(&mut self, market: &MarketId, features: Vec<Box<dyn QuoteFeature>>) {
        self.features.insert(market.clone(), features);
    }

    pub fn stats(&self) -> MakerStats {
        self.stats
    }

    /// Quote loop: every refresh interval (with jitter), cycle each market.
    /// On shutdown, cancels all resting maker orders before returning.
    pub async fn run(mut self) {
        let markets: Vec<MarketId> = self.specs.keys().cloned().collect();
        info!(markets = markets.len(), "maker engine started");

        while !self.shutdown.is_tripped() {
            let jitter_ms = if self.config.refresh_jitter_ms > 0 {
                rand::thread_rng().gen_range(0..self.config.refresh_jitter_ms)
            } else {
                0
            };
            tokio::time::sleep(self.config.refresh_interval() + Duration::from_millis(jitter_ms))
                .await;
            if self.shutdown.is_tripped() {
                break;
            }

            for market in &markets {
                let report = self.run_cycle(market).await;
                debug!(market = %market, ?report, "cycle");
            }
        }

        // Drain: pull our quotes. Hedger orders are left to finish.
        for market in &markets {
            match self.client.cancel_all(market).await {
                Ok(count) => {
                    info!(market = %market, count, "maker orders canceled on shutdown")
                }
                Err(e) => warn!(market = %market, error = %e, "shutdown cancel_all failed"),
            }
            for order in self.store.orders(market, None, Some(Role::Maker)) {
                self.store.remove_order(&order.order_id);
            }
        }
        info!("maker engine stopped");
    }

    pub async fn run_cycle(&mut self, market: &MarketId) -> CycleReport {
        self.run_cycle_at(market, Instant::now()).await
    }

    /// One quote cycle with an explicit clock, for deterministic tests.
    pub async fn run_cycle_at(&mut self, market: &MarketId, now: Instant) -> CycleReport {
        self.stats.cycles += 1;

        let Some(spec) = self.specs.get(market).cloned() else {
            return CycleReport::Skipped(SkipReason::UnknownMarket);
        };
        let Some(view) = self.store.market_view(market) else {
            return self.finish_skip(market, SkipReason::NoMid);
        };
        if view.mid.synthetic {
            return self.finish_skip(market, SkipReason::SyntheticMid);
        }
        if view.mid.age(now) > self.mid_max_age {
            return self.finish_skip(market, SkipReason::StaleMid);
        }

        let adjustment = self.compose_adjustment(market, &view, now);
        let pair = match form_quotes(view.mid.price, &self.config, &spec, &adjustment) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(market = %market, error = %e, "quote formation aborted");
                self.stats.aborts += 1;
                return self.finish_skip(market, SkipReason::QuoteAborted);
            }
        };

        let bid = self
            .quote_side(market, Side::Bid, pair.bid, &view, now)
            .await;
        let ask = self
            .quote_side(market, Side::Ask, pair.ask, &view, now)
            .await;

        self.store.heartbeats().beat(SOURCE_QUOTES);
        self.events.emit(Event::MakerCycle {
            market: market.clone(),
            quoted_bid: matches!(bid, SideAction::Submitted | SideAction::Sticky),
            quoted_ask: matches!(ask, SideAction::Submitted | SideAction::Sticky),
        });

        CycleReport::Quoted { bid, ask }
    }

    fn finish_skip(&mut self, market: &MarketId, reason: SkipReason) -> CycleReport {
        self.store.heartbeats().beat(SOURCE_QUOTES);
        self.events.emit(Event::MakerCycle {
            market: market.clone(),
            quoted_bid: false,
            quoted_ask: false,
        });
        CycleReport::Skipped(reason)
    }

    /// Push state into the features and fold their contributions.
    fn compose_adjustment(
        &mut self,
        market: &MarketId,
        view: &MarketView,
        now: Instant,
    ) -> Adjustment {
        let realized = self.store.total_realized(market);
        let ctx = FeatureContext {
            mid: view.mid.price,
            inventory: view.inventory,
            max_position_units: self.guard_position_cap(),
            now,
        };

        let mut merged = Adjustment::neutral();
        if let Some(features) = self.features.get_mut(market) {
            for feature in features.iter_mut() {
                if !feature.is_enabled() {
                    continue;
                }
                feature.update(&MarketEvent::Mid {
                    mid: view.mid.price,
                    at: now,
                });
                feature.update(&MarketEvent::Realized {
                    total: realized,
                    at: now,
                });
                feature.update(&MarketEvent::Inventory {
                    inventory: view.inventory,
                    at: now,
                });
                let contribution = feature.adjust(&ctx);
                debug!(
                    market = %market,
                    feature = feature.name(),
                    spread = %contribution.spread_delta_bps,
                    size_mult = %contribution.size_multiplier,
                    "feature contribution"
                );
                merged.merge(&contribution);
            }
        }
        merged
    }

    fn guard_position_cap(&self) -> rust_decimal::Decimal {
        // Features scale off the same cap the guard enforces.
        self.guard.position_cap()
    }

    async fn quote_side(
        &mut self,
        market: &MarketId,
        side: Side,
        intent: Option<QuoteIntent>,
        view: &MarketView,
        now: Instant,
    ) -> SideAction {
        let Some(intent) = intent else {
            return SideAction::Gated;
        };

        let request = OrderRequest {
            market: market.clone(),
            side,
            price: intent.price,
            size: intent.size,
            post_only: true,
            role: Role::Maker,
        };

        if let GuardVerdict::Rejected(reason) = self.guard.validate_at(&request, now) {
            debug!(market = %market, side = %side, %reason, "guard rejected quote");
            self.stats.guard_rejects += 1;
            return SideAction::GuardRejected;
        }

        let existing: Vec<&OpenOrder> = view
            .orders
            .iter()
            .filter(|o| o.side == side && o.role == Role::Maker)
            .collect();

        // Sticky quote: leave a close-enough resting order untouched.
        let close_enough = existing.iter().any(|o| {
            (o.price - intent.price).abs() <= self.config.price_epsilon
                && (o.size_remaining - intent.size).abs() <= self.config.size_epsilon
        });
        if close_enough {
            self.stats.sticky_holds += 1;
            return SideAction::Sticky;
        }

        let Some(_permit) = self.inflight.acquire(market, side, Role::Maker) else {
            return SideAction::Busy;
        };

        // Replace: cancel what rests, then submit the new order.
        for order in &existing {
            if !self.throttle.try_cancel(now) {
                self.stats.cancels_suppressed += 1;
                debug!(market = %market, side = %side, "cancel throttled; keeping old quote");
                return SideAction::Throttled;
            }
            match self.client.cancel(&order.order_id).await {
                Ok(CancelOutcome::Acked) | Ok(CancelOutcome::NotFound) => {
                    self.stats.cancels += 1;
                    self.store.remove_order(&order.order_id);
                }
                Err(e) => {
                    warn!(market = %market, order_id = %order.order_id, error = %e, "cancel failed");
                    return SideAction::SubmitFailed;
                }
            }
        }

        self.submit(request).await
    }

    /// Submit with bounded retries on transient failures. Permanent
    /// rejections are surfaced to the guard and end the side for the cycle.
    async fn submit(&mut self, request: OrderRequest) -> SideAction {
        self.events.emit(Event::OrderSubmit {
            market: request.market.clone(),
            side: request.side,
            role: request.role,
            price: request.price,
            size: request.size,
        });

        let mut backoff = Backoff::new(BackoffConfig::submit_retries(3));
        loop {
            match self.client.submit_limit(request.clone()).await {
                Ok(order_id) => {
                    self.stats.submits += 1;
                    self.store.add_order(OpenOrder {
                        order_id: order_id.clone(),
                        market: request.market.clone(),
                        side: request.side,
                        price: request.price,
                        size_remaining: request.size,
                        role: request.role,
                        submit_ts: SystemTime::now(),
                    });
                    self.events.emit(Event::OrderAck {
                        market: request.market.clone(),
                        order_id,
                        role: request.role,
                    });
                    return SideAction::Submitted;
                }
                Err(e) if e.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(error = %e, ?delay, "transient submit failure; retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(error = %e, "submit retries exhausted");
                        self.emit_reject(&request, &e);
                        return SideAction::SubmitFailed;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "permanent submit rejection");
                    self.guard.note_exchange_rejection(&request.market, &e);
                    self.emit_reject(&request, &e);
                    return SideAction::SubmitFailed;
                }
            }
        }
    }

    fn emit_reject(&self, request: &OrderRequest, error: &crate::execution::SubmitError) {
        self.events.emit(Event::OrderReject {
            market: request.market.clone(),
            side: request.side,
            role: request.role,
            reason: error.to_string(),
        });
    }
}
