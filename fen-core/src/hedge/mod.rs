//! The hedger: drives inventory back toward neutral at minimum taker cost.
//!
//! Per market, a small state machine: Idle until inventory crosses the
//! trigger, then a passive clip resting inside the spread, escalating to an
//! aggressive crossing clip if the passive attempt times out, then a
//! cooldown before re-evaluating. When the guard latches or the maker has
//! been blocked too long, the machine skips the passive leg entirely and
//! flattens with larger, deeper-crossing clips on a shorter cooldown.
//!
//! Clip sizing caps at current inventory before the exchange-minimum
//! round-up, so a small position can never be over-hedged through flat by
//! the minima; when no clip fits both the cap and the minima, the cycle
//! yields and a counter records it.

use crate::config::{HedgerConfig, MarketId, MarketSpec};
use crate::events::{Event, EventBus};
use crate::execution::{
    CancelOutcome, InflightGate, OpenOrder, OrderId, OrderRequest, Role, Side, TradingClient,
};
use crate::resilience::{Backoff, BackoffConfig, ShutdownLatch};
use crate::risk::{Guard, GuardVerdict, PnlGuardSignal};
use crate::state::StateStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Result of clip sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipDecision {
    Clip(Decimal),
    /// No size satisfies the exchange minima without over-hedging past flat.
    Yield,
}

/// Size one hedge clip.
///
/// Order of operations is part of the contract: desire is computed from the
/// excess over target, scaled by the guard and emergency multipliers, capped
/// at current inventory, and only then rounded up to the smallest lot
/// multiple clearing both exchange minima. A round-up that would exceed
/// inventory yields instead of submitting.
pub fn clip_size(
    config: &HedgerConfig,
    spec: &MarketSpec,
    inventory: Decimal,
    price: Decimal,
    pnl_guard_active: bool,
    emergency: bool,
) -> ClipDecision {
    let gross = inventory.abs();
    let excess = gross - config.target_units;
    if excess <= Decimal::ZERO {
        return ClipDecision::Yield;
    }

    let mut desired = excess.min(config.max_clip_units);
    if pnl_guard_active {
        desired *= config.guard_clip_multiplier;
    }
    if emergency {
        desired *= config.emergency_clip_multiplier;
    }
    desired = desired.min(gross);

    let Some(floor) = spec.min_conforming_size(price) else {
        return ClipDecision::Yield;
    };
    let candidate = spec.round_size_up(desired).max(floor);

    if candidate > gross {
        ClipDecision::Yield
    } else {
        ClipDecision::Clip(candidate)
    }
}

#[derive(Debug, Clone)]
enum HedgeState {
    Idle,
    Resting {
        order_id: OrderId,
        placed_at: Instant,
        aggressive: bool,
        emergency: bool,
    },
    Cooldown {
        until: Instant,
    },
}

impl HedgeState {
    fn name(&self) -> &'static str {
        match self {
            HedgeState::Idle => "idle",
            HedgeState::Resting {
                aggressive: false, ..
            } => "passive",
            HedgeState::Resting {
                aggressive: true,
                emergency: false,
                ..
            } => "aggressive",
            HedgeState::Resting {
                emergency: true, ..
            } => "emergency_flatten",
            HedgeState::Cooldown { .. } => "cooldown",
        }
    }
}

/// What one evaluation did; returned for observability and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HedgeAction {
    None,
    SubmittedPassive,
    SubmittedAggressive,
    Escalated,
    Completed,
    Yielded,
    WaitingMakerFill,
    Blocked,
    CooledDown,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HedgeStats {
    pub clips_submitted: u64,
    pub escalations: u64,
    pub yields: u64,
    pub completions: u64,
    pub maker_waits: u64,
    pub guard_blocks: u64,
}

pub struct Hedger {
    config: HedgerConfig,
    specs: HashMap<MarketId, MarketSpec>,
    store: Arc<StateStore>,
    guard: Arc<Guard>,
    client: Arc<dyn TradingClient>,
    inflight: InflightGate,
    events: EventBus,
    shutdown: ShutdownLatch,
    pnl_guard: PnlGuardSignal,
    states: HashMap<MarketId, HedgeState>,
    stats: HedgeStats,
}

impl Hedger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HedgerConfig,
        markets: impl IntoIterator<Item = MarketSpec>,
        store: Arc<StateStore>,
        guard: Arc<Guard>,
        client: Arc<dyn TradingClient>,
        inflight: InflightGate,
        events: EventBus,
        shutdown: ShutdownLatch,
        pnl_guard: PnlGuardSignal,
    ) -> Self {
        Self {
            config,
            specs: markets.into_iter().map(|m| (m.id.clone(), m)).collect(),
            store,
            guard,
            client,
            inflight,
            events,
            shutdown,
            pnl_guard,
            states: HashMap::new(),
            stats: HedgeStats::default(),
        }
    }

    pub fn stats(&self) -> HedgeStats {
        self.stats
    }

    /// Evaluation loop. In-flight clips are deliberately not canceled on
    /// shutdown; flattening is allowed to complete.
    pub async fn run(mut self) {
        let markets: Vec<MarketId> = self.specs.keys().cloned().collect();
        info!(markets = markets.len(), "hedger started");

        while !self.shutdown.is_tripped() {
            tokio::time::sleep(Duration::from_millis(500)).await;
            for market in &markets {
                let action = self.evaluate(market).await;
                if action != HedgeAction::None {
                    debug!(market = %market, ?action, "hedge evaluation");
                }
            }
        }
        info!("hedger stopped");
    }

    pub async fn evaluate(&mut self, market: &MarketId) -> HedgeAction {
        self.evaluate_at(market, Instant::now()).await
    }

    pub async fn evaluate_at(&mut self, market: &MarketId, now: Instant) -> HedgeAction {
        let state = self
            .states
            .get(market)
            .cloned()
            .unwrap_or(HedgeState::Idle);

        match state {
            HedgeState::Cooldown { until } => {
                if now >= until {
                    self.transition(market, HedgeState::Idle);
                    HedgeAction::CooledDown
                } else {
                    HedgeAction::None
                }
            }
            HedgeState::Resting {
                order_id,
                placed_at,
                aggressive,
                emergency,
            } => {
                self.tend_resting(market, order_id, placed_at, aggressive, emergency, now)
                    .await
            }
            HedgeState::Idle => self.consider_clip(market, now).await,
        }
    }

    async fn tend_resting(
        &mut self,
        market: &MarketId,
        order_id: OrderId,
        placed_at: Instant,
        aggressive: bool,
        emergency: bool,
        now: Instant,
    ) -> HedgeAction {
        let inventory = self.store.inventory(market);

        // Clip gone from the book: it filled (or was killed externally).
        if self.store.order(&order_id).is_none() {
            self.stats.completions += 1;
            self.enter_cooldown(market, emergency, now);
            return HedgeAction::Completed;
        }

        // Close enough to target: pull the clip and rest.
        if inventory.abs() <= self.config.target_units {
            self.cancel_quietly(&order_id).await;
            self.stats.completions += 1;
            self.enter_cooldown(market, emergency, now);
            return HedgeAction::Completed;
        }

        if now.saturating_duration_since(placed_at) >= self.config.passive_wait() {
            self.cancel_quietly(&order_id).await;
            if aggressive {
                // Even the crossing clip did not fill; cool down and retry.
                self.enter_cooldown(market, emergency, now);
                return HedgeAction::Completed;
            }
            self.stats.escalations += 1;
            return self.submit_clip(market, now, true, emergency).await;
        }

        HedgeAction::None
    }

    async fn consider_clip(&mut self, market: &MarketId, now: Instant) -> HedgeAction {
        let Some(spec) = self.specs.get(market).cloned() else {
            return HedgeAction::None;
        };
        let Some(mid) = self.store.mid(market) else {
            return HedgeAction::None;
        };
        if mid.synthetic {
            // The guard would refuse anyway; don't spin the state machine.
            return HedgeAction::None;
        }

        let inventory = self.store.inventory(market);
        let gross = inventory.abs();
        let notional = gross * mid.price;

        let emergency = self.emergency_active(now);
        let armed = gross > self.config.trigger_units || notional > self.config.trigger_notional;
        let has_excess = gross > self.config.target_units;

        if !(armed || (emergency && has_excess)) {
            return HedgeAction::None;
        }

        // A resting maker order already working the flattening side at or
        // inside our target price will do the job without a duplicate leg.
        let side = if inventory > Decimal::ZERO {
            Side::Ask
        } else {
            Side::Bid
        };
        let passive_price = self.passive_price(&spec, mid.price, side);
        if !emergency && self.maker_covers(market, side, passive_price) {
            self.stats.maker_waits += 1;
            return HedgeAction::WaitingMakerFill;
        }

        self.submit_clip(market, now, emergency, emergency).await
    }

    /// Submit a clip. `aggressive` picks the crossing price; `emergency`
    /// additionally deepens the cross and widens the clip.
    async fn submit_clip(
        &mut self,
        market: &MarketId,
        now: Instant,
        aggressive: bool,
        emergency: bool,
    ) -> HedgeAction {
        let Some(spec) = self.specs.get(market).cloned() else {
            return HedgeAction::None;
        };
        let Some(mid) = self.store.mid(market) else {
            return HedgeAction::None;
        };
        let inventory = self.store.inventory(market);
        if inventory.is_zero() {
            self.transition(market, HedgeState::Idle);
            return HedgeAction::None;
        }

        let side = if inventory > Decimal::ZERO {
            Side::Ask
        } else {
            Side::Bid
        };
        let price = if aggressive {
            self.aggressive_price(&spec, mid.price, side, emergency)
        } else {
            self.passive_price(&spec, mid.price, side)
        };

        let size = match clip_size(
            &self.config,
            &spec,
            inventory,
            price,
            self.pnl_guard.is_active(),
            emergency,
        ) {
            ClipDecision::Clip(size) => size,
            ClipDecision::Yield => {
                self.stats.yields += 1;
                warn!(
                    market = %market,
                    inventory = %inventory,
                    "no clip satisfies exchange minima without over-hedging; yielding"
                );
                return HedgeAction::Yielded;
            }
        };

        let request = OrderRequest {
            market: market.clone(),
            side,
            price,
            size,
            post_only: !aggressive,
            role: Role::Hedger,
        };

        if let GuardVerdict::Rejected(reason) = self.guard.validate_at(&request, now) {
            self.stats.guard_blocks += 1;
            debug!(market = %market, %reason, "hedge clip blocked by guard");
            return HedgeAction::Blocked;
        }

        // Single-leg discipline: one in-flight hedger order per market.
        let Some(_permit) = self.inflight.acquire(market, side, Role::Hedger) else {
            return HedgeAction::Blocked;
        };

        self.events.emit(Event::OrderSubmit {
            market: market.clone(),
            side,
            role: Role::Hedger,
            price,
            size,
        });

        let mut backoff = Backoff::new(BackoffConfig::submit_retries(self.config.max_attempts));
        loop {
            match self.client.submit_limit(request.clone()).await {
                Ok(order_id) => {
                    self.stats.clips_submitted += 1;
                    self.store.add_order(OpenOrder {
                        order_id: order_id.clone(),
                        market: market.clone(),
                        side,
                        price,
                        size_remaining: size,
                        role: Role::Hedger,
                        submit_ts: SystemTime::now(),
                    });
                    self.events.emit(Event::OrderAck {
                        market: market.clone(),
                        order_id: order_id.clone(),
                        role: Role::Hedger,
                    });
                    self.transition(
                        market,
                        HedgeState::Resting {
                            order_id,
                            placed_at: now,
                            aggressive,
                            emergency,
                        },
                    );
                    return if aggressive {
                        HedgeAction::SubmittedAggressive
                    } else {
                        HedgeAction::SubmittedPassive
                    };
                }
                Err(e) if e.is_transient() && !backoff.exhausted() => {
                    let delay = backoff.next_delay().unwrap_or(Duration::from_millis(250));
                    debug!(error = %e, ?delay, "hedge submit retry");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(market = %market, error = %e, "hedge submit failed; cooling down");
                    if !e.is_transient() {
                        self.guard.note_exchange_rejection(market, &e);
                    }
                    self.events.emit(Event::OrderReject {
                        market: market.clone(),
                        side,
                        role: Role::Hedger,
                        reason: e.to_string(),
                    });
                    self.enter_cooldown(market, emergency, now);
                    return HedgeAction::Blocked;
                }
            }
        }
    }

    fn emergency_active(&self, now: Instant) -> bool {
        if self.guard.is_latched() {
            return true;
        }
        match self.guard.maker_blocked_since(now) {
            Some(since) => {
                now.saturating_duration_since(since) >= self.config.emergency_block()
            }
            None => false,
        }
    }

    fn passive_price(&self, spec: &MarketSpec, mid: Decimal, side: Side) -> Decimal {
        let bps = Decimal::from(10_000);
        match side {
            // Selling down a long: rest just under mid.
            Side::Ask => {
                spec.round_price_up(mid * (Decimal::ONE - self.config.passive_offset_bps / bps))
            }
            // Buying back a short: rest just over mid.
            Side::Bid => {
                spec.round_price_down(mid * (Decimal::ONE + self.config.passive_offset_bps / bps))
            }
        }
    }

    fn aggressive_price(
        &self,
        spec: &MarketSpec,
        mid: Decimal,
        side: Side,
        emergency: bool,
    ) -> Decimal {
        let bps = Decimal::from(10_000);
        let mut offset = self.config.aggressive_offset_bps;
        if emergency {
            offset += self.config.emergency_extra_cross_bps;
        }
        let offset = offset.min(self.config.max_slippage_bps);
        match side {
            Side::Ask => spec.round_price_down(mid * (Decimal::ONE - offset / bps)),
            Side::Bid => spec.round_price_up(mid * (Decimal::ONE + offset / bps)),
        }
    }

    /// A maker order on the flattening side at or inside the hedge target
    /// price makes a hedger leg redundant.
    fn maker_covers(&self, market: &MarketId, side: Side, target_price: Decimal) -> bool {
        self.store
            .orders(market, Some(side), Some(Role::Maker))
            .iter()
            .any(|o| match side {
                Side::Ask => o.price <= target_price,
                Side::Bid => o.price >= target_price,
            })
    }

    async fn cancel_quietly(&mut self, order_id: &OrderId) {
        match self.client.cancel(order_id).await {
            Ok(CancelOutcome::Acked) | Ok(CancelOutcome::NotFound) => {
                self.store.remove_order(order_id);
            }
            Err(e) => warn!(order_id = %order_id, error = %e, "hedge cancel failed"),
        }
    }

    fn enter_cooldown(&mut self, market: &MarketId, emergency: bool, now: Instant) {
        let pause = if emergency {
            self.config.emergency_cooldown()
        } else {
            self.config.cooldown()
        };
        self.transition(market, HedgeState::Cooldown { until: now + pause });
    }

    fn transition(&mut self, market: &MarketId, next: HedgeState) {
        let prev = self
            .states
            .get(market)
            .map(|s| s.name())
            .unwrap_or("idle");
        if prev != next.name() {
            self.events.emit(Event::HedgerStateChange {
                market: market.clone(),
                from: prev.to_string(),
                to: next.name().to_string(),
            });
        }
        self.states.insert(market.clone(), next);
    }

    /// Current phase name for a market, for logs and tests.
    pub fn phase(&self, market: &MarketId) -> &'static str {
        self.states
            .get(market)
            .map(|s| s.name())
            .unwrap_or("idle")
    }
}
