//! Pre-trade validation and the process-wide kill switch.
//!
//! Every order the maker or hedger produces passes through [`Guard::validate`]
//! immediately before submit. Validation is synchronous and side-effect-free
//! apart from rejection counters and events; the guard never originates
//! orders, it only filters them. Checks run in a fixed order and stop at the
//! first failure:
//!
//! 1. price band around mid
//! 2. crossed book
//! 3. inventory caps (units and notional)
//! 4. exchange minima and tick/lot alignment
//! 5. mid freshness (non-synthetic, bounded age)
//!
//! Configured rejection kinds additionally engage the kill-switch latch: the
//! maker is then blocked until an explicit reset while the hedger continues
//! in emergency-flatten mode.

use super::latch::{KillLatch, MakerSuspension};
use super::types::{GuardVerdict, RejectReason};
use crate::config::{GuardConfig, MarketId, MarketSpec};
use crate::events::{Event, EventBus};
use crate::execution::{OrderRequest, Role, SubmitError};
use crate::state::StateStore;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const HOLD_LEDGER: &str = "ledger";

pub struct Guard {
    config: GuardConfig,
    specs: HashMap<MarketId, MarketSpec>,
    store: Arc<StateStore>,
    events: EventBus,
    latch: KillLatch,
    suspension: MakerSuspension,
    rejects: Mutex<HashMap<&'static str, u64>>,
}

impl Guard {
    pub fn new(
        config: GuardConfig,
        markets: impl IntoIterator<Item = MarketSpec>,
        store: Arc<StateStore>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            specs: markets.into_iter().map(|m| (m.id.clone(), m)).collect(),
            store,
            events,
            latch: KillLatch::new(),
            suspension: MakerSuspension::new(),
            rejects: Mutex::new(HashMap::new()),
        }
    }

    /// Validate an order against current state.
    pub fn validate(&self, request: &OrderRequest) -> GuardVerdict {
        self.validate_at(request, Instant::now())
    }

    /// Validation with an explicit clock, for deterministic tests.
    pub fn validate_at(&self, request: &OrderRequest, now: Instant) -> GuardVerdict {
        match self.check(request, now) {
            Ok(()) => GuardVerdict::Accepted,
            Err(reason) => {
                self.record_rejection(request, &reason);
                GuardVerdict::Rejected(reason)
            }
        }
    }

    fn check(&self, request: &OrderRequest, now: Instant) -> Result<(), RejectReason> {
        // Maker-only gates: the latch and any active suspension. Hedger
        // orders pass so inventory can still be flattened while latched.
        if request.role == Role::Maker {
            if self.latch.is_engaged() {
                return Err(RejectReason::Latched);
            }
            if self.suspension.is_active(now) {
                return Err(RejectReason::Suspended);
            }
        }

        let spec = self
            .specs
            .get(&request.market)
            .ok_or(RejectReason::UnknownMarket)?;
        let mid = self
            .store
            .mid(&request.market)
            .ok_or(RejectReason::NoMid)?;

        // 1. Price band. Distance at the boundary is rejected.
        let distance_bps = ((request.price - mid.price).abs() / mid.price) * bps();
        if distance_bps >= self.config.price_band_bps {
            return Err(RejectReason::PriceBand {
                price: request.price,
                mid: mid.price,
                band_bps: self.config.price_band_bps,
            });
        }

        // 2. Crossed book / self-trade. Passive orders must not cross the
        // market top (synthetic and degenerate tops collapse to mid, the
        // strictest form). Taker orders cross by design, but never against
        // our own resting orders.
        if request.post_only {
            let crosses = match request.side {
                crate::execution::Side::Bid => request.price >= mid.best_ask,
                crate::execution::Side::Ask => request.price <= mid.best_bid,
            };
            if crosses {
                return Err(RejectReason::CrossedBook {
                    price: request.price,
                    mid: mid.price,
                });
            }
        } else {
            let own_opposite =
                self.store
                    .orders(&request.market, Some(request.side.opposite()), None);
            let self_cross = own_opposite.iter().any(|o| match request.side {
                crate::execution::Side::Bid => request.price >= o.price,
                crate::execution::Side::Ask => request.price <= o.price,
            });
            if self_cross {
                return Err(RejectReason::SelfTrade {
                    price: request.price,
                });
            }
        }

        // 3. Inventory caps on the post-fill position.
        let inventory_after =
            self.store.inventory(&request.market) + request.side.sign() * request.size;
        if inventory_after.abs() > self.config.max_position_units
            || inventory_after.abs() * mid.price > self.config.max_inventory_notional
        {
            return Err(RejectReason::InventoryCap {
                would_be: inventory_after,
                max_units: self.config.max_position_units,
                max_notional: self.config.max_inventory_notional,
            });
        }

        // 4. Exchange minima and grid alignment.
        if request.size < spec.exchange_min_size {
            return Err(RejectReason::BelowMinSize {
                size: request.size,
                min: spec.exchange_min_size,
            });
        }
        if request.notional() < spec.exchange_min_notional {
            return Err(RejectReason::BelowMinNotional {
                notional: request.notional(),
                min: spec.exchange_min_notional,
            });
        }
        if !is_multiple_of(request.price, spec.tick_size()) {
            return Err(RejectReason::OffTick {
                price: request.price,
                tick: spec.tick_size(),
            });
        }
        if !is_multiple_of(request.size, spec.lot_size()) {
            return Err(RejectReason::OffLot {
                size: request.size,
                lot: spec.lot_size(),
            });
        }

        // 5. Mid freshness.
        if mid.synthetic {
            return Err(RejectReason::SyntheticMid);
        }
        let age = mid.age(now);
        if age > self.config.max_mid_age() {
            return Err(RejectReason::StaleMid {
                age,
                max_age: self.config.max_mid_age(),
            });
        }

        Ok(())
    }

    fn record_rejection(&self, request: &OrderRequest, reason: &RejectReason) {
        debug!(
            market = %request.market,
            side = %request.side,
            role = %request.role,
            reason = %reason,
            "order blocked"
        );
        *self.rejects.lock().entry(reason.tag()).or_insert(0) += 1;
        self.events.emit(Event::GuardBlock {
            market: request.market.clone(),
            side: request.side,
            role: request.role,
            reason: reason.tag().to_string(),
        });
        self.maybe_latch(reason);
    }

    fn maybe_latch(&self, reason: &RejectReason) {
        let should = match reason {
            RejectReason::CrossedBook { .. } => self.config.kill_on_crossed_book,
            RejectReason::InventoryCap { .. } => self.config.kill_on_inventory_breach,
            _ => false,
        };
        if should && !self.latch.is_engaged() {
            self.latch.engage(reason.tag());
            self.events.emit(Event::GuardLatch {
                reason: reason.tag().to_string(),
            });
        }
    }

    /// Exchange-side permanent rejections feed the same latch logic as local
    /// ones: a crossed rejection from the venue still counts.
    pub fn note_exchange_rejection(&self, market: &MarketId, error: &SubmitError) {
        let tag: &'static str = match error {
            SubmitError::Crossed => {
                if self.config.kill_on_crossed_book && !self.latch.is_engaged() {
                    self.latch.engage("exchange crossed-book rejection");
                    self.events.emit(Event::GuardLatch {
                        reason: "crossed_book".to_string(),
                    });
                }
                "exchange_crossed"
            }
            SubmitError::MinNotional => "exchange_min_notional",
            _ => "exchange_other",
        };
        debug!(market = %market, error = %error, "exchange rejection recorded");
        *self.rejects.lock().entry(tag).or_insert(0) += 1;
    }

    // ── Latch & suspension management ───────────────────────────────────

    pub fn is_latched(&self) -> bool {
        self.latch.is_engaged()
    }

    /// Explicit operator reset of the kill switch.
    pub fn reset_latch(&self) {
        self.latch.reset();
        self.events.emit(Event::GuardReset);
    }

    /// A reconciliation snapped the store; cool maker quoting off.
    pub fn note_reconcile_snap(&self, now: Instant) {
        self.suspension
            .suspend_for(self.config.reconcile_cooldown(), now);
    }

    /// Ledger writes are failing; hold maker quoting until drained.
    pub fn note_ledger_degraded(&self, now: Instant) {
        self.suspension.hold(HOLD_LEDGER, now);
    }

    pub fn note_ledger_recovered(&self) {
        self.suspension.release(HOLD_LEDGER);
    }

    pub fn is_maker_suspended(&self, now: Instant) -> bool {
        self.suspension.is_active(now)
    }

    /// How long the maker has been continuously blocked (latch or
    /// suspension); drives the hedger's emergency-block timer.
    pub fn maker_blocked_since(&self, now: Instant) -> Option<Instant> {
        let latched = self.latch.engaged_since();
        let suspended = self.suspension.active_since(now);
        match (latched, suspended) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn rejection_count(&self, tag: &str) -> u64 {
        self.rejects.lock().get(tag).copied().unwrap_or(0)
    }

    /// The configured unit cap; features scale soft limits off it.
    pub fn position_cap(&self) -> Decimal {
        self.config.max_position_units
    }
}

fn bps() -> Decimal {
    Decimal::from(10_000)
}

fn is_multiple_of(value: Decimal, step: Decimal) -> bool {
    if step.is_zero() {
        return true;
    }
    (value % step).is_zero()
}
