//! The StateStore: single in-process authority for mids, inventory, open
//! orders and cost basis.
//!
//! Every read and write goes through a method on this type and is serialized
//! behind one lock, so no two task steps ever observe a half-applied
//! mutation. The store never invents quantity: inventory moves only on fills
//! and on explicit reconciliations from the account stream.

use super::heartbeat::HeartbeatBoard;
use crate::config::MarketId;
use crate::execution::{OpenOrder, OrderId, Role, Side};
use crate::pnl::PnlCompositor;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

/// A mid observation with the book top it derives from. `at` is the
/// monotonic receipt instant used for age checks; `wall_ts` is only carried
/// for ledger records and logging. Synthetic points carry a degenerate top
/// (`best_bid == best_ask == price`).
#[derive(Debug, Clone, Copy)]
pub struct MidPoint {
    pub price: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub wall_ts: SystemTime,
    pub at: Instant,
    pub synthetic: bool,
}

impl MidPoint {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.at)
    }
}

/// Consistent per-market snapshot handed to the maker at the start of a
/// quote cycle. Taken under one lock acquisition.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub mid: MidPoint,
    pub inventory: Decimal,
    pub orders: Vec<OpenOrder>,
}

/// Result of a position reconciliation against an exchange snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local inventory agreed within one lot.
    InSync,
    /// Local inventory was snapped to the exchange value.
    Snapped {
        local: Decimal,
        exchange: Decimal,
    },
}

#[derive(Default)]
struct StoreInner {
    mids: HashMap<MarketId, MidPoint>,
    inventory: HashMap<MarketId, Decimal>,
    orders: HashMap<OrderId, OpenOrder>,
    pnl: PnlCompositor,
}

/// Shared state authority. Clone-free: components hold `Arc<StateStore>`.
pub struct StateStore {
    inner: Mutex<StoreInner>,
    heartbeats: HeartbeatBoard,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            heartbeats: HeartbeatBoard::new(),
        }
    }

    // ── Mids ────────────────────────────────────────────────────────────

    /// Record a mid with a degenerate book top. Used for synthetic mids and
    /// anywhere the top of book is unknown.
    pub fn set_mid(
        &self,
        market: &MarketId,
        price: Decimal,
        wall_ts: SystemTime,
        synthetic: bool,
    ) {
        let point = MidPoint {
            price,
            best_bid: price,
            best_ask: price,
            wall_ts,
            at: Instant::now(),
            synthetic,
        };
        self.inner.lock().mids.insert(market.clone(), point);
    }

    /// Record a real top of book; the mid is its arithmetic mean.
    pub fn set_book_top(
        &self,
        market: &MarketId,
        best_bid: Decimal,
        best_ask: Decimal,
        wall_ts: SystemTime,
    ) {
        let point = MidPoint {
            price: (best_bid + best_ask) / Decimal::TWO,
            best_bid,
            best_ask,
            wall_ts,
            at: Instant::now(),
            synthetic: false,
        };
        self.inner.lock().mids.insert(market.clone(), point);
    }

    pub fn mid(&self, market: &MarketId) -> Option<MidPoint> {
        self.inner.lock().mids.get(market).copied()
    }

    // ── Inventory & fills ───────────────────────────────────────────────

    pub fn inventory(&self, market: &MarketId) -> Decimal {
        self.inner
            .lock()
            .inventory
            .get(market)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Atomic read-modify-write of inventory. Returns the new value.
    pub fn update_inventory(&self, market: &MarketId, signed_delta: Decimal) -> Decimal {
        let mut inner = self.inner.lock();
        let entry = inner
            .inventory
            .entry(market.clone())
            .or_insert(Decimal::ZERO);
        *entry += signed_delta;
        *entry
    }

    /// Apply a fill: moves inventory, feeds the FIFO book, shrinks or
    /// removes the matching open order. Returns
    /// `(inventory_after, realized_pnl_delta)`.
    ///
    /// The lot-sum == inventory invariant is checked on the way out; drift
    /// means a fill bypassed this path and is reported as a fault.
    pub fn apply_fill(
        &self,
        market: &MarketId,
        order_id: Option<&OrderId>,
        side: Side,
        size: Decimal,
        price: Decimal,
        fee: Decimal,
        ts: SystemTime,
    ) -> (Decimal, Decimal, bool) {
        let mut inner = self.inner.lock();

        let realized = inner.pnl.apply_fill(market, side, size, price, fee, ts);

        let entry = inner
            .inventory
            .entry(market.clone())
            .or_insert(Decimal::ZERO);
        *entry += side.sign() * size;
        let inventory_after = *entry;

        if let Some(id) = order_id {
            let remove = match inner.orders.get_mut(id) {
                Some(order) => {
                    order.size_remaining -= size;
                    order.size_remaining <= Decimal::ZERO
                }
                None => false,
            };
            if remove {
                inner.orders.remove(id);
            }
        }

        let lot_sum = inner
            .pnl
            .book(market)
            .map(|b| b.net_position())
            .unwrap_or(Decimal::ZERO);
        let consistent = lot_sum == inventory_after;

        (inventory_after, realized, consistent)
    }

    /// Snap inventory to the exchange-reported value when the disagreement
    /// exceeds one lot. The difference is injected into the FIFO book as an
    /// adjustment lot at the supplied mid so the lot-sum invariant holds
    /// immediately after the snap. Re-running with the same snapshot is a
    /// no-op.
    pub fn reconcile_position(
        &self,
        market: &MarketId,
        exchange_size: Decimal,
        mid: Decimal,
        lot_size: Decimal,
        ts: SystemTime,
    ) -> ReconcileOutcome {
        let mut inner = self.inner.lock();
        let local = inner
            .inventory
            .get(market)
            .copied()
            .unwrap_or(Decimal::ZERO);

        if (local - exchange_size).abs() <= lot_size {
            return ReconcileOutcome::InSync;
        }

        inner
            .inventory
            .insert(market.clone(), exchange_size);
        inner
            .pnl
            .book_mut(market)
            .apply_adjustment(exchange_size - local, mid, ts);

        ReconcileOutcome::Snapped {
            local,
            exchange: exchange_size,
        }
    }

    // ── Open orders ─────────────────────────────────────────────────────

    pub fn add_order(&self, order: OpenOrder) {
        self.inner
            .lock()
            .orders
            .insert(order.order_id.clone(), order);
    }

    pub fn remove_order(&self, order_id: &OrderId) -> Option<OpenOrder> {
        self.inner.lock().orders.remove(order_id)
    }

    pub fn order(&self, order_id: &OrderId) -> Option<OpenOrder> {
        self.inner.lock().orders.get(order_id).cloned()
    }

    /// Orders for a market, optionally filtered by side and role.
    pub fn orders(
        &self,
        market: &MarketId,
        side: Option<Side>,
        role: Option<Role>,
    ) -> Vec<OpenOrder> {
        self.inner
            .lock()
            .orders
            .values()
            .filter(|o| &o.market == market)
            .filter(|o| side.map_or(true, |s| o.side == s))
            .filter(|o| role.map_or(true, |r| o.role == r))
            .cloned()
            .collect()
    }

    pub fn open_order_count(&self) -> usize {
        self.inner.lock().orders.len()
    }

    // ── Derived PnL views ───────────────────────────────────────────────

    /// `(avg_entry_price, signed_open_size)` from the current lot queue.
    pub fn cost_basis(&self, market: &MarketId) -> (Decimal, Decimal) {
        self.inner.lock().pnl.cost_basis(market)
    }

    pub fn total_realized(&self, market: &MarketId) -> Decimal {
        self.inner.lock().pnl.total_realized(market)
    }

    pub fn realized_between(
        &self,
        market: &MarketId,
        t1: SystemTime,
        t2: SystemTime,
    ) -> Decimal {
        self.inner
            .lock()
            .pnl
            .book(market)
            .map(|b| b.realized_between(t1, t2))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn unrealized(&self, market: &MarketId) -> Decimal {
        let inner = self.inner.lock();
        match inner.mids.get(market) {
            Some(mid) => inner.pnl.unrealized(market, mid.price),
            None => Decimal::ZERO,
        }
    }

    // ── Snapshots & heartbeats ──────────────────────────────────────────

    /// One-lock consistent view for a quote cycle. None until a mid exists.
    pub fn market_view(&self, market: &MarketId) -> Option<MarketView> {
        let inner = self.inner.lock();
        let mid = *inner.mids.get(market)?;
        let inventory = inner
            .inventory
            .get(market)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let orders = inner
            .orders
            .values()
            .filter(|o| &o.market == market)
            .cloned()
            .collect();
        Some(MarketView {
            mid,
            inventory,
            orders,
        })
    }

    pub fn heartbeats(&self) -> &HeartbeatBoard {
        &self.heartbeats
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> MarketId {
        MarketId::from("market:2")
    }

    fn order(id: &str, side: Side, role: Role, size: Decimal) -> OpenOrder {
        OpenOrder {
            order_id: OrderId::from(id),
            market: market(),
            side,
            price: dec!(100),
            size_remaining: size,
            role,
            submit_ts: SystemTime::now(),
        }
    }

    #[test]
    fn mid_roundtrip_with_age() {
        let store = StateStore::new();
        store.set_mid(&market(), dec!(143), SystemTime::now(), false);

        let mid = store.mid(&market()).unwrap();
        assert_eq!(mid.price, dec!(143));
        assert!(!mid.synthetic);
        assert!(mid.age(Instant::now() + Duration::from_secs(2)) >= Duration::from_secs(2));
    }

    #[test]
    fn book_top_derives_mid() {
        let store = StateStore::new();
        store.set_book_top(&market(), dec!(142.99), dec!(143.01), SystemTime::now());

        let mid = store.mid(&market()).unwrap();
        assert_eq!(mid.price, dec!(143.00));
        assert_eq!(mid.best_bid, dec!(142.99));
        assert_eq!(mid.best_ask, dec!(143.01));
        assert!(!mid.synthetic);
    }

    #[test]
    fn fill_moves_inventory_and_lot_queue_together() {
        let store = StateStore::new();
        let (inv, realized, consistent) = store.apply_fill(
            &market(),
            None,
            Side::Bid,
            dec!(0.5),
            dec!(100),
            Decimal::ZERO,
            SystemTime::now(),
        );
        assert_eq!(inv, dec!(0.5));
        assert_eq!(realized, Decimal::ZERO);
        assert!(consistent);
        assert_eq!(store.cost_basis(&market()), (dec!(100), dec!(0.5)));
    }

    #[test]
    fn partial_fill_shrinks_open_order_then_removes() {
        let store = StateStore::new();
        store.add_order(order("o1", Side::Bid, Role::Maker, dec!(1.0)));
        let id = OrderId::from("o1");

        store.apply_fill(
            &market(),
            Some(&id),
            Side::Bid,
            dec!(0.4),
            dec!(100),
            Decimal::ZERO,
            SystemTime::now(),
        );
        assert_eq!(store.order(&id).unwrap().size_remaining, dec!(0.6));

        store.apply_fill(
            &market(),
            Some(&id),
            Side::Bid,
            dec!(0.6),
            dec!(100),
            Decimal::ZERO,
            SystemTime::now(),
        );
        assert!(store.order(&id).is_none());
    }

    #[test]
    fn order_filters_by_side_and_role() {
        let store = StateStore::new();
        store.add_order(order("a", Side::Bid, Role::Maker, dec!(1)));
        store.add_order(order("b", Side::Ask, Role::Maker, dec!(1)));
        store.add_order(order("c", Side::Ask, Role::Hedger, dec!(1)));

        assert_eq!(store.orders(&market(), None, None).len(), 3);
        assert_eq!(store.orders(&market(), Some(Side::Ask), None).len(), 2);
        assert_eq!(
            store
                .orders(&market(), Some(Side::Ask), Some(Role::Hedger))
                .len(),
            1
        );
    }

    #[test]
    fn reconcile_within_lot_is_noop() {
        let store = StateStore::new();
        store.update_inventory(&market(), dec!(0.5000));

        let outcome = store.reconcile_position(
            &market(),
            dec!(0.5001),
            dec!(100),
            dec!(0.0001),
            SystemTime::now(),
        );
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert_eq!(store.inventory(&market()), dec!(0.5000));
    }

    #[test]
    fn reconcile_snaps_and_is_idempotent() {
        let store = StateStore::new();
        store.apply_fill(
            &market(),
            None,
            Side::Bid,
            dec!(0.5),
            dec!(100),
            Decimal::ZERO,
            SystemTime::now(),
        );

        let outcome = store.reconcile_position(
            &market(),
            dec!(0.8),
            dec!(102),
            dec!(0.0001),
            SystemTime::now(),
        );
        assert_eq!(
            outcome,
            ReconcileOutcome::Snapped {
                local: dec!(0.5),
                exchange: dec!(0.8),
            }
        );
        assert_eq!(store.inventory(&market()), dec!(0.8));
        // Lot queue was rebased along with the snap.
        let (_, size) = store.cost_basis(&market());
        assert_eq!(size, dec!(0.8));

        // Same snapshot again: nothing to do.
        let again = store.reconcile_position(
            &market(),
            dec!(0.8),
            dec!(102),
            dec!(0.0001),
            SystemTime::now(),
        );
        assert_eq!(again, ReconcileOutcome::InSync);
    }

    #[test]
    fn market_view_is_one_shot_consistent() {
        let store = StateStore::new();
        assert!(store.market_view(&market()).is_none());

        store.set_mid(&market(), dec!(143), SystemTime::now(), false);
        store.update_inventory(&market(), dec!(0.25));
        store.add_order(order("a", Side::Bid, Role::Maker, dec!(1)));

        let view = store.market_view(&market()).unwrap();
        assert_eq!(view.mid.price, dec!(143));
        assert_eq!(view.inventory, dec!(0.25));
        assert_eq!(view.orders.len(), 1);
    }
}
