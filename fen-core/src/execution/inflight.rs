//! In-flight request discipline.
//!
//! At most one submit or cancel may be outstanding per
//! `(market, side, role)`. Callers acquire a permit before issuing the
//! request; the slot frees when the permit drops, so early returns and error
//! paths cannot leak a reservation.

use crate::config::MarketId;
use crate::execution::{Role, Side};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

type SlotKey = (MarketId, Side, Role);

#[derive(Clone, Default)]
pub struct InflightGate {
    slots: Arc<Mutex<HashSet<SlotKey>>>,
}

impl InflightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to reserve the slot. Returns None while a prior request for the
    /// same tuple is still in flight.
    pub fn acquire(&self, market: &MarketId, side: Side, role: Role) -> Option<InflightPermit> {
        let key = (market.clone(), side, role);
        let mut slots = self.slots.lock();
        if !slots.insert(key.clone()) {
            return None;
        }
        Some(InflightPermit {
            gate: self.clone(),
            key,
        })
    }

    pub fn in_flight(&self, market: &MarketId, side: Side, role: Role) -> bool {
        self.slots
            .lock()
            .contains(&(market.clone(), side, role))
    }

    fn release(&self, key: &SlotKey) {
        self.slots.lock().remove(key);
    }
}

/// RAII reservation of one `(market, side, role)` slot.
pub struct InflightPermit {
    gate: InflightGate,
    key: SlotKey,
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        self.gate.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> MarketId {
        MarketId::from("market:2")
    }

    #[test]
    fn second_acquire_is_refused() {
        let gate = InflightGate::new();
        let permit = gate.acquire(&market(), Side::Bid, Role::Maker);
        assert!(permit.is_some());
        assert!(gate.acquire(&market(), Side::Bid, Role::Maker).is_none());
    }

    #[test]
    fn slot_frees_on_drop() {
        let gate = InflightGate::new();
        {
            let _permit = gate.acquire(&market(), Side::Ask, Role::Hedger).unwrap();
            assert!(gate.in_flight(&market(), Side::Ask, Role::Hedger));
        }
        assert!(!gate.in_flight(&market(), Side::Ask, Role::Hedger));
        assert!(gate.acquire(&market(), Side::Ask, Role::Hedger).is_some());
    }

    #[test]
    fn tuples_are_independent() {
        let gate = InflightGate::new();
        let _a = gate.acquire(&market(), Side::Bid, Role::Maker).unwrap();
        // Same side, different role is a distinct slot.
        let _b = gate.acquire(&market(), Side::Bid, Role::Hedger).unwrap();
        let _c = gate.acquire(&market(), Side::Ask, Role::Maker).unwrap();
        let other = MarketId::from("market:9");
        let _d = gate.acquire(&other, Side::Bid, Role::Maker).unwrap();
    }
}
