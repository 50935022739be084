//! Synthetic mid generation for feed outages.
//!
//! When the real feed goes dark, downstream components still need mids to
//! exercise their logic, so the ingestor emits a bounded random walk around
//! the last real mid. Synthetic points are flagged as such and the guard
//! refuses to price orders off them.

use crate::config::MarketId;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub struct SyntheticWalk {
    /// One walk step is at most this many bps of the anchor.
    step_bps: Decimal,
    /// The walk never strays further than this many bps from the anchor.
    band_bps: Decimal,
    anchors: HashMap<MarketId, Decimal>,
    current: HashMap<MarketId, Decimal>,
}

impl SyntheticWalk {
    pub fn new(step_bps: Decimal, band_bps: Decimal) -> Self {
        Self {
            step_bps,
            band_bps,
            anchors: HashMap::new(),
            current: HashMap::new(),
        }
    }

    /// Record a real mid; resets the walk anchor for the market.
    pub fn observe_real(&mut self, market: &MarketId, mid: Decimal) {
        self.anchors.insert(market.clone(), mid);
        self.current.insert(market.clone(), mid);
    }

    /// Produce the next synthetic mid, or None if no real mid was ever seen
    /// for the market.
    pub fn next_mid(&mut self, market: &MarketId) -> Option<Decimal> {
        let anchor = *self.anchors.get(market)?;
        let current = *self.current.get(market).unwrap_or(&anchor);

        let step_fraction: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        let step = anchor * self.step_bps / Decimal::from(10_000)
            * Decimal::try_from(step_fraction).unwrap_or(Decimal::ZERO);

        let band = anchor * self.band_bps / Decimal::from(10_000);
        let next = (current + step)
            .max(anchor - band)
            .min(anchor + band);

        self.current.insert(market.clone(), next);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> MarketId {
        MarketId::from("market:2")
    }

    #[test]
    fn no_walk_without_a_real_observation() {
        let mut walk = SyntheticWalk::new(dec!(2), dec!(50));
        assert_eq!(walk.next_mid(&market()), None);
    }

    #[test]
    fn walk_stays_inside_the_band() {
        let mut walk = SyntheticWalk::new(dec!(10), dec!(50));
        walk.observe_real(&market(), dec!(100));

        let lo = dec!(99.5);
        let hi = dec!(100.5);
        for _ in 0..500 {
            let mid = walk.next_mid(&market()).unwrap();
            assert!(mid >= lo && mid <= hi, "walked outside band: {}", mid);
        }
    }

    #[test]
    fn real_observation_resets_the_anchor() {
        let mut walk = SyntheticWalk::new(dec!(10), dec!(50));
        walk.observe_real(&market(), dec!(100));
        for _ in 0..50 {
            walk.next_mid(&market());
        }

        walk.observe_real(&market(), dec!(200));
        let mid = walk.next_mid(&market()).unwrap();
        assert!(mid >= dec!(199) && mid <= dec!(201));
    }
}
