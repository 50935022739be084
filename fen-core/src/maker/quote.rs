//! Quote formation: spread math and exchange-grid quantization.
//!
//! Bid prices round down to the tick and ask prices round up, so
//! quantization can only widen the spread, never cross it. Sizes snap down
//! to the lot grid and are then lifted to the smallest conforming lot
//! multiple when the exchange minima demand it; a size that would exceed the
//! clip cap aborts the market for the cycle.

use super::feature::Adjustment;
use crate::config::{MakerConfig, MarketSpec};
use crate::execution::Side;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteIntent {
    pub price: Decimal,
    pub size: Decimal,
}

/// Intended two-sided quote; a gated or unformable side is None.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuotePair {
    pub bid: Option<QuoteIntent>,
    pub ask: Option<QuoteIntent>,
}

/// Conditions that abort quoting the market for this cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteAbort {
    #[error("{side} size {size} exceeds clip cap {max}")]
    ClipTooLarge {
        side: Side,
        size: Decimal,
        max: Decimal,
    },
    #[error("quote prices degenerate at mid {mid}")]
    DegeneratePrice { mid: Decimal },
}

/// Form the cycle's quotes from the composed feature adjustment.
pub fn form_quotes(
    mid: Decimal,
    config: &MakerConfig,
    spec: &MarketSpec,
    adjustment: &Adjustment,
) -> Result<QuotePair, QuoteAbort> {
    let bps = Decimal::from(10_000);

    let spread_bps = (config.base_spread_bps + adjustment.spread_delta_bps)
        .max(config.min_spread_bps);
    let half_spread_bps = spread_bps / Decimal::TWO;

    let raw_bid = mid * (Decimal::ONE - half_spread_bps / bps);
    let raw_ask = mid * (Decimal::ONE + half_spread_bps / bps);
    let raw_size = config.base_size * adjustment.size_multiplier;

    let mut pair = QuotePair::default();

    if !adjustment.gates.bid {
        let price = spec.round_price_down(raw_bid);
        if price <= Decimal::ZERO || price >= mid {
            return Err(QuoteAbort::DegeneratePrice { mid });
        }
        pair.bid = Some(size_for(Side::Bid, price, raw_size, config, spec)?);
    }

    if !adjustment.gates.ask {
        let price = spec.round_price_up(raw_ask);
        if price <= mid {
            return Err(QuoteAbort::DegeneratePrice { mid });
        }
        pair.ask = Some(size_for(Side::Ask, price, raw_size, config, spec)?);
    }

    Ok(pair)
}

fn size_for(
    side: Side,
    price: Decimal,
    raw_size: Decimal,
    config: &MakerConfig,
    spec: &MarketSpec,
) -> Result<QuoteIntent, QuoteAbort> {
    let mut size = spec.round_size_down(raw_size);

    let below_minima =
        size < spec.exchange_min_size || price * size < spec.exchange_min_notional;
    if below_minima {
        size = spec
            .min_conforming_size(price)
            .ok_or(QuoteAbort::DegeneratePrice { mid: price })?;
    }

    if size > config.max_clip_size {
        return Err(QuoteAbort::ClipTooLarge {
            side,
            size,
            max: config.max_clip_size,
        });
    }

    Ok(QuoteIntent { price, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketId;
    use crate::maker::feature::SideGates;
    use rust_decimal_macros::dec;

    fn spec() -> MarketSpec {
        MarketSpec {
            id: MarketId::from("market:2"),
            price_scale: 2,
            size_scale: 4,
            exchange_min_size: dec!(0.001),
            exchange_min_notional: dec!(10),
        }
    }

    fn config() -> MakerConfig {
        MakerConfig {
            base_spread_bps: dec!(10),
            min_spread_bps: dec!(1),
            base_size: dec!(0.5),
            max_clip_size: dec!(5),
            ..MakerConfig::default()
        }
    }

    #[test]
    fn bid_rounds_down_ask_rounds_up() {
        let pair = form_quotes(dec!(143.00), &config(), &spec(), &Adjustment::neutral()).unwrap();
        let bid = pair.bid.unwrap();
        let ask = pair.ask.unwrap();

        // half spread = 5bps of 143.00 = 0.0715
        assert_eq!(bid.price, dec!(142.92)); // 142.9285 floored to tick
        assert_eq!(ask.price, dec!(143.08)); // 143.0715 ceiled to tick
        assert!(bid.price < dec!(143.00) && dec!(143.00) < ask.price);
        assert_eq!(bid.size, dec!(0.5));
    }

    #[test]
    fn spread_floor_applies() {
        let cfg = MakerConfig {
            base_spread_bps: dec!(2),
            min_spread_bps: dec!(10),
            ..config()
        };
        let adj = Adjustment {
            spread_delta_bps: dec!(-5),
            ..Adjustment::neutral()
        };
        let pair = form_quotes(dec!(100), &cfg, &spec(), &adj).unwrap();
        // Floor of 10bps => half spread 0.05.
        assert_eq!(pair.bid.unwrap().price, dec!(99.95));
        assert_eq!(pair.ask.unwrap().price, dec!(100.05));
    }

    #[test]
    fn gates_drop_sides() {
        let adj = Adjustment {
            gates: SideGates::bid_only(),
            ..Adjustment::neutral()
        };
        let pair = form_quotes(dec!(143), &config(), &spec(), &adj).unwrap();
        assert!(pair.bid.is_none());
        assert!(pair.ask.is_some());
    }

    #[test]
    fn undersized_quote_lifts_to_notional_floor() {
        let adj = Adjustment {
            size_multiplier: dec!(0.1), // raw size 0.05 => notional ~7.15 < 10
            ..Adjustment::neutral()
        };
        let pair = form_quotes(dec!(143.00), &config(), &spec(), &adj).unwrap();
        let bid = pair.bid.unwrap();

        assert!(bid.price * bid.size >= dec!(10));
        // Smallest lot multiple clearing the floor, not a big jump.
        assert!(bid.price * (bid.size - dec!(0.0001)) < dec!(10));
    }

    #[test]
    fn oversized_clip_aborts_cycle() {
        let adj = Adjustment {
            size_multiplier: dec!(100),
            ..Adjustment::neutral()
        };
        let result = form_quotes(dec!(143.00), &config(), &spec(), &adj);
        assert!(matches!(result, Err(QuoteAbort::ClipTooLarge { .. })));
    }

    #[test]
    fn quantization_never_crosses() {
        // A tiny spread on a coarse tick still quantizes outward.
        let cfg = MakerConfig {
            base_spread_bps: dec!(1),
            min_spread_bps: dec!(1),
            ..config()
        };
        let pair = form_quotes(dec!(143.005), &cfg, &spec(), &Adjustment::neutral()).unwrap();
        let bid = pair.bid.unwrap().price;
        let ask = pair.ask.unwrap().price;
        assert!(bid < dec!(143.005));
        assert!(ask > dec!(143.005));
        assert!(bid < ask);
    }
}
