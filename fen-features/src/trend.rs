//! Trend filter: stop quoting into a running market.
//!
//! Keeps a short mid history and measures the signed move over the lookback.
//! A fast move down gates the bid (the side the move would fill) for a
//! cooldown and widens the spread; fast moves up do the symmetric thing to
//! the ask.

use fen_core::maker::{Adjustment, FeatureContext, MarketEvent, QuoteFeature, SideGates};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub enabled: bool,

    /// History window used to measure the move.
    pub lookback_secs: u64,

    /// Move (in bps over the lookback) that arms the down reaction.
    pub down_threshold_bps: Decimal,
    /// Spread widening while the down reaction is armed.
    pub down_extra_spread_bps: Decimal,
    /// How long the bid stays gated after a down move.
    pub down_cooldown_secs: u64,

    /// Symmetric parameters for up moves.
    pub up_threshold_bps: Decimal,
    pub up_extra_spread_bps: Decimal,
    pub up_cooldown_secs: u64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_secs: 45,
            down_threshold_bps: dec!(15),
            down_extra_spread_bps: dec!(4),
            down_cooldown_secs: 30,
            up_threshold_bps: dec!(15),
            up_extra_spread_bps: dec!(4),
            up_cooldown_secs: 30,
        }
    }
}

pub struct TrendFilter {
    config: TrendConfig,
    history: VecDeque<(Instant, Decimal)>,
    bid_gate_until: Option<Instant>,
    ask_gate_until: Option<Instant>,
}

impl TrendFilter {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            bid_gate_until: None,
            ask_gate_until: None,
        }
    }

    fn lookback(&self) -> Duration {
        Duration::from_secs(self.config.lookback_secs)
    }

    /// Signed move over the lookback in bps, once the window has both ends.
    fn change_bps(&self) -> Option<Decimal> {
        let (_, oldest) = self.history.front()?;
        let (_, latest) = self.history.back()?;
        if oldest.is_zero() || self.history.len() < 2 {
            return None;
        }
        Some((latest - oldest) / oldest * Decimal::from(10_000))
    }
}

impl QuoteFeature for TrendFilter {
    fn name(&self) -> &'static str {
        "trend_filter"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn update(&mut self, event: &MarketEvent) {
        if let MarketEvent::Mid { mid, at } = event {
            self.history.push_back((*at, *mid));
            let horizon = self.lookback();
            while let Some((t, _)) = self.history.front() {
                if at.saturating_duration_since(*t) > horizon {
                    self.history.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn adjust(&mut self, ctx: &FeatureContext) -> Adjustment {
        if let Some(change) = self.change_bps() {
            if change <= -self.config.down_threshold_bps {
                self.bid_gate_until =
                    Some(ctx.now + Duration::from_secs(self.config.down_cooldown_secs));
            }
            if change >= self.config.up_threshold_bps {
                self.ask_gate_until =
                    Some(ctx.now + Duration::from_secs(self.config.up_cooldown_secs));
            }
        }

        let bid_gated = matches!(self.bid_gate_until, Some(until) if until > ctx.now);
        let ask_gated = matches!(self.ask_gate_until, Some(until) if until > ctx.now);

        let mut spread = Decimal::ZERO;
        if bid_gated {
            spread += self.config.down_extra_spread_bps;
        }
        if ask_gated {
            spread += self.config.up_extra_spread_bps;
        }

        Adjustment {
            spread_delta_bps: spread,
            size_multiplier: Decimal::ONE,
            gates: SideGates {
                bid: bid_gated,
                ask: ask_gated,
            },
        }
    }
}
