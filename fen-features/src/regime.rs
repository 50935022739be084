//! Regime switcher: coarse aggressive/defensive profile selection.
//!
//! Watches its own trend and volatility signals and flips between two
//! parameter bundles. Defensive mode applies its bundle's extra spread and
//! size cut and is held for a minimum dwell so the profile does not flap on
//! every borderline cycle.

use fen_core::maker::{Adjustment, FeatureContext, MarketEvent, QuoteFeature, SideGates};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeBundle {
    pub extra_spread_bps: Decimal,
    pub size_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub enabled: bool,

    /// Lookback for the trend measure.
    pub lookback_secs: u64,

    /// Absolute move (bps over lookback) that reads as trending.
    pub trend_threshold_bps: Decimal,

    /// EWMA absolute-change level (bps) that reads as volatile.
    pub vol_threshold_bps: Decimal,
    /// EWMA smoothing numerator out of 1000.
    pub vol_alpha_millis: u32,

    /// Minimum dwell in defensive mode.
    pub min_defensive_secs: u64,

    pub aggressive: RegimeBundle,
    pub defensive: RegimeBundle,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_secs: 60,
            trend_threshold_bps: dec!(20),
            vol_threshold_bps: dec!(15),
            vol_alpha_millis: 200,
            min_defensive_secs: 60,
            aggressive: RegimeBundle {
                extra_spread_bps: Decimal::ZERO,
                size_multiplier: Decimal::ONE,
            },
            defensive: RegimeBundle {
                extra_spread_bps: dec!(6),
                size_multiplier: dec!(0.5),
            },
        }
    }
}

pub struct RegimeSwitcher {
    config: RegimeConfig,
    history: VecDeque<(Instant, Decimal)>,
    ewma_bps: Decimal,
    last_mid: Option<Decimal>,
    defensive_since: Option<Instant>,
}

impl RegimeSwitcher {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            ewma_bps: Decimal::ZERO,
            last_mid: None,
            defensive_since: None,
        }
    }

    pub fn is_defensive(&self) -> bool {
        self.defensive_since.is_some()
    }

    fn trend_bps(&self) -> Decimal {
        match (self.history.front(), self.history.back()) {
            (Some((_, oldest)), Some((_, latest)))
                if self.history.len() >= 2 && !oldest.is_zero() =>
            {
                ((latest - oldest) / oldest * Decimal::from(10_000)).abs()
            }
            _ => Decimal::ZERO,
        }
    }
}

impl QuoteFeature for RegimeSwitcher {
    fn name(&self) -> &'static str {
        "regime_switcher"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn update(&mut self, event: &MarketEvent) {
        let MarketEvent::Mid { mid, at } = event else {
            return;
        };

        if let Some(last) = self.last_mid {
            if last > Decimal::ZERO {
                let change_bps = ((*mid - last).abs() / last) * Decimal::from(10_000);
                let alpha = Decimal::from(self.config.vol_alpha_millis) / dec!(1000);
                self.ewma_bps = alpha * change_bps + (Decimal::ONE - alpha) * self.ewma_bps;
            }
        }
        self.last_mid = Some(*mid);

        self.history.push_back((*at, *mid));
        let horizon = Duration::from_secs(self.config.lookback_secs);
        while let Some((t, _)) = self.history.front() {
            if at.saturating_duration_since(*t) > horizon {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn adjust(&mut self, ctx: &FeatureContext) -> Adjustment {
        let stressed = self.trend_bps() >= self.config.trend_threshold_bps
            || self.ewma_bps >= self.config.vol_threshold_bps;

        match (self.defensive_since, stressed) {
            (None, true) => {
                debug!(trend = %self.trend_bps(), vol = %self.ewma_bps, "regime -> defensive");
                self.defensive_since = Some(ctx.now);
            }
            (Some(since), false) => {
                let dwell = Duration::from_secs(self.config.min_defensive_secs);
                if ctx.now.saturating_duration_since(since) >= dwell {
                    debug!("regime -> aggressive");
                    self.defensive_since = None;
                }
            }
            _ => {}
        }

        let bundle = if self.defensive_since.is_some() {
            &self.config.defensive
        } else {
            &self.config.aggressive
        };
        Adjustment {
            spread_delta_bps: bundle.extra_spread_bps,
            size_multiplier: bundle.size_multiplier,
            gates: SideGates::none(),
        }
    }
}
