//! Volatility band: widen in chop, stand aside in extremes.
//!
//! An EWMA of the absolute mid-to-mid change (in bps) scales the spread
//! contribution between a floor and a ceiling. Past the pause threshold the
//! feature gates both sides; it resumes only once volatility has fallen
//! below the resume threshold AND inventory is inside a quarter of the soft
//! cap, so a paused book is not re-entered while carrying exposure.

use fen_core::maker::{Adjustment, FeatureContext, MarketEvent, QuoteFeature, SideGates};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    pub enabled: bool,

    /// EWMA half-life measured in mid updates.
    pub half_life_updates: u32,

    /// Spread contribution at zero volatility.
    pub min_band_bps: Decimal,
    /// Spread contribution at (and beyond) the pause threshold.
    pub max_band_bps: Decimal,

    /// EWMA level (bps) that pauses quoting entirely.
    pub pause_threshold_bps: Decimal,
    /// EWMA level below which quoting may resume.
    pub resume_threshold_bps: Decimal,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life_updates: 20,
            min_band_bps: Decimal::ZERO,
            max_band_bps: dec!(8),
            pause_threshold_bps: dec!(25),
            resume_threshold_bps: dec!(12),
        }
    }
}

pub struct VolatilityBand {
    config: VolatilityConfig,
    alpha: Decimal,
    ewma_bps: Decimal,
    last_mid: Option<Decimal>,
    observations: u32,
    paused: bool,
}

impl VolatilityBand {
    pub fn new(config: VolatilityConfig) -> Self {
        // alpha = 1 - 0.5^(1/half_life)
        let half_life = config.half_life_updates.max(1) as f64;
        let alpha_f = 1.0 - 0.5_f64.powf(1.0 / half_life);
        let alpha = Decimal::try_from(alpha_f).unwrap_or(dec!(0.05));
        Self {
            config,
            alpha,
            ewma_bps: Decimal::ZERO,
            last_mid: None,
            observations: 0,
            paused: false,
        }
    }

    pub fn ewma_bps(&self) -> Decimal {
        self.ewma_bps
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn warmed_up(&self) -> bool {
        self.observations >= 5
    }
}

impl QuoteFeature for VolatilityBand {
    fn name(&self) -> &'static str {
        "volatility_band"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn update(&mut self, event: &MarketEvent) {
        let MarketEvent::Mid { mid, .. } = event else {
            return;
        };
        if let Some(last) = self.last_mid {
            if last > Decimal::ZERO {
                let change_bps = ((*mid - last).abs() / last) * Decimal::from(10_000);
                self.ewma_bps =
                    self.alpha * change_bps + (Decimal::ONE - self.alpha) * self.ewma_bps;
                self.observations += 1;
            }
        }
        self.last_mid = Some(*mid);
    }

    fn adjust(&mut self, ctx: &FeatureContext) -> Adjustment {
        if !self.warmed_up() {
            return Adjustment::neutral();
        }

        if self.ewma_bps > self.config.pause_threshold_bps {
            self.paused = true;
        } else if self.paused {
            let calm = self.ewma_bps < self.config.resume_threshold_bps;
            let inventory_ok =
                ctx.inventory.abs() <= ctx.max_position_units * dec!(0.25);
            if calm && inventory_ok {
                self.paused = false;
            }
        }

        if self.paused {
            return Adjustment {
                spread_delta_bps: self.config.max_band_bps,
                size_multiplier: Decimal::ONE,
                gates: SideGates::both(),
            };
        }

        // Linear scale between the bands, saturating at the pause level.
        let fraction = (self.ewma_bps / self.config.pause_threshold_bps).min(Decimal::ONE);
        let spread = self.config.min_band_bps
            + (self.config.max_band_bps - self.config.min_band_bps) * fraction;

        Adjustment {
            spread_delta_bps: spread,
            size_multiplier: Decimal::ONE,
            gates: SideGates::none(),
        }
    }
}
