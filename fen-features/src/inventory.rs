//! Inventory adjust: lean away from existing exposure.
//!
//! Past the asymmetry threshold the side that would add to exposure is
//! gated outright, and tiered spread bonuses / size cuts kick in as the
//! position grows. The highest tier at or below the current gross position
//! applies.

use fen_core::maker::{Adjustment, FeatureContext, MarketEvent, QuoteFeature, SideGates};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryTier {
    /// Gross inventory (base units) at which this tier starts applying.
    pub units: Decimal,
    pub extra_spread_bps: Decimal,
    pub size_multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub enabled: bool,

    /// Gross inventory past which the adding side is gated.
    pub asym_threshold_units: Decimal,

    /// Ascending tiers; the last whose `units` is <= |inventory| applies.
    pub tiers: Vec<InventoryTier>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            asym_threshold_units: dec!(0.25),
            tiers: vec![
                InventoryTier {
                    units: dec!(0.25),
                    extra_spread_bps: dec!(2),
                    size_multiplier: dec!(0.75),
                },
                InventoryTier {
                    units: dec!(0.5),
                    extra_spread_bps: dec!(5),
                    size_multiplier: dec!(0.5),
                },
                InventoryTier {
                    units: dec!(1),
                    extra_spread_bps: dec!(10),
                    size_multiplier: dec!(0.25),
                },
            ],
        }
    }
}

pub struct InventoryAdjust {
    config: InventoryConfig,
}

impl InventoryAdjust {
    pub fn new(config: InventoryConfig) -> Self {
        Self { config }
    }

    fn tier_for(&self, gross: Decimal) -> Option<&InventoryTier> {
        self.config
            .tiers
            .iter()
            .rev()
            .find(|tier| gross >= tier.units)
    }
}

impl QuoteFeature for InventoryAdjust {
    fn name(&self) -> &'static str {
        "inventory_adjust"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn update(&mut self, _event: &MarketEvent) {
        // Stateless: inventory arrives through the context.
    }

    fn adjust(&mut self, ctx: &FeatureContext) -> Adjustment {
        let gross = ctx.inventory.abs();

        let gates = if gross > self.config.asym_threshold_units {
            if ctx.inventory > Decimal::ZERO {
                // Long: buying adds exposure.
                SideGates::bid_only()
            } else {
                SideGates::ask_only()
            }
        } else {
            SideGates::none()
        };

        match self.tier_for(gross) {
            Some(tier) => Adjustment {
                spread_delta_bps: tier.extra_spread_bps,
                size_multiplier: tier.size_multiplier,
                gates,
            },
            None => Adjustment {
                spread_delta_bps: Decimal::ZERO,
                size_multiplier: Decimal::ONE,
                gates,
            },
        }
    }
}
