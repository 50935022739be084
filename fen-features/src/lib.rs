//! Quote features for the fen maker engine.
//!
//! Each module implements [`fen_core::maker::QuoteFeature`]: a transformer
//! contributing a spread delta, a size multiplier and side gates over a
//! shared read-only context. The engine composes whatever subset
//! configuration enables; the quoting loop is complete with none of them.

pub mod inventory;
pub mod pnl_guard;
pub mod regime;
pub mod trend;
pub mod volatility;

pub use inventory::{InventoryAdjust, InventoryConfig, InventoryTier};
pub use pnl_guard::{PnlGuard, PnlGuardConfig, ReleasePolicy};
pub use regime::{RegimeBundle, RegimeConfig, RegimeSwitcher};
pub use trend::{TrendConfig, TrendFilter};
pub use volatility::{VolatilityBand, VolatilityConfig};

use fen_core::maker::QuoteFeature;
use fen_core::risk::PnlGuardSignal;
use serde::{Deserialize, Serialize};

/// Toggle-and-tune block for the whole feature stack. Disabling a feature
/// is a configuration operation, not a code change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSetConfig {
    #[serde(default)]
    pub trend: Option<TrendConfig>,
    #[serde(default)]
    pub volatility: Option<VolatilityConfig>,
    #[serde(default)]
    pub inventory: Option<InventoryConfig>,
    #[serde(default)]
    pub pnl_guard: Option<PnlGuardConfig>,
    #[serde(default)]
    pub regime: Option<RegimeConfig>,
}

impl FeatureSetConfig {
    /// Everything on, at defaults.
    pub fn all_default() -> Self {
        Self {
            trend: Some(TrendConfig::default()),
            volatility: Some(VolatilityConfig::default()),
            inventory: Some(InventoryConfig::default()),
            pnl_guard: Some(PnlGuardConfig::default()),
            regime: Some(RegimeConfig::default()),
        }
    }
}

/// Build one market's feature stack from configuration. The PnL guard
/// shares its activation signal with the hedger via `signal`.
pub fn build_stack(
    config: &FeatureSetConfig,
    signal: PnlGuardSignal,
) -> Vec<Box<dyn QuoteFeature>> {
    let mut stack: Vec<Box<dyn QuoteFeature>> = Vec::new();
    if let Some(cfg) = &config.trend {
        stack.push(Box::new(TrendFilter::new(cfg.clone())));
    }
    if let Some(cfg) = &config.volatility {
        stack.push(Box::new(VolatilityBand::new(cfg.clone())));
    }
    if let Some(cfg) = &config.inventory {
        stack.push(Box::new(InventoryAdjust::new(cfg.clone())));
    }
    if let Some(cfg) = &config.pnl_guard {
        stack.push(Box::new(PnlGuard::new(cfg.clone(), signal)));
    }
    if let Some(cfg) = &config.regime {
        stack.push(Box::new(RegimeSwitcher::new(cfg.clone())));
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_builds_empty_stack() {
        let stack = build_stack(&FeatureSetConfig::default(), PnlGuardSignal::new());
        assert!(stack.is_empty());
    }

    #[test]
    fn full_config_builds_all_five() {
        let stack = build_stack(&FeatureSetConfig::all_default(), PnlGuardSignal::new());
        let names: Vec<&str> = stack.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec![
                "trend_filter",
                "volatility_band",
                "inventory_adjust",
                "pnl_guard",
                "regime_switcher"
            ]
        );
    }

    #[test]
    fn disabled_flag_survives_construction() {
        let config = FeatureSetConfig {
            trend: Some(TrendConfig {
                enabled: false,
                ..TrendConfig::default()
            }),
            ..FeatureSetConfig::default()
        };
        let stack = build_stack(&config, PnlGuardSignal::new());
        assert_eq!(stack.len(), 1);
        assert!(!stack[0].is_enabled());
    }
}
