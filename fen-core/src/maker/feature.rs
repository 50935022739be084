//! Pluggable quote adjustment interface.
//!
//! Each feature is a transformer over a shared read-only context: it
//! contributes a spread delta in bps, a size multiplier, and a set of side
//! gates. Contributions compose by summing spreads, multiplying sizes and
//! unioning gates, so evaluation order carries no semantics. The quoting
//! loop works with every feature disabled.

use rust_decimal::Decimal;
use std::time::Instant;

/// Sides a feature wants withheld this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideGates {
    pub bid: bool,
    pub ask: bool,
}

impl SideGates {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn bid_only() -> Self {
        Self {
            bid: true,
            ask: false,
        }
    }

    pub fn ask_only() -> Self {
        Self {
            bid: false,
            ask: true,
        }
    }

    pub fn both() -> Self {
        Self {
            bid: true,
            ask: true,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            bid: self.bid || other.bid,
            ask: self.ask || other.ask,
        }
    }

    pub fn all_gated(self) -> bool {
        self.bid && self.ask
    }
}

/// One feature's contribution for a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    /// Added to the base spread, in basis points.
    pub spread_delta_bps: Decimal,
    /// Multiplied into the quote size.
    pub size_multiplier: Decimal,
    pub gates: SideGates,
}

impl Adjustment {
    pub fn neutral() -> Self {
        Self {
            spread_delta_bps: Decimal::ZERO,
            size_multiplier: Decimal::ONE,
            gates: SideGates::none(),
        }
    }

    /// Fold another contribution in: spreads sum, sizes multiply, gates
    /// union.
    pub fn merge(&mut self, other: &Adjustment) {
        self.spread_delta_bps += other.spread_delta_bps;
        self.size_multiplier *= other.size_multiplier;
        self.gates = self.gates.union(other.gates);
    }
}

impl Default for Adjustment {
    fn default() -> Self {
        Self::neutral()
    }
}

/// State changes the engine pushes into features ahead of each adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketEvent {
    Mid {
        mid: Decimal,
        at: Instant,
    },
    /// Cumulative realized PnL for the feature's market.
    Realized {
        total: Decimal,
        at: Instant,
    },
    Inventory {
        inventory: Decimal,
        at: Instant,
    },
}

/// Read-only context for one adjustment call.
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext {
    pub mid: Decimal,
    pub inventory: Decimal,
    /// The guard's unit cap; features use it as the soft-cap reference.
    pub max_position_units: Decimal,
    pub now: Instant,
}

pub trait QuoteFeature: Send {
    fn name(&self) -> &'static str;

    /// Disabled features are skipped entirely by the engine.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Ingest a state change. Called before `adjust` on every cycle and on
    /// notable events between cycles.
    fn update(&mut self, event: &MarketEvent);

    /// Produce this cycle's contribution.
    fn adjust(&mut self, ctx: &FeatureContext) -> Adjustment;
}
