//! Guard verdicts and rejection reasons.

use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;

/// Outcome of pre-trade validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Accepted,
    Rejected(RejectReason),
}

impl GuardVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GuardVerdict::Accepted)
    }
}

/// Why an order was refused. Checks run in a fixed order and short-circuit,
/// so exactly one reason is reported per rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Kill-switch latch is engaged (maker only).
    Latched,
    /// Maker quoting is temporarily suspended (reconcile cooldown, ledger
    /// degradation).
    Suspended,
    /// Market was never registered at startup.
    UnknownMarket,
    /// No mid exists for the market yet.
    NoMid,
    /// Price is outside the allowed band around mid.
    PriceBand {
        price: Decimal,
        mid: Decimal,
        band_bps: Decimal,
    },
    /// Passive order would cross the book.
    CrossedBook { price: Decimal, mid: Decimal },
    /// Taker order would trade against one of our own resting orders.
    SelfTrade { price: Decimal },
    /// Fill would push inventory past the unit or notional cap.
    InventoryCap {
        would_be: Decimal,
        max_units: Decimal,
        max_notional: Decimal,
    },
    /// Below the exchange minimum size.
    BelowMinSize { size: Decimal, min: Decimal },
    /// Below the exchange minimum notional.
    BelowMinNotional { notional: Decimal, min: Decimal },
    /// Price is not a multiple of the tick size.
    OffTick { price: Decimal, tick: Decimal },
    /// Size is not a multiple of the lot size.
    OffLot { size: Decimal, lot: Decimal },
    /// Mid is synthetic; orders must not price off it.
    SyntheticMid,
    /// Mid is older than the freshness bound.
    StaleMid { age: Duration, max_age: Duration },
}

impl RejectReason {
    /// Short stable tag for counters and events.
    pub fn tag(&self) -> &'static str {
        match self {
            RejectReason::Latched => "latched",
            RejectReason::Suspended => "suspended",
            RejectReason::UnknownMarket => "unknown_market",
            RejectReason::NoMid => "no_mid",
            RejectReason::PriceBand { .. } => "price_band",
            RejectReason::CrossedBook { .. } => "crossed_book",
            RejectReason::SelfTrade { .. } => "self_trade",
            RejectReason::InventoryCap { .. } => "inventory_cap",
            RejectReason::BelowMinSize { .. } => "below_min_size",
            RejectReason::BelowMinNotional { .. } => "below_min_notional",
            RejectReason::OffTick { .. } => "off_tick",
            RejectReason::OffLot { .. } => "off_lot",
            RejectReason::SyntheticMid => "synthetic_mid",
            RejectReason::StaleMid { .. } => "stale_mid",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Latched => write!(f, "kill-switch latch engaged"),
            RejectReason::Suspended => write!(f, "maker quoting suspended"),
            RejectReason::UnknownMarket => write!(f, "market not registered"),
            RejectReason::NoMid => write!(f, "no mid for market"),
            RejectReason::PriceBand { price, mid, band_bps } => {
                write!(f, "price {} outside {}bps band around mid {}", price, band_bps, mid)
            }
            RejectReason::CrossedBook { price, mid } => {
                write!(f, "price {} would cross the book (mid {})", price, mid)
            }
            RejectReason::SelfTrade { price } => {
                write!(f, "taker at {} would hit our own resting order", price)
            }
            RejectReason::InventoryCap {
                would_be,
                max_units,
                max_notional,
            } => write!(
                f,
                "inventory after fill {} exceeds caps ({} units / {} notional)",
                would_be, max_units, max_notional
            ),
            RejectReason::BelowMinSize { size, min } => {
                write!(f, "size {} below exchange minimum {}", size, min)
            }
            RejectReason::BelowMinNotional { notional, min } => {
                write!(f, "notional {} below exchange minimum {}", notional, min)
            }
            RejectReason::OffTick { price, tick } => {
                write!(f, "price {} not on tick {}", price, tick)
            }
            RejectReason::OffLot { size, lot } => {
                write!(f, "size {} not on lot {}", size, lot)
            }
            RejectReason::SyntheticMid => write!(f, "mid is synthetic"),
            RejectReason::StaleMid { age, max_age } => {
                write!(f, "mid age {:?} exceeds {:?}", age, max_age)
            }
        }
    }
}
