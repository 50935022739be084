//! Configuration types for the trading core.
//!
//! Markets are registered at startup from configuration and their metadata is
//! immutable afterwards. Component configs carry plain numeric duration fields
//! (`*_secs` / `*_ms`) so they deserialize from flat TOML/JSON; accessor
//! methods convert to `Duration`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque market key, e.g. `"market:2"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketId(String);

impl MarketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Immutable per-market metadata.
///
/// `price_scale` / `size_scale` are the integer decimal multipliers used when
/// encoding orders for the wire; tick and lot sizes are derived from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSpec {
    pub id: MarketId,

    /// Number of decimal places in wire-encoded prices.
    pub price_scale: u32,

    /// Number of decimal places in wire-encoded sizes.
    pub size_scale: u32,

    /// Minimum base-unit order size accepted by the exchange.
    pub exchange_min_size: Decimal,

    /// Minimum price × size in quote currency.
    pub exchange_min_notional: Decimal,
}

impl MarketSpec {
    /// Smallest representable price increment.
    pub fn tick_size(&self) -> Decimal {
        Decimal::new(1, self.price_scale)
    }

    /// Smallest representable size increment.
    pub fn lot_size(&self) -> Decimal {
        Decimal::new(1, self.size_scale)
    }

    /// Encode a price as the wire integer (`price * 10^price_scale`).
    /// Returns None if the price is not on a tick boundary.
    pub fn encode_price(&self, price: Decimal) -> Option<i64> {
        encode_scaled(price, self.price_scale)
    }

    /// Encode a size as the wire integer (`size * 10^size_scale`).
    /// Returns None if the size is not on a lot boundary.
    pub fn encode_size(&self, size: Decimal) -> Option<i64> {
        encode_scaled(size, self.size_scale)
    }

    pub fn round_price_down(&self, price: Decimal) -> Decimal {
        round_down(price, self.tick_size())
    }

    pub fn round_price_up(&self, price: Decimal) -> Decimal {
        round_up(price, self.tick_size())
    }

    pub fn round_size_down(&self, size: Decimal) -> Decimal {
        round_down(size, self.lot_size())
    }

    pub fn round_size_up(&self, size: Decimal) -> Decimal {
        round_up(size, self.lot_size())
    }

    /// Smallest lot multiple that clears both exchange minima at the given
    /// price: `size >= exchange_min_size` and
    /// `size * price >= exchange_min_notional`.
    pub fn min_conforming_size(&self, price: Decimal) -> Option<Decimal> {
        if price <= Decimal::ZERO {
            return None;
        }
        let by_size = round_up(self.exchange_min_size, self.lot_size());
        let by_notional = round_up(self.exchange_min_notional / price, self.lot_size());
        Some(by_size.max(by_notional))
    }
}

fn round_down(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).floor() * step
}

fn round_up(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).ceil() * step
}

fn encode_scaled(value: Decimal, scale: u32) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    let scaled = value * pow10(scale);
    if scaled != scaled.trunc() {
        return None;
    }
    scaled.to_i64()
}

fn pow10(scale: u32) -> Decimal {
    let mut v = Decimal::ONE;
    for _ in 0..scale {
        v *= dec!(10);
    }
    v
}

/// Maker engine configuration (per deployment; applies to every quoted market).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerConfig {
    /// Quote refresh cadence in milliseconds (jitter is applied on top).
    #[serde(default = "default_refresh_ms")]
    pub refresh_interval_ms: u64,

    /// Jitter applied to the refresh cadence, in milliseconds.
    #[serde(default = "default_refresh_jitter_ms")]
    pub refresh_jitter_ms: u64,

    /// Base half-spread input in basis points (full spread before features).
    pub base_spread_bps: Decimal,

    /// Floor for the composed spread in basis points.
    #[serde(default = "default_min_spread_bps")]
    pub min_spread_bps: Decimal,

    /// Base order size in base units (before feature multipliers).
    pub base_size: Decimal,

    /// Hard cap on a single quoted order's size; exceeding it aborts the
    /// market for the cycle.
    pub max_clip_size: Decimal,

    /// Price tolerance for sticky quotes: an existing order within this
    /// distance of the intended price is left resting.
    #[serde(default = "default_price_epsilon")]
    pub price_epsilon: Decimal,

    /// Size tolerance for sticky quotes.
    #[serde(default = "default_size_epsilon")]
    pub size_epsilon: Decimal,

    /// Cancels permitted in any sliding 60 s window before the maker
    /// throttles replacements.
    #[serde(default = "default_max_cancels")]
    pub max_cancels_per_minute: u32,
}

impl MakerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn refresh_jitter(&self) -> Duration {
        Duration::from_millis(self.refresh_jitter_ms)
    }
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_ms(),
            refresh_jitter_ms: default_refresh_jitter_ms(),
            base_spread_bps: dec!(6),
            min_spread_bps: default_min_spread_bps(),
            base_size: dec!(0.1),
            max_clip_size: dec!(5),
            price_epsilon: default_price_epsilon(),
            size_epsilon: default_size_epsilon(),
            max_cancels_per_minute: default_max_cancels(),
        }
    }
}

/// Hedger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgerConfig {
    /// Inventory magnitude (base units) that arms the hedger.
    pub trigger_units: Decimal,

    /// Inventory notional (quote currency) that arms the hedger, whichever
    /// trips first.
    pub trigger_notional: Decimal,

    /// Inventory magnitude the hedger flattens toward.
    pub target_units: Decimal,

    /// Passive resting offset from mid, in basis points.
    #[serde(default = "default_passive_offset_bps")]
    pub passive_offset_bps: Decimal,

    /// How long a passive clip may rest before escalating.
    #[serde(default = "default_passive_wait_secs")]
    pub passive_wait_secs: u64,

    /// How far an aggressive clip crosses the book, in basis points.
    #[serde(default = "default_aggressive_offset_bps")]
    pub aggressive_offset_bps: Decimal,

    /// Cap on aggressive crossing, in basis points.
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: Decimal,

    /// Largest single clip, in base units.
    pub max_clip_units: Decimal,

    /// Pause between clips.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Clip shrink factor applied while the PnL guard is active (< 1).
    #[serde(default = "default_guard_clip_multiplier")]
    pub guard_clip_multiplier: Decimal,

    /// Clip growth factor in emergency-flatten mode.
    #[serde(default = "default_emergency_clip_multiplier")]
    pub emergency_clip_multiplier: Decimal,

    /// Extra crossing bps in emergency-flatten mode.
    #[serde(default = "default_emergency_extra_bps")]
    pub emergency_extra_cross_bps: Decimal,

    /// Cooldown between clips in emergency-flatten mode.
    #[serde(default = "default_emergency_cooldown_secs")]
    pub emergency_cooldown_secs: u64,

    /// Maker blocked longer than this latches emergency-flatten.
    #[serde(default = "default_emergency_block_secs")]
    pub emergency_block_secs: u64,

    /// Submit retry budget before the market is parked in cooldown anyway.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl HedgerConfig {
    pub fn passive_wait(&self) -> Duration {
        Duration::from_secs(self.passive_wait_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn emergency_cooldown(&self) -> Duration {
        Duration::from_secs(self.emergency_cooldown_secs)
    }

    pub fn emergency_block(&self) -> Duration {
        Duration::from_secs(self.emergency_block_secs)
    }
}

impl Default for HedgerConfig {
    fn default() -> Self {
        Self {
            trigger_units: dec!(0.008),
            trigger_notional: dec!(2000),
            target_units: dec!(0.0005),
            passive_offset_bps: default_passive_offset_bps(),
            passive_wait_secs: default_passive_wait_secs(),
            aggressive_offset_bps: default_aggressive_offset_bps(),
            max_slippage_bps: default_max_slippage_bps(),
            max_clip_units: dec!(1),
            cooldown_secs: default_cooldown_secs(),
            guard_clip_multiplier: default_guard_clip_multiplier(),
            emergency_clip_multiplier: default_emergency_clip_multiplier(),
            emergency_extra_cross_bps: default_emergency_extra_bps(),
            emergency_cooldown_secs: default_emergency_cooldown_secs(),
            emergency_block_secs: default_emergency_block_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Guard configuration: pre-trade validation bands and kill-switch wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Maximum distance of an order price from mid, in basis points.
    pub price_band_bps: Decimal,

    /// Maximum absolute inventory after a hypothetical fill, base units.
    pub max_position_units: Decimal,

    /// Maximum absolute inventory notional after a hypothetical fill.
    pub max_inventory_notional: Decimal,

    /// Oldest acceptable mid for validation, in seconds.
    #[serde(default = "default_max_mid_age_secs")]
    pub max_mid_age_secs: u64,

    /// Latch the global block when a crossed-book rejection occurs.
    #[serde(default)]
    pub kill_on_crossed_book: bool,

    /// Latch the global block when an inventory-cap rejection occurs.
    #[serde(default)]
    pub kill_on_inventory_breach: bool,

    /// Maker suspension after a reconciliation snap, in seconds.
    #[serde(default = "default_reconcile_cooldown_secs")]
    pub reconcile_cooldown_secs: u64,
}

impl GuardConfig {
    pub fn max_mid_age(&self) -> Duration {
        Duration::from_secs(self.max_mid_age_secs)
    }

    pub fn reconcile_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconcile_cooldown_secs)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            price_band_bps: dec!(500),
            max_position_units: dec!(2),
            max_inventory_notional: dec!(50000),
            max_mid_age_secs: default_max_mid_age_secs(),
            kill_on_crossed_book: true,
            kill_on_inventory_breach: true,
            reconcile_cooldown_secs: default_reconcile_cooldown_secs(),
        }
    }
}

/// Market data ingestor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestorConfig {
    /// Seconds without a valid frame before synthetic mids are emitted.
    #[serde(default = "default_synthetic_threshold_secs")]
    pub synthetic_threshold_secs: u64,

    /// Cadence of synthetic mid emission while the feed is dark, in ms.
    #[serde(default = "default_synthetic_interval_ms")]
    pub synthetic_interval_ms: u64,

    /// Bound on one synthetic random-walk step, in basis points.
    #[serde(default = "default_synthetic_step_bps")]
    pub synthetic_step_bps: Decimal,

    /// Total drift bound of the synthetic walk around the last real mid, in
    /// basis points.
    #[serde(default = "default_synthetic_band_bps")]
    pub synthetic_band_bps: Decimal,

    /// Expected server keep-alive cadence in seconds; three misses declare
    /// the connection dead.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Consecutive parse errors on one channel before resubscribing.
    #[serde(default = "default_parse_error_limit")]
    pub parse_error_limit: u32,

    /// Consecutive missed keep-alives before the connection is declared dead.
    #[serde(default = "default_missed_pings")]
    pub missed_ping_limit: u32,

    /// Sustained reconnect failure beyond this raises a structured event.
    #[serde(default = "default_reconnect_alarm_secs")]
    pub reconnect_alarm_secs: u64,
}

impl IngestorConfig {
    pub fn synthetic_threshold(&self) -> Duration {
        Duration::from_secs(self.synthetic_threshold_secs)
    }

    pub fn synthetic_interval(&self) -> Duration {
        Duration::from_millis(self.synthetic_interval_ms)
    }

    pub fn reconnect_alarm(&self) -> Duration {
        Duration::from_secs(self.reconnect_alarm_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            synthetic_threshold_secs: default_synthetic_threshold_secs(),
            synthetic_interval_ms: default_synthetic_interval_ms(),
            synthetic_step_bps: default_synthetic_step_bps(),
            synthetic_band_bps: default_synthetic_band_bps(),
            ping_interval_secs: default_ping_interval_secs(),
            parse_error_limit: default_parse_error_limit(),
            missed_ping_limit: default_missed_pings(),
            reconnect_alarm_secs: default_reconnect_alarm_secs(),
        }
    }
}

/// Fill ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Directory holding the live segment and archives.
    pub dir: std::path::PathBuf,

    /// Live segment size that triggers rotation.
    #[serde(default = "default_ledger_max_bytes")]
    pub max_bytes: u64,

    /// How long appends may sit in the retry buffer before the condition is
    /// reported as fatal.
    #[serde(default = "default_buffer_deadline_secs")]
    pub buffer_deadline_secs: u64,
}

impl LedgerConfig {
    pub fn buffer_deadline(&self) -> Duration {
        Duration::from_secs(self.buffer_deadline_secs)
    }
}

/// Top-level configuration: markets plus one config block per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub markets: Vec<MarketSpec>,
    #[serde(default)]
    pub maker: MakerConfig,
    #[serde(default)]
    pub hedger: HedgerConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub ingestor: IngestorConfig,
    pub ledger: LedgerConfig,
}

fn default_refresh_ms() -> u64 {
    1_000
}
fn default_refresh_jitter_ms() -> u64 {
    150
}
fn default_min_spread_bps() -> Decimal {
    dec!(1)
}
fn default_price_epsilon() -> Decimal {
    Decimal::ZERO
}
fn default_size_epsilon() -> Decimal {
    Decimal::ZERO
}
fn default_max_cancels() -> u32 {
    30
}
fn default_passive_offset_bps() -> Decimal {
    dec!(2)
}
fn default_passive_wait_secs() -> u64 {
    10
}
fn default_aggressive_offset_bps() -> Decimal {
    dec!(5)
}
fn default_max_slippage_bps() -> Decimal {
    dec!(20)
}
fn default_cooldown_secs() -> u64 {
    5
}
fn default_guard_clip_multiplier() -> Decimal {
    dec!(0.5)
}
fn default_emergency_clip_multiplier() -> Decimal {
    dec!(2)
}
fn default_emergency_extra_bps() -> Decimal {
    dec!(5)
}
fn default_emergency_cooldown_secs() -> u64 {
    2
}
fn default_emergency_block_secs() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_max_mid_age_secs() -> u64 {
    5
}
fn default_reconcile_cooldown_secs() -> u64 {
    30
}
fn default_synthetic_threshold_secs() -> u64 {
    30
}
fn default_synthetic_interval_ms() -> u64 {
    500
}
fn default_synthetic_step_bps() -> Decimal {
    dec!(2)
}
fn default_synthetic_band_bps() -> Decimal {
    dec!(50)
}
fn default_ping_interval_secs() -> u64 {
    10
}
fn default_parse_error_limit() -> u32 {
    3
}
fn default_missed_pings() -> u32 {
    3
}
fn default_reconnect_alarm_secs() -> u64 {
    300
}
fn default_ledger_max_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_buffer_deadline_secs() -> u64 {
    60
}
