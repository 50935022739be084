//! PnL guard: widen and shrink after realized losses.
//!
//! The engine pushes cumulative realized PnL each cycle; the guard keeps a
//! rolling window of those totals and watches the windowed delta. When it
//! sits below the floor for enough consecutive cycles, the guard activates:
//! each further trigger widens the spread by `widen_bps` (up to a cap) and
//! quote size is cut by `clip_multiplier`. Release is configurable: a fixed
//! window after the last trigger, a PnL recovery above the floor, or
//! whichever comes first. While active, the shared signal tells the hedger
//! to shrink its clips too.

use fen_core::maker::{Adjustment, FeatureContext, MarketEvent, QuoteFeature, SideGates};
use fen_core::risk::PnlGuardSignal;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

/// How an active guard lets go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Release once `release_window_secs` pass without a new trigger.
    Window,
    /// Release once windowed PnL is back at or above the floor.
    Recovery,
    /// Whichever of the two happens first.
    Either,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlGuardConfig {
    pub enabled: bool,

    /// Length of the realized-PnL observation window.
    pub window_secs: u64,

    /// Windowed realized PnL below this arms a trigger.
    pub floor: Decimal,

    /// Consecutive triggering cycles required before activating.
    pub consecutive_triggers: u32,

    /// Spread added per activation step.
    pub widen_bps: Decimal,
    /// Cap on the accumulated widening.
    pub max_extra_bps: Decimal,

    /// Size multiplier while active.
    pub clip_multiplier: Decimal,

    pub release: ReleasePolicy,
    pub release_window_secs: u64,
}

impl Default for PnlGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 300,
            floor: dec!(-25),
            consecutive_triggers: 3,
            widen_bps: dec!(3),
            max_extra_bps: dec!(12),
            clip_multiplier: dec!(0.5),
            release: ReleasePolicy::Either,
            release_window_secs: 120,
        }
    }
}

pub struct PnlGuard {
    config: PnlGuardConfig,
    signal: PnlGuardSignal,
    totals: VecDeque<(Instant, Decimal)>,
    streak: u32,
    extra_bps: Decimal,
    last_trigger: Option<Instant>,
}

impl PnlGuard {
    pub fn new(config: PnlGuardConfig, signal: PnlGuardSignal) -> Self {
        Self {
            config,
            signal,
            totals: VecDeque::new(),
            streak: 0,
            extra_bps: Decimal::ZERO,
            last_trigger: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.extra_bps > Decimal::ZERO
    }

    /// Realized PnL across the observation window: newest minus oldest
    /// retained total.
    fn windowed(&self) -> Option<Decimal> {
        let (_, oldest) = self.totals.front()?;
        let (_, newest) = self.totals.back()?;
        if self.totals.len() < 2 {
            return None;
        }
        Some(newest - oldest)
    }

    fn release(&mut self, why: &str) {
        if self.is_active() {
            info!(reason = why, "pnl guard released");
        }
        self.extra_bps = Decimal::ZERO;
        self.streak = 0;
        self.last_trigger = None;
        self.signal.set_active(false);
    }
}

impl QuoteFeature for PnlGuard {
    fn name(&self) -> &'static str {
        "pnl_guard"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn update(&mut self, event: &MarketEvent) {
        let MarketEvent::Realized { total, at } = event else {
            return;
        };
        self.totals.push_back((*at, *total));
        let horizon = Duration::from_secs(self.config.window_secs);
        while let Some((t, _)) = self.totals.front() {
            if at.saturating_duration_since(*t) > horizon {
                self.totals.pop_front();
            } else {
                break;
            }
        }
    }

    fn adjust(&mut self, ctx: &FeatureContext) -> Adjustment {
        let windowed = self.windowed();

        match windowed {
            Some(pnl) if pnl < self.config.floor => {
                self.streak += 1;
                if self.streak >= self.config.consecutive_triggers {
                    self.extra_bps =
                        (self.extra_bps + self.config.widen_bps).min(self.config.max_extra_bps);
                    self.last_trigger = Some(ctx.now);
                    self.signal.set_active(true);
                }
            }
            Some(pnl) => {
                self.streak = 0;
                let recovered = pnl >= self.config.floor;
                let window_elapsed = matches!(
                    self.last_trigger,
                    Some(at) if ctx.now.saturating_duration_since(at)
                        >= Duration::from_secs(self.config.release_window_secs)
                );
                let should_release = match self.config.release {
                    ReleasePolicy::Recovery => recovered,
                    ReleasePolicy::Window => window_elapsed,
                    ReleasePolicy::Either => recovered || window_elapsed,
                };
                if self.is_active() && should_release {
                    self.release("pnl recovered or window elapsed");
                }
            }
            None => {}
        }

        if self.is_active() {
            Adjustment {
                spread_delta_bps: self.extra_bps,
                size_multiplier: self.config.clip_multiplier,
                gates: SideGates::none(),
            }
        } else {
            Adjustment::neutral()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(now: Instant) -> FeatureContext {
        FeatureContext {
            mid: dec!(100),
            inventory: Decimal::ZERO,
            max_position_units: dec!(1),
            now,
        }
    }

    fn push_total(guard: &mut PnlGuard, at: Instant, total: Decimal) {
        guard.update(&MarketEvent::Realized { total, at });
    }

    /// Drive `cycles` of losing updates, one second apart.
    fn losing_cycles(guard: &mut PnlGuard, start: Instant, cycles: u32) -> Instant {
        let mut now = start;
        push_total(guard, now, Decimal::ZERO);
        for i in 1..=cycles {
            now = start + Duration::from_secs(i as u64);
            push_total(guard, now, dec!(-30) * Decimal::from(i));
            guard.adjust(&ctx(now));
        }
        now
    }

    #[test]
    fn stays_quiet_above_floor() {
        let mut guard = PnlGuard::new(PnlGuardConfig::default(), PnlGuardSignal::new());
        let start = Instant::now();
        push_total(&mut guard, start, Decimal::ZERO);
        push_total(&mut guard, start + Duration::from_secs(1), dec!(-5));

        let adj = guard.adjust(&ctx(start + Duration::from_secs(1)));
        assert_eq!(adj, Adjustment::neutral());
        assert!(!guard.is_active());
    }

    #[test]
    fn activates_after_consecutive_triggers() {
        let signal = PnlGuardSignal::new();
        let mut guard = PnlGuard::new(PnlGuardConfig::default(), signal.clone());
        let start = Instant::now();

        losing_cycles(&mut guard, start, 3);

        assert!(guard.is_active());
        assert!(signal.is_active());
        let adj = guard.adjust(&ctx(start + Duration::from_secs(4)));
        assert!(adj.spread_delta_bps >= dec!(3));
        assert_eq!(adj.size_multiplier, dec!(0.5));
    }

    #[test]
    fn widening_caps_at_max_extra() {
        let mut guard = PnlGuard::new(PnlGuardConfig::default(), PnlGuardSignal::new());
        let start = Instant::now();
        losing_cycles(&mut guard, start, 30);

        let adj = guard.adjust(&ctx(start + Duration::from_secs(31)));
        assert!(adj.spread_delta_bps <= dec!(12));
    }

    #[test]
    fn recovery_releases_under_recovery_policy() {
        let config = PnlGuardConfig {
            release: ReleasePolicy::Recovery,
            ..PnlGuardConfig::default()
        };
        let signal = PnlGuardSignal::new();
        let mut guard = PnlGuard::new(config, signal.clone());
        let start = Instant::now();
        let now = losing_cycles(&mut guard, start, 3);
        assert!(guard.is_active());

        // PnL comes back: the losing totals roll out of the window once the
        // new totals hold steady.
        let later = now + Duration::from_secs(400);
        push_total(&mut guard, later, dec!(-90));
        push_total(&mut guard, later + Duration::from_secs(1), dec!(-89));
        let adj = guard.adjust(&ctx(later + Duration::from_secs(1)));

        assert!(!guard.is_active());
        assert!(!signal.is_active());
        assert_eq!(adj, Adjustment::neutral());
    }

    #[test]
    fn window_policy_releases_after_quiet_period() {
        let config = PnlGuardConfig {
            release: ReleasePolicy::Window,
            release_window_secs: 120,
            ..PnlGuardConfig::default()
        };
        let mut guard = PnlGuard::new(config, PnlGuardSignal::new());
        let start = Instant::now();
        let now = losing_cycles(&mut guard, start, 3);
        assert!(guard.is_active());

        // Still losing on the window measure shortly after: stays active.
        push_total(&mut guard, now + Duration::from_secs(10), dec!(-90));
        guard.adjust(&ctx(now + Duration::from_secs(10)));
        assert!(guard.is_active());

        // Far later, flat totals and the release window has elapsed.
        let later = now + Duration::from_secs(600);
        push_total(&mut guard, later, dec!(-90));
        push_total(&mut guard, later + Duration::from_secs(1), dec!(-90));
        guard.adjust(&ctx(later + Duration::from_secs(1)));
        assert!(!guard.is_active());
    }
}
