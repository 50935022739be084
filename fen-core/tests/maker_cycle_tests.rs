//! Maker engine cycles against the simulated venue: exchange-grid
//! invariants, sticky quotes, throttling, and skip conditions.

use fen_core::config::{GuardConfig, MakerConfig, MarketId, MarketSpec};
use fen_core::events::EventBus;
use fen_core::execution::{InflightGate, Role, Side, SimClient, SubmitError};
use fen_core::maker::{
    Adjustment, CycleReport, FeatureContext, MakerEngine, MarketEvent, QuoteFeature, SideAction,
    SideGates, SkipReason,
};
use fen_core::resilience::ShutdownLatch;
use fen_core::risk::Guard;
use fen_core::state::StateStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

fn market() -> MarketId {
    MarketId::from("market:2")
}

fn spec() -> MarketSpec {
    MarketSpec {
        id: market(),
        price_scale: 2,
        size_scale: 4,
        exchange_min_size: dec!(0.001),
        exchange_min_notional: dec!(10),
    }
}

struct Harness {
    engine: MakerEngine,
    store: Arc<StateStore>,
    sim: Arc<SimClient>,
    guard: Arc<Guard>,
}

fn harness(maker: MakerConfig) -> Harness {
    let events = EventBus::default();
    let store = Arc::new(StateStore::new());
    let guard = Arc::new(Guard::new(
        GuardConfig::default(),
        [spec()],
        store.clone(),
        events.clone(),
    ));
    let sim = Arc::new(SimClient::new());
    let engine = MakerEngine::new(
        maker,
        Duration::from_secs(5),
        [spec()],
        store.clone(),
        guard.clone(),
        sim.clone(),
        InflightGate::new(),
        events,
        ShutdownLatch::new(),
    );
    Harness {
        engine,
        store,
        sim,
        guard,
    }
}

fn maker_config() -> MakerConfig {
    MakerConfig {
        base_spread_bps: dec!(10),
        min_spread_bps: dec!(1),
        base_size: dec!(0.5),
        max_clip_size: dec!(5),
        ..MakerConfig::default()
    }
}

fn set_top(store: &StateStore, bid: Decimal, ask: Decimal) {
    store.set_book_top(&market(), bid, ask, SystemTime::now());
}

#[tokio::test]
async fn quotes_both_sides_on_the_exchange_grid() {
    let mut h = harness(maker_config());
    set_top(&h.store, dec!(142.99), dec!(143.01));

    let report = h.engine.run_cycle(&market()).await;
    assert_eq!(
        report,
        CycleReport::Quoted {
            bid: SideAction::Submitted,
            ask: SideAction::Submitted,
        }
    );

    let orders = h.store.orders(&market(), None, Some(Role::Maker));
    assert_eq!(orders.len(), 2);
    let tick = spec().tick_size();
    let lot = spec().lot_size();
    for order in &orders {
        assert_eq!(order.price % tick, Decimal::ZERO);
        assert_eq!(order.size_remaining % lot, Decimal::ZERO);
        assert!(order.size_remaining >= spec().exchange_min_size);
        assert!(order.price * order.size_remaining >= spec().exchange_min_notional);
        match order.side {
            Side::Bid => assert!(order.price < dec!(143.00)),
            Side::Ask => assert!(order.price > dec!(143.00)),
        }
    }
    assert_eq!(h.sim.resting_count(&market()), 2);
}

#[tokio::test]
async fn unchanged_market_leaves_quotes_sticky() {
    let mut h = harness(maker_config());
    set_top(&h.store, dec!(142.99), dec!(143.01));

    h.engine.run_cycle(&market()).await;
    let report = h.engine.run_cycle(&market()).await;

    assert_eq!(
        report,
        CycleReport::Quoted {
            bid: SideAction::Sticky,
            ask: SideAction::Sticky,
        }
    );
    assert_eq!(h.sim.resting_count(&market()), 2);
    assert_eq!(h.engine.stats().cancels, 0);
}

#[tokio::test]
async fn throttled_replacement_keeps_the_old_quote() {
    let mut h = harness(MakerConfig {
        max_cancels_per_minute: 0,
        ..maker_config()
    });
    set_top(&h.store, dec!(142.99), dec!(143.01));
    h.engine.run_cycle(&market()).await;
    let before: Vec<Decimal> = h
        .store
        .orders(&market(), None, Some(Role::Maker))
        .iter()
        .map(|o| o.price)
        .collect();

    // Mid moves; replacement wanted but every cancel is suppressed.
    set_top(&h.store, dec!(143.49), dec!(143.51));
    let report = h.engine.run_cycle(&market()).await;

    assert_eq!(
        report,
        CycleReport::Quoted {
            bid: SideAction::Throttled,
            ask: SideAction::Throttled,
        }
    );
    let after: Vec<Decimal> = h
        .store
        .orders(&market(), None, Some(Role::Maker))
        .iter()
        .map(|o| o.price)
        .collect();
    assert_eq!(before, after);
    assert!(h.engine.stats().cancels_suppressed >= 2);
}

#[tokio::test]
async fn synthetic_mid_aborts_the_cycle() {
    let mut h = harness(maker_config());
    h.store
        .set_mid(&market(), dec!(143), SystemTime::now(), true);

    let report = h.engine.run_cycle(&market()).await;
    assert_eq!(report, CycleReport::Skipped(SkipReason::SyntheticMid));
    assert_eq!(h.sim.resting_count(&market()), 0);
}

#[tokio::test]
async fn stale_mid_aborts_the_cycle() {
    let mut h = harness(maker_config());
    set_top(&h.store, dec!(142.99), dec!(143.01));

    let later = Instant::now() + Duration::from_secs(30);
    let report = h.engine.run_cycle_at(&market(), later).await;
    assert_eq!(report, CycleReport::Skipped(SkipReason::StaleMid));
}

struct GateBid;

impl QuoteFeature for GateBid {
    fn name(&self) -> &'static str {
        "gate_bid"
    }
    fn update(&mut self, _event: &MarketEvent) {}
    fn adjust(&mut self, _ctx: &FeatureContext) -> Adjustment {
        Adjustment {
            spread_delta_bps: Decimal::ZERO,
            size_multiplier: Decimal::ONE,
            gates: SideGates::bid_only(),
        }
    }
}

#[tokio::test]
async fn feature_gate_withholds_one_side() {
    let mut h = harness(maker_config());
    h.engine.set_features(&market(), vec![Box::new(GateBid)]);
    set_top(&h.store, dec!(142.99), dec!(143.01));

    let report = h.engine.run_cycle(&market()).await;
    assert_eq!(
        report,
        CycleReport::Quoted {
            bid: SideAction::Gated,
            ask: SideAction::Submitted,
        }
    );
    assert_eq!(h.store.orders(&market(), Some(Side::Bid), None).len(), 0);
    assert_eq!(h.store.orders(&market(), Some(Side::Ask), None).len(), 1);
}

#[tokio::test]
async fn permanent_rejection_is_surfaced_and_counted() {
    let mut h = harness(maker_config());
    set_top(&h.store, dec!(142.99), dec!(143.01));
    h.sim
        .fail_submits_with(Some(SubmitError::Other("insufficient margin".into())));

    let report = h.engine.run_cycle(&market()).await;
    assert_eq!(
        report,
        CycleReport::Quoted {
            bid: SideAction::SubmitFailed,
            ask: SideAction::SubmitFailed,
        }
    );
    assert_eq!(h.guard.rejection_count("exchange_other"), 2);
    assert_eq!(h.store.orders(&market(), None, None).len(), 0);
}
