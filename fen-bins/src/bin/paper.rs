//! Paper-trading pipeline: the full core wired against the simulated venue.
//!
//! A random-walk market drives the ingestor and the simulated exchange;
//! maker quotes rest in the simulator, fills replay through the account
//! stream into the ledger and FIFO books. Ctrl-C drains everything in
//! order: ingestor first, maker cancels, ledger flush, exit.

use anyhow::Result;
use clap::Parser;
use fen_core::account::AccountRouter;
use fen_core::config::{
    GuardConfig, HedgerConfig, IngestorConfig, LedgerConfig, MakerConfig, MarketId, MarketSpec,
};
use fen_core::data::Ingestor;
use fen_core::events::EventBus;
use fen_core::execution::{InflightGate, SimClient};
use fen_core::hedge::Hedger;
use fen_core::ledger::FillLedger;
use fen_core::maker::MakerEngine;
use fen_core::resilience::ShutdownLatch;
use fen_core::risk::{Guard, PnlGuardSignal};
use fen_core::state::StateStore;
use fen_core::testing::{ChannelAccountStream, ChannelMarketStream, PaperExchange};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fen-paper", about = "Run the trading core against a simulated venue")]
struct Args {
    /// Directory for the fill ledger.
    #[arg(long, default_value = "./fen-ledger")]
    ledger_dir: PathBuf,

    /// Market key to quote.
    #[arg(long, default_value = "market:2")]
    market: String,

    /// Starting mid for the simulated market.
    #[arg(long, default_value = "143.00")]
    start_mid: Decimal,

    /// Run duration in seconds; 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 0)]
    duration_secs: u64,
}

fn market_spec(id: &MarketId) -> MarketSpec {
    MarketSpec {
        id: id.clone(),
        price_scale: 2,
        size_scale: 4,
        exchange_min_size: dec!(0.001),
        exchange_min_notional: dec!(10),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let market = MarketId::new(args.market.clone());
    let spec = market_spec(&market);

    let shutdown = ShutdownLatch::new();
    {
        let latch = shutdown.clone();
        ctrlc::set_handler(move || latch.trip("SIGINT"))?;
    }

    let events = EventBus::default();
    let store = Arc::new(StateStore::new());
    let guard = Arc::new(Guard::new(
        GuardConfig::default(),
        [spec.clone()],
        store.clone(),
        events.clone(),
    ));
    let inflight = InflightGate::new();
    let client = Arc::new(SimClient::new());

    // Streams: one long-lived scripted session each, fed by the paper
    // exchange.
    let (mut market_stream, _stream_log) = ChannelMarketStream::new();
    let market_tx = market_stream.push_session();
    let mut account_stream = ChannelAccountStream::new();
    let account_tx = account_stream.push_session();

    let exchange = PaperExchange::new(
        client.clone(),
        market_tx,
        account_tx,
        vec![spec.clone()],
        HashMap::from([(market.clone(), args.start_mid)]),
    );

    let ledger = FillLedger::open(&LedgerConfig {
        dir: args.ledger_dir.clone(),
        max_bytes: 16 * 1024 * 1024,
        buffer_deadline_secs: 60,
    })?;

    let ingestor = Ingestor::new(
        IngestorConfig::default(),
        vec![market.clone()],
        store.clone(),
        events.clone(),
        shutdown.clone(),
    );

    let router = AccountRouter::new(
        [spec.clone()],
        store.clone(),
        guard.clone(),
        events.clone(),
        shutdown.clone(),
        ledger,
    );

    let pnl_signal = PnlGuardSignal::new();
    let guard_cfg = GuardConfig::default();
    let mut maker = MakerEngine::new(
        MakerConfig {
            base_spread_bps: dec!(8),
            base_size: dec!(0.1),
            max_clip_size: dec!(2),
            ..MakerConfig::default()
        },
        guard_cfg.max_mid_age(),
        [spec.clone()],
        store.clone(),
        guard.clone(),
        client.clone(),
        inflight.clone(),
        events.clone(),
        shutdown.clone(),
    );
    maker.set_features(
        &market,
        fen_features::build_stack(&fen_features::FeatureSetConfig::all_default(), pnl_signal.clone()),
    );

    let hedger = Hedger::new(
        HedgerConfig {
            trigger_units: dec!(0.3),
            target_units: dec!(0.05),
            max_clip_units: dec!(0.5),
            ..HedgerConfig::default()
        },
        [spec.clone()],
        store.clone(),
        guard.clone(),
        client.clone(),
        inflight.clone(),
        events.clone(),
        shutdown.clone(),
        pnl_signal,
    );

    info!(market = %market, "paper pipeline starting");

    let exchange_task = tokio::spawn(exchange.run(shutdown.clone(), Duration::from_millis(200)));
    let ingestor_task = tokio::spawn(async move {
        ingestor.run(Box::new(market_stream)).await;
    });
    let router_task = tokio::spawn(router.run(Box::new(account_stream)));
    let maker_task = tokio::spawn(maker.run());
    let hedger_task = tokio::spawn(hedger.run());

    if args.duration_secs > 0 {
        tokio::time::sleep(Duration::from_secs(args.duration_secs)).await;
        shutdown.trip("duration elapsed");
    }

    let _ = tokio::join!(
        exchange_task,
        ingestor_task,
        maker_task,
        hedger_task
    );
    let ledger = router_task.await?;
    drop(ledger);

    info!(
        realized = %store.total_realized(&market),
        inventory = %store.inventory(&market),
        events = events.emitted(),
        "paper pipeline stopped"
    );
    Ok(())
}
