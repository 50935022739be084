//! Inspect a fill-ledger directory: print a window of records and the FIFO
//! PnL they reconstruct. Replaying a prefix of the ledger into a fresh
//! compositor reproduces the live run's numbers exactly, so this doubles as
//! an offline books check.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use fen_core::config::MarketId;
use fen_core::ledger::read_window_in;
use fen_core::pnl::PnlCompositor;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Parser, Debug)]
#[command(name = "fen-ledger-dump", about = "Print and reconcile a fill ledger")]
struct Args {
    /// Ledger directory (live segment + archives).
    #[arg(long)]
    dir: PathBuf,

    /// Window start (RFC 3339); defaults to the beginning.
    #[arg(long)]
    from: Option<DateTime<Utc>>,

    /// Window end (RFC 3339); defaults to now.
    #[arg(long)]
    to: Option<DateTime<Utc>>,

    /// Print each record, not just the summary.
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let from = args.from.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let to = args.to.unwrap_or_else(Utc::now);

    let mut pnl = PnlCompositor::new();
    let mut counts: BTreeMap<MarketId, u64> = BTreeMap::new();
    let mut volume: BTreeMap<MarketId, Decimal> = BTreeMap::new();

    for record in read_window_in(&args.dir, from, to)? {
        if args.verbose {
            println!(
                "{} {} {} {} {} @ {} fee={} inv_after={}",
                record.ts,
                record.market,
                record.role,
                record.side,
                record.size,
                record.price,
                record.fee,
                record.inventory_after,
            );
        }
        pnl.apply_fill(
            &record.market,
            record.side,
            record.size,
            record.price,
            record.fee,
            SystemTime::from(record.ts),
        );
        *counts.entry(record.market.clone()).or_insert(0) += 1;
        *volume.entry(record.market.clone()).or_insert(Decimal::ZERO) +=
            record.price * record.size;
    }

    println!("── ledger summary [{} .. {}] ──", from, to);
    for (market, count) in &counts {
        let (avg, open) = pnl.cost_basis(market);
        println!(
            "{}: fills={} volume={} realized={} open={} @ {}",
            market,
            count,
            volume.get(market).copied().unwrap_or(Decimal::ZERO),
            pnl.total_realized(market),
            open,
            avg,
        );
    }
    if counts.is_empty() {
        println!("no records in window");
    }
    Ok(())
}
