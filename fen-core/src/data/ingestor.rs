//! Market data ingestor.
//!
//! Maintains a live mid for every configured market: subscribes on connect,
//! answers keep-alives, counts and recovers from parse errors, reconnects
//! with jittered exponential backoff, and falls back to synthetic mids when
//! the feed has been dark past the configured threshold. Synthetic mids keep
//! the downstream pipeline exercising its logic while the guard refuses to
//! act on them.

use super::frames::{parse_mid_update, FrameKind, RawFrame};
use super::stream::{MarketConnection, MarketStream};
use super::synthetic::SyntheticWalk;
use crate::config::{IngestorConfig, MarketId};
use crate::events::{Event, EventBus};
use crate::resilience::{Backoff, BackoffConfig, ShutdownLatch};
use crate::state::{StateStore, SOURCE_MARKET_DATA};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct IngestorStats {
    pub frames: AtomicU64,
    pub parse_errors: AtomicU64,
    pub resubscribes: AtomicU64,
    pub reconnects: AtomicU64,
    pub synthetic_mids: AtomicU64,
}

impl IngestorStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

pub struct Ingestor {
    config: IngestorConfig,
    markets: Vec<MarketId>,
    store: Arc<StateStore>,
    events: EventBus,
    shutdown: ShutdownLatch,
    stats: Arc<IngestorStats>,
}

/// Mutable state for one run of the ingestor.
struct Session {
    walk: SyntheticWalk,
    last_valid: Option<Instant>,
    last_synthetic: Option<Instant>,
    outage_started: Option<Instant>,
    outage_reported: bool,
    parse_streaks: HashMap<String, u32>,
}

impl Ingestor {
    pub fn new(
        config: IngestorConfig,
        markets: Vec<MarketId>,
        store: Arc<StateStore>,
        events: EventBus,
        shutdown: ShutdownLatch,
    ) -> Self {
        Self {
            config,
            markets,
            store,
            events,
            shutdown,
            stats: Arc::new(IngestorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<IngestorStats> {
        self.stats.clone()
    }

    /// Drive the feed until shutdown. Never returns early on stream errors;
    /// sustained failure raises events, not exits.
    pub async fn run(&self, mut stream: Box<dyn MarketStream>) {
        let mut session = Session {
            walk: SyntheticWalk::new(
                self.config.synthetic_step_bps,
                self.config.synthetic_band_bps,
            ),
            last_valid: None,
            last_synthetic: None,
            outage_started: None,
            outage_reported: false,
            parse_streaks: HashMap::new(),
        };
        let mut backoff = Backoff::new(BackoffConfig::default());
        let mut attempt: u32 = 0;

        while !self.shutdown.is_tripped() {
            attempt += 1;
            if attempt > 1 {
                IngestorStats::bump(&self.stats.reconnects);
                self.events.emit(Event::IngestorReconnect { attempt });
            }

            match stream.connect(&self.markets).await {
                Ok(mut conn) => {
                    info!(markets = self.markets.len(), "market stream connected");
                    backoff.reset();
                    self.pump(conn.as_mut(), &mut session).await;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "market stream connect failed");
                }
            }

            if self.shutdown.is_tripped() {
                break;
            }

            session.outage_started.get_or_insert_with(Instant::now);
            self.check_outage_alarm(&mut session);

            let delay = backoff
                .next_delay()
                .unwrap_or_else(|| Duration::from_secs(30));
            self.dark_wait(delay, &mut session).await;
        }

        info!("ingestor stopped");
    }

    /// Read frames off one connection until it dies or keep-alives lapse.
    async fn pump(&self, conn: &mut dyn MarketConnection, session: &mut Session) {
        let keepalive = self.config.ping_interval();
        let mut missed: u32 = 0;

        loop {
            if self.shutdown.is_tripped() {
                return;
            }

            match tokio::time::timeout(keepalive, conn.next_frame()).await {
                Ok(Some(frame)) => {
                    missed = 0;
                    self.handle_frame(conn, session, frame).await;
                }
                Ok(None) => {
                    warn!("market stream closed");
                    return;
                }
                Err(_) => {
                    missed += 1;
                    debug!(missed, "keep-alive window elapsed without a frame");
                    self.maybe_synthesize(session);
                    if missed >= self.config.missed_ping_limit {
                        warn!(missed, "keep-alives missed; dropping connection");
                        return;
                    }
                }
            }

            self.maybe_synthesize(session);
            self.check_outage_alarm(session);
        }
    }

    async fn handle_frame(
        &self,
        conn: &mut dyn MarketConnection,
        session: &mut Session,
        frame: RawFrame,
    ) {
        IngestorStats::bump(&self.stats.frames);

        match frame.kind {
            FrameKind::MidUpdate => match parse_mid_update(&frame.payload) {
                Ok(update) => {
                    session.parse_streaks.remove(&frame.channel);
                    session.last_valid = Some(Instant::now());
                    session.outage_started = None;
                    session.outage_reported = false;

                    session.walk.observe_real(&update.market, update.mid());
                    self.store.set_book_top(
                        &update.market,
                        update.best_bid,
                        update.best_ask,
                        SystemTime::from(update.ts),
                    );
                    self.store.heartbeats().beat(SOURCE_MARKET_DATA);
                }
                Err(e) => {
                    IngestorStats::bump(&self.stats.parse_errors);
                    let streak = session
                        .parse_streaks
                        .entry(frame.channel.clone())
                        .or_insert(0);
                    *streak += 1;
                    warn!(channel = %frame.channel, error = %e, streak = *streak, "frame dropped");

                    if *streak >= self.config.parse_error_limit {
                        session.parse_streaks.remove(&frame.channel);
                        IngestorStats::bump(&self.stats.resubscribes);
                        let market = MarketId::new(frame.channel.clone());
                        if let Err(e) = conn.resubscribe(&market).await {
                            warn!(channel = %frame.channel, error = %e, "resubscribe failed");
                        }
                    }
                }
            },
            FrameKind::Ping => {
                if let Err(e) = conn.send_pong().await {
                    warn!(error = %e, "pong failed");
                }
            }
            FrameKind::Pong | FrameKind::SubscriptionAck => {}
            FrameKind::Error => {
                warn!(channel = %frame.channel, payload = %frame.payload, "stream error frame");
            }
        }
    }

    /// Emit synthetic mids once the feed has been silent past the threshold.
    fn maybe_synthesize(&self, session: &mut Session) {
        let now = Instant::now();

        let dark = match session.last_valid {
            Some(at) => now.saturating_duration_since(at) >= self.config.synthetic_threshold(),
            // Never seen a real frame: there is no anchor to walk from.
            None => false,
        };
        if !dark {
            return;
        }

        let due = match session.last_synthetic {
            Some(at) => now.saturating_duration_since(at) >= self.config.synthetic_interval(),
            None => true,
        };
        if !due {
            return;
        }
        session.last_synthetic = Some(now);

        for market in &self.markets {
            if let Some(mid) = session.walk.next_mid(market) {
                IngestorStats::bump(&self.stats.synthetic_mids);
                self.store.set_mid(market, mid, SystemTime::now(), true);
            }
        }
        // Synthetic emission still counts as ingestor liveness; consumers
        // see a bounded heartbeat age while the mid itself stays flagged.
        self.store.heartbeats().beat(SOURCE_MARKET_DATA);
    }

    fn check_outage_alarm(&self, session: &mut Session) {
        if session.outage_reported {
            return;
        }
        if let Some(started) = session.outage_started {
            let outage = started.elapsed();
            if outage > self.config.reconnect_alarm() {
                session.outage_reported = true;
                self.events.emit(Event::IngestorStalled {
                    outage_secs: outage.as_secs(),
                });
            }
        }
    }

    /// Sit out a backoff delay, still emitting synthetic mids on cadence.
    async fn dark_wait(&self, delay: Duration, session: &mut Session) {
        let slice = self.config.synthetic_interval().min(delay).max(Duration::from_millis(10));
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline && !self.shutdown.is_tripped() {
            tokio::time::sleep(slice.min(deadline.saturating_duration_since(Instant::now()))).await;
            self.maybe_synthesize(session);
            self.check_outage_alarm(session);
        }
    }
}
