//! Per-source liveness tracking.
//!
//! Producers stamp a heartbeat on every unit of work; consumers read the age
//! and react to thresholds. Ages are measured on the monotonic clock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Well-known heartbeat sources.
pub const SOURCE_MARKET_DATA: &str = "market_data";
pub const SOURCE_QUOTES: &str = "quotes";
pub const SOURCE_ACCOUNT: &str = "account";

#[derive(Debug, Default)]
pub struct HeartbeatBoard {
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl HeartbeatBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beat(&self, source: &str) {
        self.beat_at(source, Instant::now());
    }

    pub fn beat_at(&self, source: &str, at: Instant) {
        self.last_seen.lock().insert(source.to_string(), at);
    }

    /// Age of the source's last beat, or None if it has never beaten.
    pub fn age(&self, source: &str, now: Instant) -> Option<Duration> {
        self.last_seen
            .lock()
            .get(source)
            .map(|at| now.saturating_duration_since(*at))
    }

    /// True when the source has beaten within `threshold` of `now`.
    pub fn is_live(&self, source: &str, now: Instant, threshold: Duration) -> bool {
        matches!(self.age(source, now), Some(age) if age <= threshold)
    }
}
