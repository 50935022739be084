//! Sliding-window cancel throttle.
//!
//! Exchanges penalize cancel spam. A rolling 60-second window counts
//! performed cancels; once the limit is hit, further cancels (and therefore
//! replacements) are suppressed until the window drains and the resting
//! quote stays where it is.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct CancelWindow {
    window: Duration,
    limit: u32,
    performed: VecDeque<Instant>,
    suppressed: u64,
}

impl CancelWindow {
    pub fn new(limit: u32) -> Self {
        Self::with_window(limit, Duration::from_secs(60))
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            window,
            limit,
            performed: VecDeque::new(),
            suppressed: 0,
        }
    }

    /// Register a cancel if the window has room. Returns false (and counts a
    /// suppression) when throttled; the caller must then skip the cancel.
    pub fn try_cancel(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.performed.len() as u32 >= self.limit {
            self.suppressed += 1;
            return false;
        }
        self.performed.push_back(now);
        true
    }

    /// Whether a cancel would currently be admitted, without registering.
    pub fn would_allow(&mut self, now: Instant) -> bool {
        self.evict(now);
        (self.performed.len() as u32) < self.limit
    }

    pub fn in_window(&mut self, now: Instant) -> u32 {
        self.evict(now);
        self.performed.len() as u32
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.performed.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.performed.pop_front();
            } else {
                break;
            }
        }
    }
}
