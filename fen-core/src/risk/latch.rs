//! Kill-switch latch and maker suspension.
//!
//! The latch is sticky: once engaged it blocks all maker quoting until an
//! explicit operator reset (or restart). Suspensions are softer - they expire
//! on their own (reconcile cooldown) or clear when their owner releases them
//! (ledger degradation).

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sticky global block on maker quoting.
#[derive(Default)]
pub struct KillLatch {
    engaged: AtomicBool,
    detail: Mutex<Option<LatchDetail>>,
}

struct LatchDetail {
    reason: String,
    at: Instant,
}

impl KillLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Engage the latch. Idempotent; the first reason wins.
    pub fn engage(&self, reason: &str) {
        if self.engaged.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(reason, "kill-switch latch engaged");
        *self.detail.lock() = Some(LatchDetail {
            reason: reason.to_string(),
            at: Instant::now(),
        });
    }

    /// Operator reset. The only way the latch clears while running.
    pub fn reset(&self) {
        if self.engaged.swap(false, Ordering::AcqRel) {
            info!("kill-switch latch reset");
        }
        *self.detail.lock() = None;
    }

    pub fn reason(&self) -> Option<String> {
        self.detail.lock().as_ref().map(|d| d.reason.clone())
    }

    pub fn engaged_since(&self) -> Option<Instant> {
        self.detail.lock().as_ref().map(|d| d.at)
    }
}

/// Temporary maker suspension: a deadline (cooldowns) plus named holds that
/// stay until released (ledger degradation).
#[derive(Default)]
pub struct MakerSuspension {
    inner: Mutex<SuspensionInner>,
}

#[derive(Default)]
struct SuspensionInner {
    until: Option<Instant>,
    holds: BTreeSet<&'static str>,
    since: Option<Instant>,
}

impl MakerSuspension {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until `now + duration`; extends but never shortens an
    /// existing deadline.
    pub fn suspend_for(&self, duration: Duration, now: Instant) {
        let mut inner = self.inner.lock();
        let deadline = now + duration;
        inner.until = Some(match inner.until {
            Some(existing) if existing > deadline => existing,
            _ => deadline,
        });
        inner.since.get_or_insert(now);
    }

    /// Place a named hold that persists until released.
    pub fn hold(&self, tag: &'static str, now: Instant) {
        let mut inner = self.inner.lock();
        inner.holds.insert(tag);
        inner.since.get_or_insert(now);
    }

    pub fn release(&self, tag: &'static str) {
        self.inner.lock().holds.remove(tag);
    }

    pub fn is_active(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        let deadline_active = matches!(inner.until, Some(until) if until > now);
        if !deadline_active {
            inner.until = None;
        }
        let active = deadline_active || !inner.holds.is_empty();
        if !active {
            inner.since = None;
        }
        active
    }

    /// When the current contiguous suspension began, if one is active.
    pub fn active_since(&self, now: Instant) -> Option<Instant> {
        if self.is_active(now) {
            self.inner.lock().since
        } else {
            None
        }
    }
}
