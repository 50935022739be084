//! Process shutdown coordination.
//!
//! A cloneable latch checked by every task loop. Tripping it starts the
//! ordered drain: the ingestor stops accepting frames, the maker cancels its
//! resting orders, the ledger flushes, and the process exits. Hedger orders
//! already in flight are left to complete.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Default)]
pub struct ShutdownLatch {
    tripped: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self, reason: &str) {
        if !self.tripped.swap(true, Ordering::AcqRel) {
            info!(reason, "shutdown requested");
            *self.reason.lock() = Some(reason.to_string());
        }
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}
