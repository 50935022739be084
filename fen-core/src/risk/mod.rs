//! Pre-trade validation and kill-switch state.

pub mod guard;
pub mod latch;
pub mod types;

pub use guard::Guard;
pub use latch::{KillLatch, MakerSuspension};
pub use types::{GuardVerdict, RejectReason};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag published by the PnL-guard feature and read by the hedger,
/// which shrinks its clips while the guard is widening quotes.
#[derive(Clone, Default)]
pub struct PnlGuardSignal {
    active: Arc<AtomicBool>,
}

impl PnlGuardSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
