//! Shared in-memory state: the StateStore and heartbeat board.

pub mod heartbeat;
pub mod store;

pub use heartbeat::{HeartbeatBoard, SOURCE_ACCOUNT, SOURCE_MARKET_DATA, SOURCE_QUOTES};
pub use store::{MarketView, MidPoint, ReconcileOutcome, StateStore};
