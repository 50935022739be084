//! Order types, the exchange client interface, and execution plumbing.

pub mod client;
pub mod inflight;
pub mod simulated;
pub mod types;

pub use client::TradingClient;
pub use inflight::{InflightGate, InflightPermit};
pub use simulated::SimClient;
pub use types::{CancelOutcome, OpenOrder, OrderId, OrderRequest, Role, Side, SubmitError};
