//! Exchange-facing order interface.
//!
//! The concrete transport (REST signing, wire framing, nonce bookkeeping)
//! lives outside the core; implementations translate raw exchange responses
//! into the classified errors in [`super::types`]. Every call carries a
//! timeout internally and maps it to `SubmitError::Timeout`, so callers never
//! hang on an outbound request.

use super::types::{CancelOutcome, OrderId, OrderRequest, SubmitError};
use crate::config::MarketId;
use async_trait::async_trait;

#[async_trait]
pub trait TradingClient: Send + Sync {
    /// Submit a limit order. `post_only` orders must rest or be rejected as
    /// [`SubmitError::Crossed`].
    async fn submit_limit(&self, request: OrderRequest) -> Result<OrderId, SubmitError>;

    /// Cancel a single order.
    async fn cancel(&self, order_id: &OrderId) -> Result<CancelOutcome, SubmitError>;

    /// Cancel every resting order for a market; returns the count canceled.
    async fn cancel_all(&self, market: &MarketId) -> Result<usize, SubmitError>;
}
