//! Market stream interface.
//!
//! The concrete transport (socket handling, wire framing, authentication)
//! lives outside the core. Implementations hand the ingestor a connection
//! that yields raw frames and accepts the two control messages the protocol
//! needs: pong replies and per-channel resubscription.

use super::frames::RawFrame;
use crate::config::MarketId;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait MarketStream: Send {
    /// Open a session subscribed to the given market channels.
    async fn connect(
        &mut self,
        subscriptions: &[MarketId],
    ) -> Result<Box<dyn MarketConnection>, StreamError>;
}

#[async_trait]
pub trait MarketConnection: Send {
    /// Next inbound frame; None means the connection is gone.
    async fn next_frame(&mut self) -> Option<RawFrame>;

    /// Reply to a server keep-alive.
    async fn send_pong(&mut self) -> Result<(), StreamError>;

    /// Re-issue the subscription for one channel.
    async fn resubscribe(&mut self, market: &MarketId) -> Result<(), StreamError>;
}
