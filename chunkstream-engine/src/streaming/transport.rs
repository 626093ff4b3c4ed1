//! Client transport capability
//!
//! One duplex channel per client. Framing (JSON header, binary PCM) is the
//! implementation's concern; the controller only sends [`StreamMessage`]s
//! and polls liveness.

use crate::error::Result;
use async_trait::async_trait;
use chunkstream_common::StreamMessage;
use uuid::Uuid;

/// Identity of a client connection
pub type ConnectionId = Uuid;

#[async_trait]
pub trait Transport: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    /// False once the peer has gone away
    fn is_connected(&self) -> bool;

    /// Deliver one message. Fails with `Error::ConnectionLost` when the peer
    /// is gone. May wait as long as the peer is slow to read.
    async fn send(&self, message: StreamMessage) -> Result<()>;
}
