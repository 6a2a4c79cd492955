//! Signaling channel seam

use super::protocol::OutboundSignal;
use crate::Result;
use async_trait::async_trait;

/// Reliable, ordered, room-scoped message bus to the other participants
///
/// Only the sending half lives here; inbound [`SignalMessage`]s are fed to
/// the session by whoever owns the receiving half.
///
/// [`SignalMessage`]: super::protocol::SignalMessage
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a message on behalf of the local peer
    async fn send(&self, signal: OutboundSignal) -> Result<()>;
}
