//! Signaling messages and the channel that carries them
//!
//! The channel itself is an external collaborator (in production a
//! WebSocket pub/sub relay); this module defines the message set, the
//! sending seam, and an in-process bus used by the demo and tests.

pub mod channel;
pub mod memory;
pub mod protocol;

pub use channel::SignalingChannel;
pub use memory::{MemoryBus, MemorySignaling};
pub use protocol::{
    IceCandidate, OutboundSignal, PeerSummary, SdpType, SessionDescription, SignalMessage,
};
