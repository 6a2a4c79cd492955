//! Full-mesh WebRTC session layer for CollabBoard rooms
//!
//! Every participant holds one peer connection to every other participant.
//! This crate owns those connections for one client: it negotiates them
//! with perfect negotiation, buffers ICE candidates until descriptions are
//! in place, and switches local media (mic, camera, screen) without tearing
//! connections down.
//!
//! # Features
//!
//! - **Perfect negotiation**: glare resolved by a polite/impolite role
//!   derived from peer ids, no coordinator needed
//! - **Candidate buffering**: remote candidates queued until a remote
//!   description exists, then applied in arrival order
//! - **Hot track switching**: mute and camera/screen swaps replace the
//!   outgoing track in place instead of renegotiating
//! - **Pluggable transport**: deterministic in-memory loopback, or
//!   webrtc-rs peer connections with the `webrtc-rs` feature
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  UI (toggles, stream rendering)                          │
//! │  ↓ toggles                     ↑ SessionObserver         │
//! │  SessionCoordinator (single event queue)                 │
//! │  ├─ TrackManager (local mic + camera/screen)             │
//! │  ├─ PeerRegistry                                         │
//! │  │   └─ PeerEntry: PeerTransport + PeerNegotiator        │
//! │  └─ RoomContext (advisory screen sharer, peer badges)    │
//! │     ↕                                                    │
//! │  SignalingChannel (room-scoped reliable ordered bus)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use collabboard_webrtc::MeshConfig;
//!
//! let config = MeshConfig {
//!     max_peers: 8,
//!     ..MeshConfig::local_only()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use collabboard_webrtc::{
//!     LoopbackFactory, MemoryBus, MeshConfig, NoopObserver, RoomContext, SessionCoordinator,
//!     SyntheticDevices,
//! };
//!
//! # async fn example() -> collabboard_webrtc::Result<()> {
//! let bus = MemoryBus::new();
//! let (signaling, signals) = bus.join("room-1", "alice", "Alice");
//!
//! let session = SessionCoordinator::new(
//!     MeshConfig::local_only(),
//!     RoomContext::new("room-1", "alice", "Alice"),
//!     Arc::new(signaling),
//!     Arc::new(SyntheticDevices::new()),
//!     Arc::new(LoopbackFactory::new("alice")),
//!     Arc::new(NoopObserver),
//! )?;
//!
//! let (handle, task) = session.spawn(signals);
//! handle.toggle_microphone().await?;
//! handle.leave_room().await?;
//! # let _ = task.await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod transport;

/// Opaque participant id; ordering decides who is polite
pub type PeerId = String;

// Re-exports for public API
pub use config::{MeshConfig, OrphanCandidatePolicy, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{
    DeviceKind, LocalMediaState, MediaDevices, MediaTrack, RemoteStream, RemoteTrack,
    SyntheticDevices, TrackKind, TrackManager, TrackSource, VideoSource,
};
pub use peer::{
    is_polite, OfferPhase, PeerConnectionState, PeerNegotiator, PeerRegistry, PeerTransport,
    SignalingState, TransportFactory,
};
pub use session::{
    ChannelObserver, LocalStateSnapshot, NoopObserver, ObserverEvent, PeerMediaState,
    RoomContext, ScreenSharer, SessionCoordinator, SessionHandle, SessionObserver,
    SessionSummary,
};
pub use signaling::{
    IceCandidate, MemoryBus, MemorySignaling, OutboundSignal, PeerSummary, SdpType,
    SessionDescription, SignalMessage, SignalingChannel,
};
pub use transport::{LoopbackFactory, LoopbackTransport};
#[cfg(feature = "webrtc-rs")]
pub use transport::{RtcTransport, RtcTransportFactory};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }

    #[test]
    fn test_smaller_id_is_polite() {
        assert!(is_polite("aaa", "zzz"));
        assert!(!is_polite("zzz", "aaa"));
    }
}
