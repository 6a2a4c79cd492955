//! Opaque per-peer connection handle
//!
//! [`PeerTransport`] is everything the negotiation layer needs from a peer
//! connection: JSEP offer/answer, ICE candidates, and the senders that
//! carry local tracks. Asynchronous callbacks (candidate gathered,
//! negotiation needed, remote track, state changes) are pushed into an
//! [`EventSink`] and end up on the session's event queue.

use crate::media::{MediaTrack, RemoteTrack, TrackKind};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::{PeerId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// JSEP signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No offer/answer exchange in progress
    Stable,
    /// Local offer applied, waiting for an answer
    HaveLocalOffer,
    /// Remote offer applied, answer not yet created
    HaveRemoteOffer,
    /// Connection closed
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Aggregate connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// Created, nothing exchanged
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily lost connectivity
    Disconnected,
    /// Unrecoverable failure
    Failed,
    /// Closed
    Closed,
}

impl PeerConnectionState {
    /// Whether the connection is gone for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerConnectionState::Failed | PeerConnectionState::Closed)
    }
}

/// ICE transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Gathering not started
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checks finished
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// No usable pair; needs an ICE restart
    Failed,
    /// Shut down
    Closed,
}

/// What happened on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// A local candidate was gathered and should be sent to the remote peer
    LocalCandidate(IceCandidate),
    /// Senders changed in a way that needs a new offer
    NegotiationNeeded,
    /// A remote track arrived
    RemoteTrack(RemoteTrack),
    /// Aggregate connection state changed
    ConnectionState(PeerConnectionState),
    /// ICE transport state changed
    IceConnectionState(IceConnectionState),
}

/// Transport callback, tagged with the connection it came from
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Remote peer the connection belongs to
    pub peer_id: PeerId,
    /// Registry generation of the connection; stale generations are ignored
    pub generation: u64,
    /// Event payload
    pub kind: TransportEventKind,
}

/// Callback that receives every transport event
pub type Dispatch = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Where a transport reports its callbacks
///
/// Cheap to clone; transports hand clones to every callback they register.
#[derive(Clone)]
pub struct EventSink {
    peer_id: PeerId,
    generation: u64,
    dispatch: Dispatch,
}

impl EventSink {
    /// Sink that forwards to `dispatch`
    pub fn new(peer_id: PeerId, generation: u64, dispatch: Dispatch) -> Self {
        Self {
            peer_id,
            generation,
            dispatch,
        }
    }

    /// Remote peer this sink reports for
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Registry generation of the connection
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event
    pub fn emit(&self, kind: TransportEventKind) {
        (self.dispatch)(TransportEvent {
            peer_id: self.peer_id.clone(),
            generation: self.generation,
            kind,
        });
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("peer_id", &self.peer_id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// One peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Remote peer id
    fn peer_id(&self) -> &str;

    /// Current signaling state
    fn signaling_state(&self) -> SignalingState;

    /// Whether a remote description (offer or answer) has been applied
    fn has_remote_description(&self) -> bool;

    /// Build an offer; honours a pending ICE restart
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Build an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local offer or answer
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Revert an applied local offer
    async fn rollback(&self) -> Result<()>;

    /// Apply a remote offer or answer
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote candidate; requires a remote description
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach a track on a new sender; fires negotiation-needed
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;

    /// Swap the track of the existing sender of `kind` without renegotiating
    async fn replace_track(&self, kind: TrackKind, track: Option<&MediaTrack>) -> Result<()>;

    /// Whether a sender of `kind` exists (even if it carries no track)
    fn has_sender(&self, kind: TrackKind) -> bool;

    /// Track carried by the sender of `kind`
    fn sender_track(&self, kind: TrackKind) -> Option<MediaTrack>;

    /// Number of senders of `kind`
    fn sender_count(&self, kind: TrackKind) -> usize;

    /// Request an ICE restart on the next offer; fires negotiation-needed
    async fn restart_ice(&self) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Builds peer connections
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a connection to `peer_id` reporting callbacks to `sink`
    async fn create(&self, peer_id: &str, sink: EventSink) -> Result<Arc<dyn PeerTransport>>;
}
