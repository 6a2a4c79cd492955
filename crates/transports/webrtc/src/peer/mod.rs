//! Peer connection management
//!
//! Handles the transport seam, per-peer perfect negotiation, and the
//! registry that owns one connection per remote peer.

pub mod negotiation;
pub mod registry;
pub mod transport;

pub use negotiation::{
    is_polite, AnswerOutcome, CandidateOutcome, NegotiationStats, OfferAttempt, OfferOutcome,
    OfferPhase, PeerNegotiator,
};
pub use registry::{PeerEntry, PeerRegistry};
pub use transport::{
    Dispatch, EventSink, IceConnectionState, PeerConnectionState, PeerTransport, SignalingState,
    TransportEvent, TransportEventKind, TransportFactory,
};
