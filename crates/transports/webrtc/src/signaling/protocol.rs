//! Signaling message types
//!
//! Messages are JSON objects tagged by `type` with kebab-case names and
//! camelCase fields, e.g.
//!
//! ```json
//! {"type":"offer","from":"zzz","description":{"type":"offer","sdp":"v=0..."}}
//! ```

use crate::{Error, PeerId, Result};
use serde::{Deserialize, Serialize};

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Answer
    Answer,
    /// Provisional answer
    Pranswer,
    /// Rollback of a local offer
    Rollback,
}

/// SDP description as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer, answer, ...
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Offer with the given SDP body
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer with the given SDP body
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// `candidate:` attribute line
    pub candidate: String,

    /// Media section id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Media section index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    /// ICE ufrag of the generation this candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    /// Peer id
    pub peer_id: PeerId,
    /// Display name
    pub username: String,
}

/// Message delivered to this client by the signaling channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SignalMessage {
    /// Roster of peers already in the room, sent to a joiner
    RoomJoined {
        /// Existing participants
        peers: Vec<PeerSummary>,
    },

    /// A participant joined
    PeerJoined {
        /// New participant
        peer_id: PeerId,
        /// Display name
        username: String,
    },

    /// A participant left
    PeerLeft {
        /// Departed participant
        peer_id: PeerId,
    },

    /// SDP offer
    Offer {
        /// Sender
        from: PeerId,
        /// Offer
        description: SessionDescription,
        /// Sender's display name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    /// SDP answer
    Answer {
        /// Sender
        from: PeerId,
        /// Answer
        description: SessionDescription,
    },

    /// ICE candidate
    Candidate {
        /// Sender
        from: PeerId,
        /// Candidate
        candidate: IceCandidate,
    },

    /// Remote mic/camera badges
    MediaStateChanged {
        /// Sender
        from: PeerId,
        /// Microphone on
        mic_on: bool,
        /// Camera (any video) on
        cam_on: bool,
    },

    /// A participant started sharing their screen
    ScreenShareStarted {
        /// Sharer
        peer_id: PeerId,
        /// Display name
        username: String,
    },

    /// A participant stopped sharing their screen
    ScreenShareStopped {
        /// Former sharer
        peer_id: PeerId,
    },

    /// The host muted everyone
    ForceMuted,
}

impl SignalMessage {
    /// Wire name of the message
    pub fn type_name(&self) -> &'static str {
        match self {
            SignalMessage::RoomJoined { .. } => "room-joined",
            SignalMessage::PeerJoined { .. } => "peer-joined",
            SignalMessage::PeerLeft { .. } => "peer-left",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
            SignalMessage::MediaStateChanged { .. } => "media-state-changed",
            SignalMessage::ScreenShareStarted { .. } => "screen-share-started",
            SignalMessage::ScreenShareStopped { .. } => "screen-share-stopped",
            SignalMessage::ForceMuted => "force-muted",
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("Invalid signal message: {}", e)))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }
}

/// Message sent by this client over the signaling channel
///
/// The channel knows who the sender is; addressed messages carry a target,
/// room broadcasts carry nothing but their payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum OutboundSignal {
    /// SDP offer to one peer
    Offer {
        /// Recipient
        target_id: PeerId,
        /// Offer
        description: SessionDescription,
    },

    /// SDP answer to one peer
    Answer {
        /// Recipient
        target_id: PeerId,
        /// Answer
        description: SessionDescription,
    },

    /// ICE candidate to one peer
    Candidate {
        /// Recipient
        target_id: PeerId,
        /// Candidate
        candidate: IceCandidate,
    },

    /// Local mic/camera badges for the room
    MediaStateChanged {
        /// Microphone on
        mic_on: bool,
        /// Camera (any video) on
        cam_on: bool,
    },

    /// Local screen share started
    ScreenShareStarted,

    /// Local screen share stopped
    ScreenShareStopped,

    /// Leaving the room
    LeaveRoom,
}

impl OutboundSignal {
    /// Wire name of the message
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundSignal::Offer { .. } => "offer",
            OutboundSignal::Answer { .. } => "answer",
            OutboundSignal::Candidate { .. } => "candidate",
            OutboundSignal::MediaStateChanged { .. } => "media-state-changed",
            OutboundSignal::ScreenShareStarted => "screen-share-started",
            OutboundSignal::ScreenShareStopped => "screen-share-stopped",
            OutboundSignal::LeaveRoom => "leave-room",
        }
    }

    /// Recipient of an addressed message
    pub fn target(&self) -> Option<&str> {
        match self {
            OutboundSignal::Offer { target_id, .. }
            | OutboundSignal::Answer { target_id, .. }
            | OutboundSignal::Candidate { target_id, .. } => Some(target_id),
            _ => None,
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("Invalid outbound signal: {}", e)))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }
}
