//! Per-session room state
//!
//! Advisory room-wide facts that are not part of negotiation: who is
//! sharing their screen and what mic/camera badges other peers announced.
//! Lives exactly as long as its coordinator.

use crate::PeerId;
use serde::Serialize;
use std::collections::HashMap;

/// Current screen sharer
///
/// Last announcement wins; two near-simultaneous shares are not reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScreenSharer {
    /// This client
    Local,
    /// Another participant
    Remote {
        /// Sharer id
        peer_id: PeerId,
        /// Display name
        username: String,
    },
}

impl ScreenSharer {
    /// Remote sharer id, if the sharer is not this client
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            ScreenSharer::Local => None,
            ScreenSharer::Remote { peer_id, .. } => Some(peer_id),
        }
    }
}

/// Badges announced by a remote peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMediaState {
    /// Microphone on
    pub mic_on: bool,
    /// Camera (or screen) video on
    pub cam_on: bool,
}

/// Room-scoped state owned by one session
#[derive(Debug, Clone)]
pub struct RoomContext {
    room_id: String,
    local_id: PeerId,
    username: String,
    sharer: Option<ScreenSharer>,
    peer_media: HashMap<PeerId, PeerMediaState>,
}

impl RoomContext {
    /// Context for `local_id` in `room_id`
    pub fn new(
        room_id: impl Into<String>,
        local_id: impl Into<PeerId>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            local_id: local_id.into(),
            username: username.into(),
            sharer: None,
            peer_media: HashMap::new(),
        }
    }

    /// Room id
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Our peer id
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Our display name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Current advisory sharer
    pub fn sharer(&self) -> Option<&ScreenSharer> {
        self.sharer.as_ref()
    }

    /// Whether this client is the sharer
    pub fn is_local_sharer(&self) -> bool {
        self.sharer == Some(ScreenSharer::Local)
    }

    /// We started sharing; returns whether the sharer changed
    pub fn local_share_started(&mut self) -> bool {
        self.replace_sharer(Some(ScreenSharer::Local))
    }

    /// We stopped sharing; a remote sharer announced since is kept
    pub fn local_share_stopped(&mut self) -> bool {
        if self.is_local_sharer() {
            self.sharer = None;
            true
        } else {
            false
        }
    }

    /// A peer announced a share; it takes over whoever was sharing
    pub fn remote_share_started(&mut self, peer_id: &str, username: &str) -> bool {
        self.replace_sharer(Some(ScreenSharer::Remote {
            peer_id: peer_id.to_string(),
            username: username.to_string(),
        }))
    }

    /// A peer stopped sharing; ignored unless it is the current sharer
    pub fn remote_share_stopped(&mut self, peer_id: &str) -> bool {
        if self.sharer.as_ref().and_then(ScreenSharer::peer_id) == Some(peer_id) {
            self.sharer = None;
            true
        } else {
            false
        }
    }

    /// Record badges announced by `peer_id`
    pub fn set_peer_media(&mut self, peer_id: &str, state: PeerMediaState) {
        self.peer_media.insert(peer_id.to_string(), state);
    }

    /// Badges last announced by `peer_id`
    pub fn peer_media(&self, peer_id: &str) -> PeerMediaState {
        self.peer_media.get(peer_id).copied().unwrap_or_default()
    }

    /// Forget everything about a departed peer; returns whether the sharer changed
    pub fn peer_left(&mut self, peer_id: &str) -> bool {
        self.peer_media.remove(peer_id);
        self.remote_share_stopped(peer_id)
    }

    /// Drop all room state; returns whether the sharer changed
    pub fn reset(&mut self) -> bool {
        self.peer_media.clear();
        self.sharer.take().is_some()
    }

    fn replace_sharer(&mut self, sharer: Option<ScreenSharer>) -> bool {
        if self.sharer == sharer {
            return false;
        }
        self.sharer = sharer;
        true
    }
}
