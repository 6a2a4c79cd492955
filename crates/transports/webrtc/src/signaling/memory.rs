//! In-process signaling bus
//!
//! Room-scoped relay with the same routing rules as the signaling server:
//!
//! - offers, answers and candidates go to their target only, with `from`
//!   stamped by the bus
//! - `peer-joined`, media state and screen-share notices go to everyone in
//!   the room except the sender
//! - `leave-room` removes the sender and tells the rest `peer-left`
//!
//! Delivery per sender/receiver pair is FIFO. Each member gets an unbounded
//! receiver that the owner drains into its session.

use super::channel::SignalingChannel;
use super::protocol::{OutboundSignal, PeerSummary, SignalMessage};
use crate::{Error, PeerId, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct Member {
    peer_id: PeerId,
    username: String,
    tx: mpsc::UnboundedSender<SignalMessage>,
}

#[derive(Default)]
struct Room {
    members: Vec<Member>,
    host: Option<PeerId>,
    sharer: Option<PeerId>,
}

impl Room {
    fn member(&self, peer_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.peer_id == peer_id)
    }

    fn deliver(&self, peer_id: &str, message: SignalMessage) {
        match self.member(peer_id) {
            Some(member) => {
                if member.tx.send(message).is_err() {
                    debug!("Receiver for {} dropped", peer_id);
                }
            }
            None => debug!(
                "Dropping {} for {}: not in room",
                message.type_name(),
                peer_id
            ),
        }
    }

    fn broadcast_except(&self, sender: &str, message: SignalMessage) {
        for member in self.members.iter().filter(|m| m.peer_id != sender) {
            let _ = member.tx.send(message.clone());
        }
    }

    fn remove(&mut self, peer_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.peer_id != peer_id);
        if self.host.as_deref() == Some(peer_id) {
            self.host = None;
        }
        if self.sharer.as_deref() == Some(peer_id) {
            self.sharer = None;
        }
        before != self.members.len()
    }
}

/// Room-scoped in-memory signaling bus
///
/// Clones share the same rooms.
#[derive(Clone, Default)]
pub struct MemoryBus {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
}

impl MemoryBus {
    /// Empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `room_id` as `peer_id`
    ///
    /// The joiner receives `room-joined` with the current roster; everyone
    /// else receives `peer-joined`. The first member becomes the room host.
    /// Joining again under the same id replaces the previous membership.
    pub fn join(
        &self,
        room_id: &str,
        peer_id: &str,
        username: &str,
    ) -> (MemorySignaling, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.rooms.lock();
        let room = rooms.entry(room_id.to_string()).or_default();

        if room.remove(peer_id) {
            warn!("Peer {} rejoined room {}", peer_id, room_id);
        }

        let roster = room
            .members
            .iter()
            .map(|m| PeerSummary {
                peer_id: m.peer_id.clone(),
                username: m.username.clone(),
            })
            .collect();
        let _ = tx.send(SignalMessage::RoomJoined { peers: roster });

        room.broadcast_except(
            peer_id,
            SignalMessage::PeerJoined {
                peer_id: peer_id.to_string(),
                username: username.to_string(),
            },
        );

        room.members.push(Member {
            peer_id: peer_id.to_string(),
            username: username.to_string(),
            tx,
        });
        room.host.get_or_insert_with(|| peer_id.to_string());

        info!(
            "Peer {} joined room {} ({} members)",
            peer_id,
            room_id,
            room.members.len()
        );

        let channel = MemorySignaling {
            bus: self.clone(),
            room_id: room_id.to_string(),
            peer_id: peer_id.to_string(),
        };
        (channel, rx)
    }

    /// Host of `room_id` mutes everyone else
    pub fn mute_all(&self, room_id: &str, host_id: &str) -> Result<()> {
        let rooms = self.rooms.lock();
        let room = rooms
            .get(room_id)
            .ok_or_else(|| Error::SignalingError(format!("Unknown room {}", room_id)))?;

        if room.host.as_deref() != Some(host_id) {
            return Err(Error::SignalingError(format!(
                "{} is not the host of room {}",
                host_id, room_id
            )));
        }

        room.broadcast_except(host_id, SignalMessage::ForceMuted);
        info!("Host {} muted room {}", host_id, room_id);
        Ok(())
    }

    /// Drop `peer_id` from the room without it saying goodbye
    ///
    /// Same effect on the others as `leave-room`.
    pub fn disconnect(&self, room_id: &str, peer_id: &str) {
        let mut rooms = self.rooms.lock();
        if let Some(room) = rooms.get_mut(room_id) {
            Self::depart(room, peer_id);
        }
    }

    /// Current member ids of `room_id`, in join order
    pub fn members(&self, room_id: &str) -> Vec<PeerId> {
        self.rooms
            .lock()
            .get(room_id)
            .map(|room| room.members.iter().map(|m| m.peer_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Host of `room_id`
    pub fn host(&self, room_id: &str) -> Option<PeerId> {
        self.rooms.lock().get(room_id).and_then(|room| room.host.clone())
    }

    /// Last announced screen sharer of `room_id`
    pub fn sharer(&self, room_id: &str) -> Option<PeerId> {
        self.rooms.lock().get(room_id).and_then(|room| room.sharer.clone())
    }

    fn depart(room: &mut Room, peer_id: &str) {
        if room.remove(peer_id) {
            room.broadcast_except(
                peer_id,
                SignalMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                },
            );
        }
    }

    fn route(&self, room_id: &str, sender: &str, signal: OutboundSignal) -> Result<()> {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::SignalingError(format!("Unknown room {}", room_id)))?;

        let username = match room.member(sender) {
            Some(member) => member.username.clone(),
            None => {
                return Err(Error::SignalingError(format!(
                    "{} is not in room {}",
                    sender, room_id
                )))
            }
        };
        let from = sender.to_string();

        match signal {
            OutboundSignal::Offer {
                target_id,
                description,
            } => room.deliver(
                &target_id,
                SignalMessage::Offer {
                    from,
                    description,
                    username: Some(username),
                },
            ),
            OutboundSignal::Answer {
                target_id,
                description,
            } => room.deliver(&target_id, SignalMessage::Answer { from, description }),
            OutboundSignal::Candidate {
                target_id,
                candidate,
            } => room.deliver(&target_id, SignalMessage::Candidate { from, candidate }),
            OutboundSignal::MediaStateChanged { mic_on, cam_on } => room.broadcast_except(
                sender,
                SignalMessage::MediaStateChanged {
                    from,
                    mic_on,
                    cam_on,
                },
            ),
            OutboundSignal::ScreenShareStarted => {
                room.sharer = Some(from.clone());
                room.broadcast_except(
                    sender,
                    SignalMessage::ScreenShareStarted {
                        peer_id: from,
                        username,
                    },
                );
            }
            OutboundSignal::ScreenShareStopped => {
                if room.sharer.as_deref() == Some(sender) {
                    room.sharer = None;
                }
                room.broadcast_except(sender, SignalMessage::ScreenShareStopped { peer_id: from });
            }
            OutboundSignal::LeaveRoom => {
                Self::depart(room, sender);
                info!("Peer {} left room {}", sender, room_id);
            }
        }
        Ok(())
    }
}

/// One member's sending half of a [`MemoryBus`]
#[derive(Clone)]
pub struct MemorySignaling {
    bus: MemoryBus,
    room_id: String,
    peer_id: PeerId,
}

impl MemorySignaling {
    /// Room this channel belongs to
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Peer this channel sends for
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn send(&self, signal: OutboundSignal) -> Result<()> {
        debug!("{} -> bus: {}", self.peer_id, signal.type_name());
        self.bus.route(&self.room_id, &self.peer_id, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SessionDescription;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SignalMessage>) -> Vec<SignalMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_join_announces_roster() {
        let bus = MemoryBus::new();
        let (_a, mut rx_a) = bus.join("room", "a", "Ann");
        let (_b, mut rx_b) = bus.join("room", "b", "Bob");

        assert_eq!(
            drain(&mut rx_a),
            vec![
                SignalMessage::RoomJoined { peers: vec![] },
                SignalMessage::PeerJoined {
                    peer_id: "b".to_string(),
                    username: "Bob".to_string()
                }
            ]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![SignalMessage::RoomJoined {
                peers: vec![PeerSummary {
                    peer_id: "a".to_string(),
                    username: "Ann".to_string()
                }]
            }]
        );
        assert_eq!(bus.host("room").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_addressed_messages_are_stamped() {
        let bus = MemoryBus::new();
        let (a, _rx_a) = bus.join("room", "a", "Ann");
        let (_b, mut rx_b) = bus.join("room", "b", "Bob");
        let (_c, mut rx_c) = bus.join("room", "c", "Cat");
        drain(&mut rx_b);
        drain(&mut rx_c);

        a.send(OutboundSignal::Offer {
            target_id: "b".to_string(),
            description: SessionDescription::offer("v=0"),
        })
        .await
        .unwrap();

        assert_eq!(
            drain(&mut rx_b),
            vec![SignalMessage::Offer {
                from: "a".to_string(),
                description: SessionDescription::offer("v=0"),
                username: Some("Ann".to_string()),
            }]
        );
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn test_leave_room_broadcasts_peer_left() {
        let bus = MemoryBus::new();
        let (a, _rx_a) = bus.join("room", "a", "Ann");
        let (_b, mut rx_b) = bus.join("room", "b", "Bob");
        drain(&mut rx_b);

        a.send(OutboundSignal::LeaveRoom).await.unwrap();
        assert_eq!(
            drain(&mut rx_b),
            vec![SignalMessage::PeerLeft {
                peer_id: "a".to_string()
            }]
        );
        assert_eq!(bus.members("room"), vec!["b".to_string()]);

        // Not a member any more
        assert!(a.send(OutboundSignal::LeaveRoom).await.is_err());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_screen_share_stop_clears_only_current_sharer() {
        let bus = MemoryBus::new();
        let (a, _rx_a) = bus.join("room", "a", "Ann");
        let (b, _rx_b) = bus.join("room", "b", "Bob");

        a.send(OutboundSignal::ScreenShareStarted).await.unwrap();
        b.send(OutboundSignal::ScreenShareStarted).await.unwrap();
        assert_eq!(bus.sharer("room").as_deref(), Some("b"));

        a.send(OutboundSignal::ScreenShareStopped).await.unwrap();
        assert_eq!(bus.sharer("room").as_deref(), Some("b"));

        b.send(OutboundSignal::ScreenShareStopped).await.unwrap();
        assert_eq!(bus.sharer("room"), None);
    }

    #[tokio::test]
    async fn test_mute_all_requires_host() {
        let bus = MemoryBus::new();
        let (_a, mut rx_a) = bus.join("room", "a", "Ann");
        let (_b, mut rx_b) = bus.join("room", "b", "Bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert!(bus.mute_all("room", "b").is_err());
        bus.mute_all("room", "a").unwrap();

        assert_eq!(drain(&mut rx_b), vec![SignalMessage::ForceMuted]);
        assert!(drain(&mut rx_a).is_empty());
    }
}
