//! UI callbacks
//!
//! The coordinator never hands out references into its registry; every
//! notification carries an owned snapshot taken at notify time.

use super::context::ScreenSharer;
use crate::media::{LocalMediaState, MediaTrack, RemoteStream};
use crate::peer::PeerConnectionState;
use crate::PeerId;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Local media as the UI renders it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalStateSnapshot {
    /// Microphone on
    pub mic_on: bool,
    /// Camera video on
    pub cam_on: bool,
    /// Screen capture on
    pub screen_on: bool,
    /// Live local tracks
    pub tracks: Vec<MediaTrack>,
}

impl From<&LocalMediaState> for LocalStateSnapshot {
    fn from(state: &LocalMediaState) -> Self {
        Self {
            mic_on: state.mic_on(),
            cam_on: state.cam_on(),
            screen_on: state.screen_on(),
            tracks: state.tracks(),
        }
    }
}

/// Receives session notifications
///
/// Called from the coordinator's event loop; implementations must not block.
pub trait SessionObserver: Send + Sync {
    /// Remote streams changed
    fn on_streams_changed(&self, _streams: HashMap<PeerId, RemoteStream>) {}

    /// Local media changed
    fn on_local_state_changed(&self, _state: LocalStateSnapshot) {}

    /// Advisory screen sharer changed
    fn on_sharer_changed(&self, _sharer: Option<ScreenSharer>) {}

    /// A peer announced new mic/camera badges
    fn on_peer_media_state(&self, _peer_id: &str, _mic_on: bool, _cam_on: bool) {}

    /// A peer connection changed state
    fn on_peer_connection_state(&self, _peer_id: &str, _state: PeerConnectionState) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Observer notification as a value
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    /// See [`SessionObserver::on_streams_changed`]
    StreamsChanged(HashMap<PeerId, RemoteStream>),
    /// See [`SessionObserver::on_local_state_changed`]
    LocalStateChanged(LocalStateSnapshot),
    /// See [`SessionObserver::on_sharer_changed`]
    SharerChanged(Option<ScreenSharer>),
    /// See [`SessionObserver::on_peer_media_state`]
    PeerMediaState {
        /// Peer
        peer_id: PeerId,
        /// Microphone on
        mic_on: bool,
        /// Camera on
        cam_on: bool,
    },
    /// See [`SessionObserver::on_peer_connection_state`]
    PeerConnectionState {
        /// Peer
        peer_id: PeerId,
        /// New state
        state: PeerConnectionState,
    },
}

/// Observer that forwards every notification into a channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    /// Observer plus the receiving end of its notifications
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ObserverEvent) {
        // The UI may have gone away; nothing to do then
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_streams_changed(&self, streams: HashMap<PeerId, RemoteStream>) {
        self.forward(ObserverEvent::StreamsChanged(streams));
    }

    fn on_local_state_changed(&self, state: LocalStateSnapshot) {
        self.forward(ObserverEvent::LocalStateChanged(state));
    }

    fn on_sharer_changed(&self, sharer: Option<ScreenSharer>) {
        self.forward(ObserverEvent::SharerChanged(sharer));
    }

    fn on_peer_media_state(&self, peer_id: &str, mic_on: bool, cam_on: bool) {
        self.forward(ObserverEvent::PeerMediaState {
            peer_id: peer_id.to_string(),
            mic_on,
            cam_on,
        });
    }

    fn on_peer_connection_state(&self, peer_id: &str, state: PeerConnectionState) {
        self.forward(ObserverEvent::PeerConnectionState {
            peer_id: peer_id.to_string(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{TrackManager, TrackSource};

    #[tokio::test]
    async fn test_snapshot_from_screen_share() {
        let mut manager = TrackManager::new();
        let screen = MediaTrack::new(TrackSource::Screen, "screen");
        manager.swap_video_source(screen, &[]).await.unwrap();

        let snapshot = LocalStateSnapshot::from(manager.state());
        assert!(!snapshot.mic_on);
        assert!(!snapshot.cam_on);
        assert!(snapshot.screen_on);
        assert_eq!(snapshot.tracks.len(), 1);
    }

    #[test]
    fn test_channel_observer_forwards() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_peer_media_state("bob", true, false);
        observer.on_sharer_changed(Some(ScreenSharer::Local));

        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::PeerMediaState {
                peer_id: "bob".to_string(),
                mic_on: true,
                cam_on: false,
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::SharerChanged(Some(ScreenSharer::Local))
        );
    }
}
