//! Track Manager
//!
//! Single owner of the outgoing local media. Every change is pushed into
//! every live peer connection so that all connections carry the same
//! tracks:
//!
//! - a sender of the right kind already exists: its track is replaced in
//!   place, no renegotiation
//! - no sender yet: the track is added on a new sender, which makes the
//!   connection fire negotiation-needed
//! - clearing nulls the sender's track and keeps the sender, so muting
//!   never costs an offer/answer round-trip

use super::track::{MediaTrack, TrackKind, TrackSource, VideoSource};
use crate::peer::PeerTransport;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outgoing local media
///
/// At most one audio and one video track; `video_source` tells camera and
/// screen apart for the UI, the wire only knows "video".
#[derive(Debug, Clone, Default)]
pub struct LocalMediaState {
    mic: Option<MediaTrack>,
    video: Option<MediaTrack>,
    video_source: VideoSource,
}

impl LocalMediaState {
    /// Microphone track, if on
    pub fn mic(&self) -> Option<&MediaTrack> {
        self.mic.as_ref()
    }

    /// Video track (camera or screen), if any
    pub fn video(&self) -> Option<&MediaTrack> {
        self.video.as_ref()
    }

    /// Provenance of the video track
    pub fn video_source(&self) -> VideoSource {
        self.video_source
    }

    /// Track of `kind`
    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        match kind {
            TrackKind::Audio => self.mic.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    /// All local tracks, audio first
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.mic.iter().chain(self.video.iter()).cloned().collect()
    }

    /// Whether the microphone is sending
    pub fn mic_on(&self) -> bool {
        self.mic.is_some()
    }

    /// Whether the camera is sending
    pub fn cam_on(&self) -> bool {
        self.video.is_some() && self.video_source == VideoSource::Camera
    }

    /// Whether a screen capture is sending
    pub fn screen_on(&self) -> bool {
        self.video.is_some() && self.video_source == VideoSource::Screen
    }

    /// Whether any video is sending
    pub fn video_on(&self) -> bool {
        self.video.is_some()
    }

    fn slot(&mut self, kind: TrackKind) -> &mut Option<MediaTrack> {
        match kind {
            TrackKind::Audio => &mut self.mic,
            TrackKind::Video => &mut self.video,
        }
    }
}

/// Result of pushing a change into the mesh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackApplyReport {
    /// Connections whose existing sender was updated in place
    pub replaced: usize,
    /// Connections that got a new sender (and will renegotiate)
    pub added: usize,
    /// Connections that rejected the change
    pub failed: usize,
}

impl TrackApplyReport {
    /// Whether any connection needs a new offer
    pub fn needs_negotiation(&self) -> bool {
        self.added > 0
    }
}

/// Applies local track changes to every peer connection
#[derive(Debug, Default)]
pub struct TrackManager {
    state: LocalMediaState,
}

impl TrackManager {
    /// Manager with no local media
    pub fn new() -> Self {
        Self::default()
    }

    /// Current local media
    pub fn state(&self) -> &LocalMediaState {
        &self.state
    }

    /// Install `track` as the local track of `kind` and push it to `peers`
    ///
    /// Any previous track of that kind is stopped once every connection
    /// carries the new one. A failure on one connection does not prevent
    /// the others from being updated.
    pub async fn set_track(
        &mut self,
        kind: TrackKind,
        track: MediaTrack,
        peers: &[Arc<dyn PeerTransport>],
    ) -> Result<TrackApplyReport> {
        if track.kind() != kind {
            return Err(Error::MediaTrackError(format!(
                "cannot use {} track {} as {}",
                track.kind(),
                track.id(),
                kind
            )));
        }
        if !track.is_live() {
            return Err(Error::MediaTrackError(format!(
                "track {} has already ended",
                track.id()
            )));
        }

        let previous = self.state.slot(kind).replace(track.clone());
        if kind == TrackKind::Video {
            self.state.video_source = VideoSource::from(track.source());
        }

        let report = Self::push(kind, Some(&track), peers).await;

        if let Some(previous) = previous {
            if !previous.same_track(&track) {
                previous.stop();
            }
        }

        info!(
            "Local {} track set to {} ({} replaced, {} added, {} failed)",
            kind,
            track.id(),
            report.replaced,
            report.added,
            report.failed
        );
        Ok(report)
    }

    /// Stop the local track of `kind` and null every sender of that kind
    ///
    /// Senders are kept, so a later [`TrackManager::set_track`] is a plain
    /// replace.
    pub async fn clear_track(
        &mut self,
        kind: TrackKind,
        peers: &[Arc<dyn PeerTransport>],
    ) -> TrackApplyReport {
        let previous = self.state.slot(kind).take();
        if kind == TrackKind::Video {
            self.state.video_source = VideoSource::None;
        }

        let mut report = TrackApplyReport::default();
        for peer in peers.iter().filter(|peer| peer.has_sender(kind)) {
            match peer.replace_track(kind, None).await {
                Ok(()) => report.replaced += 1,
                Err(e) => {
                    warn!("Failed to clear {} sender for peer {}: {}", kind, peer.peer_id(), e);
                    report.failed += 1;
                }
            }
        }

        if let Some(track) = previous {
            track.stop();
            info!("Local {} track {} cleared", kind, track.id());
        }
        report
    }

    /// Switch the outgoing video between camera and screen
    ///
    /// The new track replaces the old one on every sender in one step, so
    /// there is never an observable moment with no outgoing video. Returns
    /// the previous video source.
    pub async fn swap_video_source(
        &mut self,
        track: MediaTrack,
        peers: &[Arc<dyn PeerTransport>],
    ) -> Result<(VideoSource, TrackApplyReport)> {
        if track.source() == TrackSource::Microphone {
            return Err(Error::MediaTrackError(format!(
                "cannot use microphone track {} as video source",
                track.id()
            )));
        }

        let previous = self.state.video_source;
        let report = self.set_track(TrackKind::Video, track, peers).await?;
        debug!(
            "Video source swapped {:?} -> {:?}",
            previous, self.state.video_source
        );
        Ok((previous, report))
    }

    /// Make sure `peer` carries every local track
    ///
    /// Needed for connections created while media was already on, in case
    /// their initial senders were not populated.
    pub async fn ensure_senders(&self, peer: &dyn PeerTransport) -> TrackApplyReport {
        let mut report = TrackApplyReport::default();
        for kind in TrackKind::ALL {
            let Some(track) = self.state.track(kind) else {
                continue;
            };
            if peer.sender_track(kind).is_some_and(|current| current.same_track(track)) {
                continue;
            }
            Self::apply(peer, kind, Some(track), &mut report).await;
        }
        report
    }

    /// Stop every local track. Connections are left untouched.
    pub fn stop_all(&mut self) {
        for track in [self.state.mic.take(), self.state.video.take()]
            .into_iter()
            .flatten()
        {
            track.stop();
            debug!("Stopped local {} track {}", track.kind(), track.id());
        }
        self.state.video_source = VideoSource::None;
    }

    async fn push(
        kind: TrackKind,
        track: Option<&MediaTrack>,
        peers: &[Arc<dyn PeerTransport>],
    ) -> TrackApplyReport {
        let mut report = TrackApplyReport::default();
        for peer in peers {
            Self::apply(peer.as_ref(), kind, track, &mut report).await;
        }
        report
    }

    async fn apply(
        peer: &dyn PeerTransport,
        kind: TrackKind,
        track: Option<&MediaTrack>,
        report: &mut TrackApplyReport,
    ) {
        let result = if peer.has_sender(kind) {
            peer.replace_track(kind, track).await.map(|()| report.replaced += 1)
        } else if let Some(track) = track {
            peer.add_track(track).await.map(|()| report.added += 1)
        } else {
            Ok(())
        };

        if let Err(e) = result {
            warn!("Failed to apply {} track to peer {}: {}", kind, peer.peer_id(), e);
            report.failed += 1;
        }
    }
}
