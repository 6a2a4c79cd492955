//! Remote media surfaced to the UI

use super::track::TrackKind;
use serde::Serialize;

/// Track received from a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrack {
    /// Track id as announced by the remote side
    pub id: String,
    /// Track kind
    pub kind: TrackKind,
    /// Remote media stream the track belongs to
    pub stream_id: String,
}

/// At most one audio and one video track received from one peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteStream {
    audio: Option<RemoteTrack>,
    video: Option<RemoteTrack>,
}

impl RemoteStream {
    /// Empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track, replacing any track of the same kind
    ///
    /// Returns `false` when the same track was already present.
    pub fn insert(&mut self, track: RemoteTrack) -> bool {
        let slot = match track.kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        };
        if slot.as_ref() == Some(&track) {
            return false;
        }
        *slot = Some(track);
        true
    }

    /// Track of `kind`, if any
    pub fn track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    /// Audio track
    pub fn audio(&self) -> Option<&RemoteTrack> {
        self.audio.as_ref()
    }

    /// Video track
    pub fn video(&self) -> Option<&RemoteTrack> {
        self.video.as_ref()
    }

    /// All tracks, audio first
    pub fn tracks(&self) -> impl Iterator<Item = &RemoteTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    /// Whether no track has been received
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}
