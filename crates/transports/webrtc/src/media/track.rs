//! Local media tracks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Wire-level track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track (camera or screen)
    Video,
}

impl TrackKind {
    /// Both kinds, audio first
    pub const ALL: [TrackKind; 2] = [TrackKind::Audio, TrackKind::Video];

    /// SDP media type name
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    /// Parse an SDP media type name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device a local track was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    /// Microphone capture
    Microphone,
    /// Camera capture
    Camera,
    /// Screen capture
    Screen,
}

impl TrackSource {
    /// Kind of track this source produces
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

/// Provenance of the outgoing video track, for UI purposes only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSource {
    /// No video
    #[default]
    None,
    /// Camera video
    Camera,
    /// Screen capture video
    Screen,
}

impl From<TrackSource> for VideoSource {
    fn from(source: TrackSource) -> Self {
        match source {
            TrackSource::Camera => VideoSource::Camera,
            TrackSource::Screen => VideoSource::Screen,
            TrackSource::Microphone => VideoSource::None,
        }
    }
}

/// Why a track stopped producing media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    /// Stopped locally through [`MediaTrack::stop`]
    Stopped,
    /// The source ended it (device unplugged, "stop sharing" in the browser chrome)
    SourceEnded,
}

struct TrackInner {
    id: String,
    source: TrackSource,
    label: String,
    ended: watch::Sender<Option<TrackEndReason>>,
}

/// Handle to a local capture track
///
/// Cloning is cheap; all clones observe the same live/ended state.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a live track with a generated id
    pub fn new(source: TrackSource, label: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), source, label)
    }

    /// Create a live track with a fixed id
    pub fn with_id(id: impl Into<String>, source: TrackSource, label: impl Into<String>) -> Self {
        let (ended, _) = watch::channel(None);
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                source,
                label: label.into(),
                ended,
            }),
        }
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Track kind
    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    /// Capture source
    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    /// Device label
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the track still produces media
    pub fn is_live(&self) -> bool {
        self.inner.ended.borrow().is_none()
    }

    /// Why the track ended, if it has
    pub fn end_reason(&self) -> Option<TrackEndReason> {
        *self.inner.ended.borrow()
    }

    /// Stop the track. Idempotent.
    pub fn stop(&self) {
        self.finish(TrackEndReason::Stopped);
    }

    /// Mark the track as ended by its source (out-of-band termination)
    pub fn end_from_source(&self) {
        self.finish(TrackEndReason::SourceEnded);
    }

    fn finish(&self, reason: TrackEndReason) {
        self.inner.ended.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Wait until the track ends
    pub async fn ended(&self) -> TrackEndReason {
        let mut rx = self.inner.ended.subscribe();
        let reason = match rx.wait_for(|state| state.is_some()).await {
            Ok(state) => (*state).unwrap_or(TrackEndReason::Stopped),
            Err(_) => TrackEndReason::Stopped,
        };
        reason
    }

    /// Whether both handles refer to the same track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.same_track(other) || self.id() == other.id()
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("label", &self.inner.label)
            .field("live", &self.is_live())
            .finish()
    }
}
