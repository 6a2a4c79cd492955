//! Capture device seam
//!
//! Acquiring a microphone, camera or screen is the only place a session
//! waits on the user (permission prompts, screen pickers). Failures are
//! reported as [`Error::MediaUnavailable`] and never leave a partial track
//! behind.

use super::track::{MediaTrack, TrackSource};
use crate::config::{AudioConstraints, VideoConstraints};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Capture device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Microphone
    Microphone,
    /// Camera
    Camera,
    /// Screen / window capture
    Display,
}

impl DeviceKind {
    /// Source of the tracks this device produces
    pub fn source(&self) -> TrackSource {
        match self {
            DeviceKind::Microphone => TrackSource::Microphone,
            DeviceKind::Camera => TrackSource::Camera,
            DeviceKind::Display => TrackSource::Screen,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Microphone => f.write_str("microphone"),
            DeviceKind::Camera => f.write_str("camera"),
            DeviceKind::Display => f.write_str("display"),
        }
    }
}

/// Produces live capture tracks
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the default microphone
    async fn open_microphone(&self, constraints: &AudioConstraints) -> Result<MediaTrack>;

    /// Open the default camera
    async fn open_camera(&self, constraints: &VideoConstraints) -> Result<MediaTrack>;

    /// Ask the user for a screen or window to capture
    async fn open_display(&self, constraints: &VideoConstraints) -> Result<MediaTrack>;
}

#[derive(Default)]
struct DeviceState {
    denied: HashMap<DeviceKind, String>,
    ended_on_open: HashSet<DeviceKind>,
    opened: HashMap<DeviceKind, Vec<MediaTrack>>,
}

/// Devices that hand out synthetic tracks
///
/// Used by the demo binary and tests. Individual devices can be denied to
/// exercise the permission-failure path.
#[derive(Default)]
pub struct SyntheticDevices {
    state: Mutex<DeviceState>,
}

impl SyntheticDevices {
    /// All devices available
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent open of `kind` fail with `reason`
    pub fn deny(&self, kind: DeviceKind, reason: impl Into<String>) {
        self.state.lock().denied.insert(kind, reason.into());
    }

    /// Undo [`SyntheticDevices::deny`]
    pub fn allow(&self, kind: DeviceKind) {
        self.state.lock().denied.remove(&kind);
    }

    /// Hand out tracks of `kind` that have already ended, like a device
    /// unplugged while it was being opened
    pub fn end_on_open(&self, kind: DeviceKind) {
        self.state.lock().ended_on_open.insert(kind);
    }

    /// Number of successful opens of `kind`
    pub fn open_count(&self, kind: DeviceKind) -> usize {
        self.state.lock().opened.get(&kind).map_or(0, Vec::len)
    }

    /// Most recently opened track of `kind`
    pub fn last_opened(&self, kind: DeviceKind) -> Option<MediaTrack> {
        self.state
            .lock()
            .opened
            .get(&kind)
            .and_then(|tracks| tracks.last().cloned())
    }

    fn open(&self, kind: DeviceKind, label: String) -> Result<MediaTrack> {
        let mut state = self.state.lock();
        if let Some(reason) = state.denied.get(&kind) {
            return Err(Error::media_unavailable(kind, reason.clone()));
        }

        let track = MediaTrack::new(kind.source(), label);
        if state.ended_on_open.contains(&kind) {
            track.end_from_source();
        }
        debug!("Opened synthetic {} track {}", kind, track.id());
        state.opened.entry(kind).or_default().push(track.clone());
        Ok(track)
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn open_microphone(&self, constraints: &AudioConstraints) -> Result<MediaTrack> {
        let label = format!(
            "synthetic-mic (aec={}, ns={}, agc={})",
            constraints.echo_cancellation,
            constraints.noise_suppression,
            constraints.auto_gain_control
        );
        self.open(DeviceKind::Microphone, label)
    }

    async fn open_camera(&self, constraints: &VideoConstraints) -> Result<MediaTrack> {
        let label = format!(
            "synthetic-camera {}x{}@{}",
            constraints.width, constraints.height, constraints.frame_rate
        );
        self.open(DeviceKind::Camera, label)
    }

    async fn open_display(&self, constraints: &VideoConstraints) -> Result<MediaTrack> {
        let label = format!(
            "synthetic-screen {}x{}@{}",
            constraints.width, constraints.height, constraints.frame_rate
        );
        self.open(DeviceKind::Display, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{TrackEndReason, TrackKind};

    #[tokio::test]
    async fn test_open_produces_live_tracks() {
        let devices = SyntheticDevices::new();

        let mic = devices
            .open_microphone(&AudioConstraints::default())
            .await
            .unwrap();
        assert_eq!(mic.kind(), TrackKind::Audio);
        assert!(mic.is_live());

        let screen = devices
            .open_display(&VideoConstraints::display())
            .await
            .unwrap();
        assert_eq!(screen.source(), TrackSource::Screen);
        assert!(screen.label().contains("1920x1080@15"));

        assert_eq!(devices.open_count(DeviceKind::Microphone), 1);
        assert_eq!(devices.last_opened(DeviceKind::Display), Some(screen));
    }

    #[tokio::test]
    async fn test_denied_device() {
        let devices = SyntheticDevices::new();
        devices.deny(DeviceKind::Camera, "permission denied");

        let err = devices
            .open_camera(&VideoConstraints::camera())
            .await
            .unwrap_err();
        assert!(err.is_device_error());
        assert_eq!(devices.open_count(DeviceKind::Camera), 0);

        devices.allow(DeviceKind::Camera);
        assert!(devices.open_camera(&VideoConstraints::camera()).await.is_ok());
    }

    #[tokio::test]
    async fn test_end_on_open() {
        let devices = SyntheticDevices::new();
        devices.end_on_open(DeviceKind::Camera);

        let cam = devices
            .open_camera(&VideoConstraints::camera())
            .await
            .unwrap();
        assert!(!cam.is_live());
        assert_eq!(cam.end_reason(), Some(TrackEndReason::SourceEnded));

        let mic = devices
            .open_microphone(&AudioConstraints::default())
            .await
            .unwrap();
        assert!(mic.is_live());
    }
}
