//! Local and remote media
//!
//! Local capture tracks, the device seam that produces them, the Track
//! Manager that pushes them into every peer connection, and the remote
//! streams surfaced to the UI.

pub mod devices;
pub mod remote;
pub mod track;
pub mod track_manager;

pub use devices::{DeviceKind, MediaDevices, SyntheticDevices};
pub use remote::{RemoteStream, RemoteTrack};
pub use track::{MediaTrack, TrackEndReason, TrackKind, TrackSource, VideoSource};
pub use track_manager::{LocalMediaState, TrackApplyReport, TrackManager};
