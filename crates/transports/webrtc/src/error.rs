//! Error types for the mesh session layer

use crate::media::DeviceKind;

/// Result type alias using the mesh session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing a conferencing session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling channel error (send failed, channel closed)
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Peer not found in the registry
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Peer connection error (creation, limit, state)
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// ICE candidate could not be applied
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Local media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Capture device could not be acquired (permission denied, busy, cancelled)
    #[error("{device} unavailable: {reason}")]
    MediaUnavailable {
        /// Device that was requested
        device: DeviceKind,
        /// Human-readable reason reported by the device layer
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The session has been torn down
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}

impl Error {
    /// Build a device error
    pub fn media_unavailable(device: DeviceKind, reason: impl Into<String>) -> Self {
        Error::MediaUnavailable {
            device,
            reason: reason.into(),
        }
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerNotFound(_)
                | Error::PeerConnectionError(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
        )
    }

    /// Check if this error came from media device acquisition
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::MediaUnavailable { .. })
    }
}
