//! Configuration types for the mesh session layer

use serde::{Deserialize, Serialize};

/// Public STUN servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
    "stun:stun.relay.metered.ca:80",
];

/// Upper bound on mesh size; every peer holds N-1 connections
pub const MAX_MESH_PEERS: u32 = 32;

/// Main configuration for a conferencing session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// STUN server URLs (may be empty for host-only candidates)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// ICE candidate pool size (default: 10)
    pub ice_candidate_pool_size: u8,

    /// Maximum remote peers in the mesh (default: 16, max: 32)
    pub max_peers: u32,

    /// What to do with candidates from peers we hold no connection for
    pub orphan_candidates: OrphanCandidatePolicy,

    /// Per-peer cap on parked orphan candidates (default: 32)
    pub max_parked_candidates: usize,

    /// Microphone capture constraints
    pub audio: AudioConstraints,

    /// Camera capture constraints
    pub camera: VideoConstraints,

    /// Screen capture constraints
    pub display: VideoConstraints,

    /// Re-acquire the camera when a screen share ends if it was on before
    pub restore_camera_after_share: bool,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Handling of ICE candidates that arrive before any connection exists
/// for their sender (signaling raced ahead of `peer-joined`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanCandidatePolicy {
    /// Discard them
    Drop,
    /// Hold them until an entry is created for the peer, then buffer them there
    Park,
}

/// Microphone processing constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    /// Echo cancellation (default: true)
    pub echo_cancellation: bool,
    /// Noise suppression (default: true)
    pub noise_suppression: bool,
    /// Automatic gain control (default: true)
    pub auto_gain_control: bool,
}

/// Ideal video capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Ideal width in pixels
    pub width: u32,
    /// Ideal height in pixels
    pub height: u32,
    /// Ideal framerate in fps
    pub frame_rate: u32,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl VideoConstraints {
    /// 720p30 camera capture
    pub fn camera() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
        }
    }

    /// 1080p15 screen capture
    pub fn display() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 15,
        }
    }

    fn validate(&self, what: &str) -> crate::Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(crate::Error::InvalidConfig(format!(
                "{} resolution must be non-zero, got {}x{}",
                what, self.width, self.height
            )));
        }
        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err(crate::Error::InvalidConfig(format!(
                "{} frame_rate must be in range 1-120, got {}",
                what, self.frame_rate
            )));
        }
        Ok(())
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            ice_candidate_pool_size: 10,
            max_peers: 16,
            orphan_candidates: OrphanCandidatePolicy::Park,
            max_parked_candidates: 32,
            audio: AudioConstraints::default(),
            camera: VideoConstraints::camera(),
            display: VideoConstraints::display(),
            restore_camera_after_share: true,
        }
    }
}

impl MeshConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_peers` is not in range 1-32
    /// - a STUN URL does not start with `stun:`/`stuns:`
    /// - a TURN URL does not start with `turn:`/`turns:`
    /// - a capture resolution or framerate is zero
    /// - orphan candidates are parked with a zero cap
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.max_peers == 0 || self.max_peers > MAX_MESH_PEERS {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-{}, got {}",
                MAX_MESH_PEERS, self.max_peers
            )));
        }

        if let Some(url) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                url
            )));
        }

        if let Some(turn) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                turn.url
            )));
        }

        self.camera.validate("camera")?;
        self.display.validate("display")?;

        if self.orphan_candidates == OrphanCandidatePolicy::Park && self.max_parked_candidates == 0
        {
            return Err(Error::InvalidConfig(
                "max_parked_candidates must be non-zero when parking orphan candidates"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration without any ICE servers
    ///
    /// Suited to the loopback transport and to LAN-only sessions where host
    /// candidates are enough.
    ///
    /// # Example
    ///
    /// ```
    /// use collabboard_webrtc::config::MeshConfig;
    ///
    /// let config = MeshConfig::local_only();
    /// assert!(config.stun_servers.is_empty());
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn local_only() -> Self {
        Self {
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            ice_candidate_pool_size: 0,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_config_is_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stun_servers.len(), 7);
        assert_eq!(config.ice_candidate_pool_size, 10);
        assert_eq!(config.orphan_candidates, OrphanCandidatePolicy::Park);
    }

    #[test]
    fn test_invalid_max_peers() {
        let mut config = MeshConfig::default();
        config.max_peers = 0;
        assert_err!(config.validate());

        config.max_peers = MAX_MESH_PEERS + 1;
        assert_err!(config.validate());

        config.max_peers = MAX_MESH_PEERS;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_invalid_ice_urls() {
        let mut config = MeshConfig::default();
        config.stun_servers = vec!["http://stun.example.com".to_string()];
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = MeshConfig::default();
        config.turn_servers.push(TurnServerConfig {
            url: "stun:turn.example.com".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_constraints() {
        let mut config = MeshConfig::default();
        config.display.frame_rate = 0;
        assert!(config.validate().is_err());

        let mut config = MeshConfig::default();
        config.camera.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_park_requires_capacity() {
        let mut config = MeshConfig::default();
        config.max_parked_candidates = 0;
        assert_err!(config.validate());

        config.orphan_candidates = OrphanCandidatePolicy::Drop;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_config_from_json() {
        let mut json = serde_json::to_value(MeshConfig::local_only()).unwrap();
        json["orphan_candidates"] = serde_json::json!("drop");
        json["max_peers"] = serde_json::json!(4);

        let config: MeshConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.orphan_candidates, OrphanCandidatePolicy::Drop);
        assert_eq!(config.max_peers, 4);
        assert!(config.validate().is_ok());
    }
}
