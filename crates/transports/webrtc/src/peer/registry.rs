//! Peer Connection Registry
//!
//! Owns one [`PeerEntry`] per remote peer in the mesh. Entries are never
//! handed out beyond a borrow; everything the UI sees is a snapshot.

use super::negotiation::PeerNegotiator;
use super::transport::{
    Dispatch, EventSink, IceConnectionState, PeerConnectionState, PeerTransport,
    TransportFactory,
};
use crate::config::{MeshConfig, OrphanCandidatePolicy};
use crate::media::{LocalMediaState, RemoteStream, RemoteTrack};
use crate::signaling::IceCandidate;
use crate::{Error, PeerId, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Connection to one remote peer
pub struct PeerEntry {
    /// Remote peer id
    pub peer_id: PeerId,

    /// Distinguishes this connection from earlier ones to the same peer
    pub generation: u64,

    /// Transport handle, owned exclusively by this entry
    pub transport: Arc<dyn PeerTransport>,

    /// Negotiation state machine
    pub negotiator: PeerNegotiator,

    /// Tracks received from the peer
    pub remote_stream: RemoteStream,

    /// Last reported connection state
    pub connection_state: PeerConnectionState,

    /// Display name, when known
    pub username: Option<String>,

    /// When the entry was created
    pub created_at: Instant,
}

impl std::fmt::Debug for PeerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerEntry")
            .field("peer_id", &self.peer_id)
            .field("generation", &self.generation)
            .field("signaling_state", &self.transport.signaling_state())
            .field("phase", &self.negotiator.phase())
            .field("connection_state", &self.connection_state)
            .finish()
    }
}

/// Map of live peer connections
pub struct PeerRegistry {
    local_id: PeerId,
    factory: Arc<dyn TransportFactory>,
    dispatch: Dispatch,
    entries: HashMap<PeerId, PeerEntry>,
    parked: HashMap<PeerId, VecDeque<IceCandidate>>,
    next_generation: u64,
    max_peers: usize,
    orphan_policy: OrphanCandidatePolicy,
    max_parked: usize,
}

impl PeerRegistry {
    /// Registry for `local_id`; transport callbacks are forwarded to `dispatch`
    pub fn new(
        local_id: impl Into<PeerId>,
        config: &MeshConfig,
        factory: Arc<dyn TransportFactory>,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            factory,
            dispatch,
            entries: HashMap::new(),
            parked: HashMap::new(),
            next_generation: 1,
            max_peers: config.max_peers as usize,
            orphan_policy: config.orphan_candidates,
            max_parked: config.max_parked_candidates,
        }
    }

    /// Existing entry for `peer_id`, or a new one carrying every local track
    ///
    /// A new entry receives any candidates parked for the peer.
    pub async fn get_or_create(
        &mut self,
        peer_id: &str,
        local: &LocalMediaState,
    ) -> Result<&mut PeerEntry> {
        if !self.entries.contains_key(peer_id) {
            let entry = self.create_entry(peer_id, local).await?;
            self.entries.insert(peer_id.to_string(), entry);
        }
        self.entries
            .get_mut(peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))
    }

    async fn create_entry(&mut self, peer_id: &str, local: &LocalMediaState) -> Result<PeerEntry> {
        if peer_id == self.local_id {
            return Err(Error::PeerConnectionError(
                "cannot open a connection to ourselves".to_string(),
            ));
        }
        if self.entries.len() >= self.max_peers {
            return Err(Error::PeerConnectionError(format!(
                "Maximum peer limit reached ({})",
                self.max_peers
            )));
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let sink = EventSink::new(peer_id.to_string(), generation, self.dispatch.clone());
        let transport = self.factory.create(peer_id, sink).await?;

        for track in local.tracks() {
            if let Err(e) = transport.add_track(&track).await {
                warn!("Failed to attach {} track to new peer {}: {}", track.kind(), peer_id, e);
            }
        }

        let mut negotiator = PeerNegotiator::new(self.local_id.clone(), peer_id);
        if let Some(parked) = self.parked.remove(peer_id) {
            debug!("Handing {} parked candidates to {}", parked.len(), peer_id);
            negotiator.buffer_candidates(parked);
        }

        info!(
            "Created peer entry {} (generation {}, {} local tracks, {} peers)",
            peer_id,
            generation,
            local.tracks().len(),
            self.entries.len() + 1
        );

        Ok(PeerEntry {
            peer_id: peer_id.to_string(),
            generation,
            transport,
            negotiator,
            remote_stream: RemoteStream::new(),
            connection_state: PeerConnectionState::New,
            username: None,
            created_at: Instant::now(),
        })
    }

    /// Entry for `peer_id`
    pub fn get(&self, peer_id: &str) -> Option<&PeerEntry> {
        self.entries.get(peer_id)
    }

    /// Mutable entry for `peer_id`
    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerEntry> {
        self.entries.get_mut(peer_id)
    }

    /// Whether an entry exists for `peer_id`
    pub fn contains(&self, peer_id: &str) -> bool {
        self.entries.contains_key(peer_id)
    }

    /// Close and drop the entry for `peer_id`, and anything parked for it
    ///
    /// Returns whether an entry existed.
    pub async fn remove(&mut self, peer_id: &str) -> bool {
        self.parked.remove(peer_id);

        let Some(mut entry) = self.entries.remove(peer_id) else {
            return false;
        };

        let discarded = entry.negotiator.close();
        if let Err(e) = entry.transport.close().await {
            warn!("Error closing peer connection for {}: {}", peer_id, e);
        }
        info!(
            "Removed peer entry {} ({} pending candidates discarded)",
            peer_id, discarded
        );
        true
    }

    /// Hold a candidate from a peer we have no entry for
    ///
    /// Returns whether it was kept.
    pub fn park_candidate(&mut self, peer_id: &str, candidate: IceCandidate) -> bool {
        if self.orphan_policy == OrphanCandidatePolicy::Drop {
            debug!("Dropping candidate from unknown peer {}", peer_id);
            return false;
        }

        let queue = self.parked.entry(peer_id.to_string()).or_default();
        if queue.len() >= self.max_parked {
            warn!(
                "Parked candidate limit ({}) reached for {}; dropping",
                self.max_parked, peer_id
            );
            return false;
        }
        queue.push_back(candidate);
        debug!("Parked candidate from unknown peer {} ({})", peer_id, queue.len());
        true
    }

    /// Number of candidates parked for `peer_id`
    pub fn parked_count(&self, peer_id: &str) -> usize {
        self.parked.get(peer_id).map_or(0, VecDeque::len)
    }

    /// Snapshot of every transport, for pushing local track changes
    pub fn transports(&self) -> Vec<Arc<dyn PeerTransport>> {
        self.entries.values().map(|e| e.transport.clone()).collect()
    }

    /// Remote peer ids
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.entries.keys().cloned().collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every remote stream, keyed by peer
    pub fn streams_snapshot(&self) -> HashMap<PeerId, RemoteStream> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.remote_stream.clone()))
            .collect()
    }

    /// Whether `generation` is the live connection to `peer_id`
    pub fn is_current(&self, peer_id: &str, generation: u64) -> bool {
        self.entries
            .get(peer_id)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Record a remote track; returns whether the stream changed
    pub fn on_remote_track(&mut self, peer_id: &str, track: RemoteTrack) -> bool {
        match self.entries.get_mut(peer_id) {
            Some(entry) => {
                debug!("Remote {} track {} from {}", track.kind, track.id, peer_id);
                entry.remote_stream.insert(track)
            }
            None => false,
        }
    }

    /// Record a connection state; failed or closed connections are removed
    ///
    /// Returns whether the entry was removed.
    pub async fn on_connection_state(&mut self, peer_id: &str, state: PeerConnectionState) -> bool {
        let Some(entry) = self.entries.get_mut(peer_id) else {
            return false;
        };
        if entry.connection_state != state {
            debug!(
                "Peer {} connection {:?} -> {:?}",
                peer_id, entry.connection_state, state
            );
            entry.connection_state = state;
        }

        if state.is_terminal() {
            info!("Connection to {} is {:?}; removing", peer_id, state);
            return self.remove(peer_id).await;
        }
        false
    }

    /// React to an ICE state change; a failed ICE transport gets a restart
    ///
    /// Returns whether a restart was requested.
    pub async fn on_ice_connection_state(&mut self, peer_id: &str, state: IceConnectionState) -> bool {
        if state != IceConnectionState::Failed {
            return false;
        }
        let Some(entry) = self.entries.get(peer_id) else {
            return false;
        };

        info!("ICE failed for {}; restarting", peer_id);
        match entry.transport.restart_ice().await {
            Ok(()) => true,
            Err(e) => {
                warn!("ICE restart for {} failed: {}", peer_id, e);
                false
            }
        }
    }

    /// Close every connection and forget everything
    pub async fn clear(&mut self) -> usize {
        self.parked.clear();
        let entries: Vec<PeerEntry> = self.entries.drain().map(|(_, entry)| entry).collect();
        let count = entries.len();

        let closes = entries.into_iter().map(|mut entry| async move {
            entry.negotiator.close();
            if let Err(e) = entry.transport.close().await {
                warn!("Error closing peer connection for {}: {}", entry.peer_id, e);
            }
        });
        futures::future::join_all(closes).await;

        if count > 0 {
            info!("Closed {} peer connections", count);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackKind, TrackManager, TrackSource};
    use crate::peer::{SignalingState, TransportEvent};
    use crate::transport::LoopbackFactory;
    use parking_lot::Mutex;

    struct Fixture {
        factory: Arc<LoopbackFactory>,
        events: Arc<Mutex<Vec<TransportEvent>>>,
        registry: PeerRegistry,
    }

    fn fixture(config: MeshConfig) -> Fixture {
        let factory = Arc::new(LoopbackFactory::new("me"));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let registry = PeerRegistry::new(
            "me",
            &config,
            factory.clone(),
            Arc::new(move |event| sink_events.lock().push(event)),
        );
        Fixture {
            factory,
            events,
            registry,
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 1 127.0.0.1 {} typ host", n, 40000 + n),
            sdp_mid: Some("audio".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let mut fx = fixture(MeshConfig::local_only());
        let local = LocalMediaState::default();

        let generation = fx.registry.get_or_create("bob", &local).await.unwrap().generation;
        let again = fx.registry.get_or_create("bob", &local).await.unwrap().generation;

        assert_eq!(generation, again);
        assert_eq!(fx.factory.created_count(), 1);
        assert_eq!(fx.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_new_entry_carries_local_tracks() {
        let mut fx = fixture(MeshConfig::local_only());
        let mut manager = TrackManager::new();
        let mic = MediaTrack::new(TrackSource::Microphone, "mic");
        manager.set_track(TrackKind::Audio, mic.clone(), &[]).await.unwrap();

        let entry = fx.registry.get_or_create("bob", manager.state()).await.unwrap();
        assert_eq!(entry.transport.sender_track(TrackKind::Audio), Some(mic));
        assert_eq!(fx.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_peer_limit_and_self() {
        let mut config = MeshConfig::local_only();
        config.max_peers = 1;
        let mut fx = fixture(config);
        let local = LocalMediaState::default();

        assert!(fx.registry.get_or_create("me", &local).await.is_err());
        fx.registry.get_or_create("bob", &local).await.unwrap();
        let err = fx.registry.get_or_create("carol", &local).await.unwrap_err();
        assert!(err.is_peer_error());
    }

    #[tokio::test]
    async fn test_parked_candidates_handed_over() {
        let mut fx = fixture(MeshConfig::local_only());
        assert!(fx.registry.park_candidate("bob", candidate(1)));
        assert!(fx.registry.park_candidate("bob", candidate(2)));
        assert!(!fx.registry.contains("bob"));

        let entry = fx
            .registry
            .get_or_create("bob", &LocalMediaState::default())
            .await
            .unwrap();
        assert_eq!(entry.negotiator.pending_candidates(), 2);
        assert_eq!(fx.registry.parked_count("bob"), 0);
    }

    #[tokio::test]
    async fn test_drop_policy_and_cap() {
        let mut config = MeshConfig::local_only();
        config.orphan_candidates = OrphanCandidatePolicy::Drop;
        let mut fx = fixture(config);
        assert!(!fx.registry.park_candidate("bob", candidate(1)));

        let mut config = MeshConfig::local_only();
        config.max_parked_candidates = 1;
        let mut fx = fixture(config);
        assert!(fx.registry.park_candidate("bob", candidate(1)));
        assert!(!fx.registry.park_candidate("bob", candidate(2)));
        assert_eq!(fx.registry.parked_count("bob"), 1);
    }

    #[tokio::test]
    async fn test_terminal_state_removes_entry() {
        let mut fx = fixture(MeshConfig::local_only());
        let local = LocalMediaState::default();
        fx.registry.get_or_create("bob", &local).await.unwrap();

        assert!(!fx
            .registry
            .on_connection_state("bob", PeerConnectionState::Disconnected)
            .await);
        assert!(fx
            .registry
            .on_connection_state("bob", PeerConnectionState::Failed)
            .await);
        assert!(!fx.registry.contains("bob"));

        let transport = fx.factory.transport("bob").unwrap();
        assert_eq!(transport.signaling_state(), SignalingState::Closed);
    }

    #[tokio::test]
    async fn test_ice_failure_requests_restart() {
        let mut fx = fixture(MeshConfig::local_only());
        fx.registry
            .get_or_create("bob", &LocalMediaState::default())
            .await
            .unwrap();

        assert!(!fx
            .registry
            .on_ice_connection_state("bob", IceConnectionState::Disconnected)
            .await);
        assert!(fx
            .registry
            .on_ice_connection_state("bob", IceConnectionState::Failed)
            .await);
        assert!(fx.registry.contains("bob"));
    }

    #[tokio::test]
    async fn test_generations_and_clear() {
        let mut fx = fixture(MeshConfig::local_only());
        let local = LocalMediaState::default();
        let first = fx.registry.get_or_create("bob", &local).await.unwrap().generation;
        fx.registry.remove("bob").await;
        let second = fx.registry.get_or_create("bob", &local).await.unwrap().generation;

        assert_ne!(first, second);
        assert!(!fx.registry.is_current("bob", first));
        assert!(fx.registry.is_current("bob", second));

        fx.registry.get_or_create("carol", &local).await.unwrap();
        assert_eq!(fx.registry.clear().await, 2);
        assert_eq!(fx.registry.clear().await, 0);
        assert!(fx.registry.is_empty());
    }
}
