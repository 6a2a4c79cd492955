//! Deterministic in-memory peer connection
//!
//! Models the parts of a JSEP peer connection the negotiation layer relies
//! on: the signaling state machine, senders and their negotiation status,
//! negotiation-needed, ICE ufrag generations, candidate validation and
//! remote track discovery from `a=msid` lines. No media flows; callbacks
//! fire synchronously into the [`EventSink`], which makes glare and
//! buffering scenarios reproducible.

use crate::media::{MediaTrack, RemoteTrack, TrackKind};
use crate::peer::{
    EventSink, IceConnectionState, PeerConnectionState, PeerTransport, SignalingState,
    TransportEventKind, TransportFactory,
};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, PeerId, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderStatus {
    /// Added since the last completed negotiation
    Pending,
    /// In the applied local offer
    Offered,
    /// Known to the remote side
    Negotiated,
}

#[derive(Debug)]
struct Sender {
    id: String,
    kind: TrackKind,
    track: Option<MediaTrack>,
    status: SenderStatus,
}

#[derive(Debug, Default)]
struct ParsedMedia {
    kind: Option<TrackKind>,
    msid: Option<(String, String)>,
}

#[derive(Debug, Default)]
struct ParsedSdp {
    ufrag: Option<String>,
    media: Vec<ParsedMedia>,
}

impl ParsedSdp {
    fn parse(sdp: &str) -> Result<Self> {
        let mut lines = sdp.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("v=0") {
            return Err(Error::SdpError("SDP must start with v=0".to_string()));
        }

        let mut parsed = ParsedSdp::default();
        for line in lines {
            if let Some(rest) = line.strip_prefix("m=") {
                let kind = rest.split_whitespace().next().and_then(TrackKind::parse);
                parsed.media.push(ParsedMedia { kind, msid: None });
            } else if let Some(ufrag) = line.strip_prefix("a=ice-ufrag:") {
                parsed.ufrag = Some(ufrag.to_string());
            } else if let Some(msid) = line.strip_prefix("a=msid:") {
                let mut parts = msid.split_whitespace();
                if let (Some(media), Some(stream), Some(track)) =
                    (parsed.media.last_mut(), parts.next(), parts.next())
                {
                    media.msid = Some((stream.to_string(), track.to_string()));
                }
            }
        }
        Ok(parsed)
    }

    fn kinds(&self) -> HashSet<TrackKind> {
        self.media.iter().filter_map(|m| m.kind).collect()
    }

    fn track_ids(&self) -> HashSet<&str> {
        self.media
            .iter()
            .filter_map(|m| m.msid.as_ref().map(|(_, track)| track.as_str()))
            .collect()
    }
}

#[derive(Debug)]
struct LoopbackState {
    signaling: SignalingState,
    connection: PeerConnectionState,
    senders: Vec<Sender>,
    current_local: Option<SessionDescription>,
    pending_local: Option<SessionDescription>,
    current_remote: Option<SessionDescription>,
    pending_remote: Option<SessionDescription>,
    local_ufrag: String,
    previous_ufrag: Option<String>,
    remote_ufrag: Option<String>,
    ice_restart: bool,
    negotiation_fired: bool,
    gathered: HashSet<(String, TrackKind)>,
    remote_candidates: Vec<IceCandidate>,
    remote_tracks: HashMap<TrackKind, String>,
    applied_remote: Vec<SessionDescription>,
    session_version: u64,
    candidate_seq: u32,
}

impl LoopbackState {
    fn new() -> Self {
        Self {
            signaling: SignalingState::Stable,
            connection: PeerConnectionState::New,
            senders: Vec::new(),
            current_local: None,
            pending_local: None,
            current_remote: None,
            pending_remote: None,
            local_ufrag: new_ufrag(),
            previous_ufrag: None,
            remote_ufrag: None,
            ice_restart: false,
            negotiation_fired: false,
            gathered: HashSet::new(),
            remote_candidates: Vec::new(),
            remote_tracks: HashMap::new(),
            applied_remote: Vec::new(),
            session_version: 0,
            candidate_seq: 0,
        }
    }

    fn remote_description(&self) -> Option<&SessionDescription> {
        self.pending_remote.as_ref().or(self.current_remote.as_ref())
    }

    fn remote_kinds(&self) -> HashSet<TrackKind> {
        self.remote_description()
            .and_then(|d| ParsedSdp::parse(&d.sdp).ok())
            .map(|p| p.kinds())
            .unwrap_or_default()
    }

    fn sender(&self, kind: TrackKind) -> Option<&Sender> {
        self.senders.iter().find(|s| s.kind == kind)
    }

    fn needs_negotiation(&self) -> bool {
        self.ice_restart
            || self
                .senders
                .iter()
                .any(|s| s.status == SenderStatus::Pending)
    }

    /// Fire negotiation-needed at most once per stable period
    fn take_negotiation_needed(&mut self) -> bool {
        if self.signaling == SignalingState::Stable
            && !self.negotiation_fired
            && self.needs_negotiation()
        {
            self.negotiation_fired = true;
            return true;
        }
        false
    }

    fn ensure_open(&self) -> Result<()> {
        if self.signaling == SignalingState::Closed {
            return Err(Error::PeerConnectionError("connection is closed".to_string()));
        }
        Ok(())
    }

    fn render(&mut self, local_id: &str, kinds: &[TrackKind], ufrag: &str) -> String {
        self.session_version += 1;
        let mut sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=ice-ufrag:{}\r\n",
            stable_session_id(local_id),
            self.session_version,
            ufrag
        );
        for kind in kinds {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:{}\r\n", kind, kind));
            match self.sender(*kind) {
                Some(sender) => {
                    let direction = if sender.track.is_some() {
                        "sendrecv"
                    } else {
                        "recvonly"
                    };
                    sdp.push_str(&format!(
                        "a={}\r\na=msid:{}-stream {}\r\n",
                        direction, local_id, sender.id
                    ));
                }
                None => sdp.push_str("a=recvonly\r\n"),
            }
        }
        sdp
    }

    /// Local candidates for the m-lines of `sdp` not yet gathered in this ICE generation
    fn gather(&mut self, sdp: &ParsedSdp) -> Vec<IceCandidate> {
        let mut candidates = Vec::new();
        for (index, kind) in sdp.media.iter().enumerate() {
            let Some(kind) = kind.kind else { continue };
            if !self.gathered.insert((self.local_ufrag.clone(), kind)) {
                continue;
            }
            self.candidate_seq += 1;
            candidates.push(IceCandidate {
                candidate: format!(
                    "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                    self.candidate_seq,
                    50000 + self.candidate_seq
                ),
                sdp_mid: Some(kind.to_string()),
                sdp_m_line_index: u16::try_from(index).ok(),
                username_fragment: Some(self.local_ufrag.clone()),
            });
        }
        candidates
    }

    /// New remote tracks announced by `sdp`
    fn discover_tracks(&mut self, sdp: &ParsedSdp) -> Vec<RemoteTrack> {
        let mut found = Vec::new();
        for media in &sdp.media {
            let (Some(kind), Some((stream, track))) = (media.kind, media.msid.as_ref()) else {
                continue;
            };
            if self.remote_tracks.get(&kind) == Some(track) {
                continue;
            }
            self.remote_tracks.insert(kind, track.clone());
            found.push(RemoteTrack {
                id: track.clone(),
                kind,
                stream_id: stream.clone(),
            });
        }
        found
    }

    fn connected_transition(&mut self) -> Option<PeerConnectionState> {
        let ready = self.signaling == SignalingState::Stable
            && self.current_local.is_some()
            && self.current_remote.is_some()
            && !self.remote_candidates.is_empty();
        if ready && self.connection != PeerConnectionState::Connected {
            self.connection = PeerConnectionState::Connected;
            return Some(PeerConnectionState::Connected);
        }
        None
    }

    /// Back in stable: negotiation may be needed again
    fn enter_stable(&mut self) -> Vec<TransportEventKind> {
        self.signaling = SignalingState::Stable;
        self.negotiation_fired = false;

        let mut events = Vec::new();
        if let Some(state) = self.connected_transition() {
            events.push(TransportEventKind::ConnectionState(state));
        }
        if self.take_negotiation_needed() {
            events.push(TransportEventKind::NegotiationNeeded);
        }
        events
    }
}

fn new_ufrag() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn stable_session_id(local_id: &str) -> u64 {
    local_id
        .bytes()
        .fold(1469598103934665603u64, |hash, b| {
            (hash ^ u64::from(b)).wrapping_mul(1099511628211)
        })
        >> 1
}

/// In-memory [`PeerTransport`]
pub struct LoopbackTransport {
    local_id: PeerId,
    peer_id: PeerId,
    sink: EventSink,
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    /// Connection from `local_id` to `peer_id` reporting to `sink`
    pub fn new(local_id: impl Into<PeerId>, peer_id: impl Into<PeerId>, sink: EventSink) -> Self {
        Self {
            local_id: local_id.into(),
            peer_id: peer_id.into(),
            sink,
            state: Mutex::new(LoopbackState::new()),
        }
    }

    fn emit_all(&self, events: Vec<TransportEventKind>) {
        for event in events {
            trace!("{} -> {}: {:?}", self.local_id, self.peer_id, event);
            self.sink.emit(event);
        }
    }

    /// Applied local description (pending offer first)
    pub fn local_description(&self) -> Option<SessionDescription> {
        let state = self.state.lock();
        state.pending_local.clone().or_else(|| state.current_local.clone())
    }

    /// Applied remote description (pending offer first)
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote_description().cloned()
    }

    /// Every remote description applied so far, in order
    pub fn applied_remote_descriptions(&self) -> Vec<SessionDescription> {
        self.state.lock().applied_remote.clone()
    }

    /// Remote candidates applied in the current ICE generation, in order
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Current connection state
    pub fn connection_state(&self) -> PeerConnectionState {
        self.state.lock().connection
    }

    /// Current local ICE ufrag
    pub fn local_ufrag(&self) -> String {
        self.state.lock().local_ufrag.clone()
    }

    /// Force a connection state change, as a real transport would report it
    pub fn simulate_connection_state(&self, connection: PeerConnectionState) {
        self.state.lock().connection = connection;
        self.sink.emit(TransportEventKind::ConnectionState(connection));
    }

    /// Report an ICE transport state change
    pub fn simulate_ice_state(&self, ice: IceConnectionState) {
        self.sink.emit(TransportEventKind::IceConnectionState(ice));
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    fn has_remote_description(&self) -> bool {
        self.state.lock().remote_description().is_some()
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        let remote_kinds = state.remote_kinds();
        let kinds: Vec<TrackKind> = TrackKind::ALL
            .into_iter()
            .filter(|k| state.sender(*k).is_some() || remote_kinds.contains(k))
            .collect();

        let ufrag = if state.ice_restart {
            new_ufrag()
        } else {
            state.local_ufrag.clone()
        };
        let sdp = state.render(&self.local_id, &kinds, &ufrag);
        debug!("{} created offer for {} ({} m-lines)", self.local_id, self.peer_id, kinds.len());
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(Error::SdpError(format!(
                "cannot create answer in state {}",
                state.signaling
            )));
        }

        let offer = state
            .remote_description()
            .map(|d| ParsedSdp::parse(&d.sdp))
            .transpose()?
            .unwrap_or_default();
        let kinds: Vec<TrackKind> = offer.media.iter().filter_map(|m| m.kind).collect();
        let ufrag = state.local_ufrag.clone();
        let sdp = state.render(&self.local_id, &kinds, &ufrag);
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp_type == SdpType::Rollback {
            return self.rollback().await;
        }

        let events = {
            let mut state = self.state.lock();
            state.ensure_open()?;
            let parsed = ParsedSdp::parse(&description.sdp)?;
            let included = parsed.track_ids();
            let mut events = Vec::new();

            if description.sdp_type == SdpType::Offer {
                if !matches!(
                    state.signaling,
                    SignalingState::Stable | SignalingState::HaveLocalOffer
                ) {
                    return Err(Error::SdpError(format!(
                        "cannot apply local offer in state {}",
                        state.signaling
                    )));
                }
                if let Some(ufrag) = parsed.ufrag.clone() {
                    if ufrag != state.local_ufrag {
                        let previous = std::mem::replace(&mut state.local_ufrag, ufrag);
                        state.previous_ufrag.get_or_insert(previous);
                    }
                }
                state.ice_restart = false;
                for sender in state.senders.iter_mut() {
                    if sender.status == SenderStatus::Pending
                        && included.contains(sender.id.as_str())
                    {
                        sender.status = SenderStatus::Offered;
                    }
                }
                state.pending_local = Some(description);
                state.signaling = SignalingState::HaveLocalOffer;
                state.negotiation_fired = false;
                events.extend(
                    state
                        .gather(&parsed)
                        .into_iter()
                        .map(TransportEventKind::LocalCandidate),
                );
            } else {
                if state.signaling != SignalingState::HaveRemoteOffer {
                    return Err(Error::SdpError(format!(
                        "cannot apply local answer in state {}",
                        state.signaling
                    )));
                }
                for sender in state.senders.iter_mut() {
                    if included.contains(sender.id.as_str()) {
                        sender.status = SenderStatus::Negotiated;
                    }
                }
                state.current_local = Some(description);
                state.current_remote = state.pending_remote.take();
                state.pending_local = None;
                events.extend(
                    state
                        .gather(&parsed)
                        .into_iter()
                        .map(TransportEventKind::LocalCandidate),
                );
                events.extend(state.enter_stable());
            }
            events
        };

        self.emit_all(events);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        match state.signaling {
            SignalingState::HaveLocalOffer => {
                if let Some(previous) = state.previous_ufrag.take() {
                    state.local_ufrag = previous;
                    state.ice_restart = true;
                }
                for sender in state.senders.iter_mut() {
                    if sender.status == SenderStatus::Offered {
                        sender.status = SenderStatus::Pending;
                    }
                }
                state.pending_local = None;
            }
            SignalingState::HaveRemoteOffer => {
                state.pending_remote = None;
            }
            other => {
                return Err(Error::SdpError(format!("cannot roll back in state {}", other)));
            }
        }

        // Negotiation-needed is re-evaluated when the exchange that caused
        // the rollback completes.
        state.signaling = SignalingState::Stable;
        state.negotiation_fired = false;
        debug!("{} rolled back negotiation with {}", self.local_id, self.peer_id);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp_type == SdpType::Rollback {
            return self.rollback().await;
        }

        let events = {
            let mut state = self.state.lock();
            state.ensure_open()?;
            let parsed = ParsedSdp::parse(&description.sdp)?;
            let is_offer = description.sdp_type == SdpType::Offer;

            if is_offer {
                if !matches!(
                    state.signaling,
                    SignalingState::Stable | SignalingState::HaveRemoteOffer
                ) {
                    return Err(Error::SdpError(format!(
                        "cannot apply remote offer in state {}",
                        state.signaling
                    )));
                }
                if parsed.ufrag.is_some() && parsed.ufrag != state.remote_ufrag {
                    if state.remote_ufrag.is_some() {
                        // Remote ICE restart: new generation on both sides
                        state.local_ufrag = new_ufrag();
                        state.remote_candidates.clear();
                    }
                    state.remote_ufrag = parsed.ufrag.clone();
                }
                state.pending_remote = Some(description.clone());
                state.signaling = SignalingState::HaveRemoteOffer;
            } else {
                if state.signaling != SignalingState::HaveLocalOffer {
                    return Err(Error::SdpError(format!(
                        "cannot apply remote answer in state {}",
                        state.signaling
                    )));
                }
                if parsed.ufrag.is_some() && parsed.ufrag != state.remote_ufrag {
                    if state.remote_ufrag.is_some() {
                        state.remote_candidates.clear();
                    }
                    state.remote_ufrag = parsed.ufrag.clone();
                }
                let answered = parsed.kinds();
                for sender in state.senders.iter_mut() {
                    if sender.status == SenderStatus::Offered {
                        sender.status = if answered.contains(&sender.kind) {
                            SenderStatus::Negotiated
                        } else {
                            SenderStatus::Pending
                        };
                    }
                }
                state.previous_ufrag = None;
                state.current_local = state.pending_local.take();
                state.current_remote = Some(description.clone());
                state.pending_remote = None;
            }

            state.applied_remote.push(description);
            let mut events: Vec<TransportEventKind> = state
                .discover_tracks(&parsed)
                .into_iter()
                .map(TransportEventKind::RemoteTrack)
                .collect();
            if !is_offer {
                events.extend(state.enter_stable());
            }
            events
        };

        self.emit_all(events);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let events = {
            let mut state = self.state.lock();
            state.ensure_open()?;

            let Some(remote) = state.remote_description() else {
                return Err(Error::IceCandidateError(
                    "no remote description".to_string(),
                ));
            };
            let kinds = ParsedSdp::parse(&remote.sdp)?.kinds();

            if let (Some(ufrag), Some(expected)) = (&candidate.username_fragment, &state.remote_ufrag)
            {
                if ufrag != expected {
                    return Err(Error::IceCandidateError(format!(
                        "candidate ufrag {} does not match remote ufrag {}",
                        ufrag, expected
                    )));
                }
            }
            if let Some(mid) = &candidate.sdp_mid {
                if !TrackKind::parse(mid).is_some_and(|kind| kinds.contains(&kind)) {
                    return Err(Error::IceCandidateError(format!("unknown mid {}", mid)));
                }
            }

            state.remote_candidates.push(candidate);
            state
                .connected_transition()
                .map(TransportEventKind::ConnectionState)
                .into_iter()
                .collect::<Vec<_>>()
        };

        self.emit_all(events);
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let fire = {
            let mut state = self.state.lock();
            state.ensure_open()?;
            if state.sender(track.kind()).is_some() {
                return Err(Error::MediaTrackError(format!(
                    "{} sender already exists",
                    track.kind()
                )));
            }
            state.senders.push(Sender {
                id: uuid::Uuid::new_v4().to_string(),
                kind: track.kind(),
                track: Some(track.clone()),
                status: SenderStatus::Pending,
            });
            state.take_negotiation_needed()
        };

        if fire {
            self.sink.emit(TransportEventKind::NegotiationNeeded);
        }
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: Option<&MediaTrack>) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if let Some(track) = track {
            if track.kind() != kind {
                return Err(Error::MediaTrackError(format!(
                    "cannot put {} track on {} sender",
                    track.kind(),
                    kind
                )));
            }
        }
        let sender = state
            .senders
            .iter_mut()
            .find(|s| s.kind == kind)
            .ok_or_else(|| Error::MediaTrackError(format!("no {} sender", kind)))?;
        sender.track = track.cloned();
        Ok(())
    }

    fn has_sender(&self, kind: TrackKind) -> bool {
        self.state.lock().sender(kind).is_some()
    }

    fn sender_track(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.state.lock().sender(kind).and_then(|s| s.track.clone())
    }

    fn sender_count(&self, kind: TrackKind) -> usize {
        self.state
            .lock()
            .senders
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    async fn restart_ice(&self) -> Result<()> {
        let fire = {
            let mut state = self.state.lock();
            state.ensure_open()?;
            state.ice_restart = true;
            state.take_negotiation_needed()
        };
        debug!("{} requested ICE restart with {}", self.local_id, self.peer_id);
        if fire {
            self.sink.emit(TransportEventKind::NegotiationNeeded);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.signaling == SignalingState::Closed {
            return Ok(());
        }
        state.signaling = SignalingState::Closed;
        state.connection = PeerConnectionState::Closed;
        for sender in state.senders.iter_mut() {
            sender.track = None;
        }
        debug!("{} closed connection to {}", self.local_id, self.peer_id);
        Ok(())
    }
}

/// Builds [`LoopbackTransport`]s and keeps the latest one per peer for inspection
pub struct LoopbackFactory {
    local_id: PeerId,
    transports: Mutex<HashMap<PeerId, Arc<LoopbackTransport>>>,
    created: AtomicUsize,
}

impl LoopbackFactory {
    /// Factory for connections owned by `local_id`
    pub fn new(local_id: impl Into<PeerId>) -> Self {
        Self {
            local_id: local_id.into(),
            transports: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Most recent connection to `peer_id`
    pub fn transport(&self, peer_id: &str) -> Option<Arc<LoopbackTransport>> {
        self.transports.lock().get(peer_id).cloned()
    }

    /// Number of connections created so far
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn create(&self, peer_id: &str, sink: EventSink) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(LoopbackTransport::new(
            self.local_id.clone(),
            peer_id.to_string(),
            sink,
        ));
        self.transports
            .lock()
            .insert(peer_id.to_string(), transport.clone());
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(transport)
    }
}
