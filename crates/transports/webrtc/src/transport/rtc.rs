//! Native peer connections through webrtc-rs
//!
//! Wraps an [`RTCPeerConnection`] behind [`PeerTransport`]. Every local
//! [`MediaTrack`] is mapped to a [`TrackLocalStaticSample`] that the capture
//! pipeline writes samples into; senders are kept per kind so that track
//! switches go through `RTCRtpSender::replace_track`.

use crate::config::MeshConfig;
use crate::media::{MediaTrack, RemoteTrack, TrackKind};
use crate::peer::{
    EventSink, IceConnectionState, PeerConnectionState, PeerTransport, SignalingState,
    TransportEventKind, TransportFactory,
};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, PeerId, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

struct SenderSlot {
    sender: Arc<RTCRtpSender>,
    track: Option<MediaTrack>,
}

/// [`PeerTransport`] backed by webrtc-rs
pub struct RtcTransport {
    peer_id: PeerId,
    stream_id: String,
    pc: Arc<RTCPeerConnection>,
    sink: EventSink,
    senders: Mutex<HashMap<TrackKind, SenderSlot>>,
    local_tracks: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
    has_remote: AtomicBool,
    ice_restart: AtomicBool,
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            // webrtc-rs refuses an empty rollback, so it carries the SDP being undone
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = description.sdp;
            return Ok(rollback);
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse SDP: {}", e)))
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::SdpError("unspecified SDP type".to_string()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(PeerConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

fn candidate_from_rtc(candidate: &RTCIceCandidate) -> Result<IceCandidate> {
    let init = candidate
        .to_json()
        .map_err(|e| Error::IceCandidateError(format!("Failed to encode candidate: {}", e)))?;
    Ok(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    })
}

impl RtcTransport {
    /// Open a peer connection to `peer_id` and wire its callbacks into `sink`
    #[instrument(skip(api, config, sink), fields(peer_id = %peer_id))]
    pub async fn new(
        api: &API,
        config: &MeshConfig,
        local_id: &str,
        peer_id: &str,
        sink: EventSink,
    ) -> Result<Self> {
        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ice_candidate_pool_size: config.ice_candidate_pool_size,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        let candidate_sink = sink.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else { return };
                match candidate_from_rtc(&candidate) {
                    Ok(candidate) => sink.emit(TransportEventKind::LocalCandidate(candidate)),
                    Err(e) => warn!("Dropping local candidate for {}: {}", sink.peer_id(), e),
                }
            })
        }));

        let negotiation_sink = sink.clone();
        pc.on_negotiation_needed(Box::new(move || {
            let sink = negotiation_sink.clone();
            Box::pin(async move {
                sink.emit(TransportEventKind::NegotiationNeeded);
            })
        }));

        let track_sink = sink.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = track_sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    RTPCodecType::Unspecified => return,
                };
                sink.emit(TransportEventKind::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_id: track.stream_id(),
                }));
            })
        }));

        let state_sink = sink.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let sink = state_sink.clone();
            Box::pin(async move {
                if let Some(state) = map_connection_state(state) {
                    sink.emit(TransportEventKind::ConnectionState(state));
                }
            })
        }));

        let ice_sink = sink.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let sink = ice_sink.clone();
            Box::pin(async move {
                if let Some(state) = map_ice_state(state) {
                    sink.emit(TransportEventKind::IceConnectionState(state));
                }
            })
        }));

        info!("Created peer connection {} -> {}", local_id, peer_id);

        Ok(Self {
            peer_id: peer_id.to_string(),
            stream_id: format!("{}-stream", local_id),
            pc,
            sink,
            senders: Mutex::new(HashMap::new()),
            local_tracks: Mutex::new(HashMap::new()),
            has_remote: AtomicBool::new(false),
            ice_restart: AtomicBool::new(false),
        })
    }

    /// RTP track backing `track`; the capture pipeline writes samples into it
    pub fn local_track(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        self.local_tracks
            .lock()
            .entry(track.id().to_string())
            .or_insert_with(|| {
                Arc::new(TrackLocalStaticSample::new(
                    codec_for(track.kind()),
                    track.id().to_string(),
                    self.stream_id.clone(),
                ))
            })
            .clone()
    }

    /// Underlying webrtc-rs connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => SignalingState::Closed,
            RTCSignalingState::Stable | RTCSignalingState::Unspecified => SignalingState::Stable,
        }
    }

    fn has_remote_description(&self) -> bool {
        self.has_remote.load(Ordering::Acquire)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let options = self.ice_restart.load(Ordering::Acquire).then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let is_offer = description.sdp_type == SdpType::Offer;
        self.pc
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;
        if is_offer {
            self.ice_restart.store(false, Ordering::Release);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let pending = self
            .pc
            .pending_local_description()
            .await
            .ok_or_else(|| Error::SdpError("no local offer to roll back".to_string()))?;
        let rollback = to_rtc_description(SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: pending.sdp,
        })?;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to roll back: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;
        self.has_remote.store(true, Ordering::Release);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let kind = track.kind();
        if self.senders.lock().contains_key(&kind) {
            return Err(Error::MediaTrackError(format!("{} sender already exists", kind)));
        }

        let local = self.local_track(track);
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add {} track: {}", kind, e)))?;

        // Drain RTCP so the interceptors keep running
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().insert(
            kind,
            SenderSlot {
                sender,
                track: Some(track.clone()),
            },
        );
        debug!("Added {} sender for peer {}", kind, self.peer_id);
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: Option<&MediaTrack>) -> Result<()> {
        let sender = self
            .senders
            .lock()
            .get(&kind)
            .map(|slot| slot.sender.clone())
            .ok_or_else(|| Error::MediaTrackError(format!("no {} sender", kind)))?;

        let local = track.map(|t| self.local_track(t) as Arc<dyn TrackLocal + Send + Sync>);
        sender.replace_track(local).await.map_err(|e| {
            Error::MediaTrackError(format!("Failed to replace {} track: {}", kind, e))
        })?;

        if let Some(slot) = self.senders.lock().get_mut(&kind) {
            slot.track = track.cloned();
        }
        Ok(())
    }

    fn has_sender(&self, kind: TrackKind) -> bool {
        self.senders.lock().contains_key(&kind)
    }

    fn sender_track(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.senders.lock().get(&kind).and_then(|slot| slot.track.clone())
    }

    fn sender_count(&self, kind: TrackKind) -> usize {
        usize::from(self.senders.lock().contains_key(&kind))
    }

    async fn restart_ice(&self) -> Result<()> {
        self.ice_restart.store(true, Ordering::Release);
        self.sink.emit(TransportEventKind::NegotiationNeeded);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.pc.signaling_state() == RTCSignalingState::Closed {
            return Ok(());
        }
        info!("Closing peer connection for peer {}", self.peer_id);
        self.senders.lock().clear();
        self.pc.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

/// Builds [`RtcTransport`]s sharing one webrtc-rs API instance
pub struct RtcTransportFactory {
    local_id: PeerId,
    config: MeshConfig,
    api: API,
}

impl RtcTransportFactory {
    /// Factory with default codecs and interceptors
    pub fn new(local_id: impl Into<PeerId>, config: MeshConfig) -> Result<Self> {
        config.validate()?;

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(
            Default::default(),
            &mut media_engine,
        )
        .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self {
            local_id: local_id.into(),
            config,
            api,
        })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self, peer_id: &str, sink: EventSink) -> Result<Arc<dyn PeerTransport>> {
        let transport =
            RtcTransport::new(&self.api, &self.config, &self.local_id, peer_id, sink).await?;
        Ok(Arc::new(transport))
    }
}
