//! Session Coordinator
//!
//! Glue between the UI toggles, the signaling channel, the Track Manager and
//! the Peer Connection Registry. Everything that can happen to a session is
//! turned into a [`SessionEvent`] or a direct call on [`SessionCoordinator`],
//! and each is handled to completion before the next one starts, so no two
//! negotiation steps for the same peer ever interleave.

use super::context::{PeerMediaState, RoomContext, ScreenSharer};
use super::observer::{LocalStateSnapshot, SessionObserver};
use crate::config::MeshConfig;
use crate::media::{
    LocalMediaState, MediaDevices, MediaTrack, RemoteStream, TrackEndReason, TrackKind,
    TrackManager, TrackSource,
};
use crate::peer::{
    NegotiationStats, OfferPhase, PeerConnectionState, PeerRegistry, SignalingState,
    TransportEvent, TransportEventKind, TransportFactory,
};
use crate::signaling::{
    IceCandidate, OutboundSignal, SessionDescription, SignalMessage, SignalingChannel,
};
use crate::{Error, PeerId, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Something the coordinator has to react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Callback from a peer transport
    Transport(TransportEvent),
    /// A local track stopped producing media
    TrackEnded {
        /// Track id
        track_id: String,
        /// Capture source of the track
        source: TrackSource,
        /// Who ended it
        reason: TrackEndReason,
    },
}

/// Request sent to a running session through a [`SessionHandle`]
#[derive(Debug)]
pub enum SessionCommand {
    /// Toggle the microphone; replies with the new mic state
    ToggleMicrophone(oneshot::Sender<Result<bool>>),
    /// Toggle the camera; replies with the new camera state
    ToggleCamera(oneshot::Sender<Result<bool>>),
    /// Toggle screen sharing; replies with the new share state
    ToggleScreenShare(oneshot::Sender<Result<bool>>),
    /// Report the current state of the session
    Summary(oneshot::Sender<SessionSummary>),
    /// Leave the room and stop the session loop
    LeaveRoom(oneshot::Sender<Result<()>>),
}

/// Local media flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalSummary {
    /// Microphone on
    pub mic_on: bool,
    /// Camera video on
    pub cam_on: bool,
    /// Screen capture on
    pub screen_on: bool,
}

/// State of one peer connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStatus {
    /// Remote peer id
    pub peer_id: PeerId,
    /// Display name, when known
    pub username: Option<String>,
    /// Connection generation
    pub generation: u64,
    /// Whether we defer during offer collisions
    pub polite: bool,
    /// JSEP signaling state
    pub signaling_state: SignalingState,
    /// Aggregate connection state
    pub connection_state: PeerConnectionState,
    /// Negotiation phase
    pub phase: OfferPhase,
    /// Negotiation counters
    pub stats: NegotiationStats,
    /// Tracks received from the peer
    pub remote: RemoteStream,
    /// Badges the peer announced
    pub media: PeerMediaState,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Room id
    pub room_id: String,
    /// Our peer id
    pub peer_id: PeerId,
    /// Local media
    pub local: LocalSummary,
    /// Advisory screen sharer
    pub sharer: Option<ScreenSharer>,
    /// Peer connections, ordered by peer id
    pub peers: Vec<PeerStatus>,
    /// Whether the session has left the room
    pub closed: bool,
}

/// Handle for driving a session running on its own task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Handle plus the command stream to pass to [`SessionCoordinator::run`]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| Error::SessionClosed("session loop has stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::SessionClosed("session loop dropped the request".to_string()))
    }

    /// See [`SessionCoordinator::toggle_microphone`]
    pub async fn toggle_microphone(&self) -> Result<bool> {
        self.request(SessionCommand::ToggleMicrophone).await?
    }

    /// See [`SessionCoordinator::toggle_camera`]
    pub async fn toggle_camera(&self) -> Result<bool> {
        self.request(SessionCommand::ToggleCamera).await?
    }

    /// See [`SessionCoordinator::toggle_screen_share`]
    pub async fn toggle_screen_share(&self) -> Result<bool> {
        self.request(SessionCommand::ToggleScreenShare).await?
    }

    /// See [`SessionCoordinator::summary`]
    pub async fn summary(&self) -> Result<SessionSummary> {
        self.request(SessionCommand::Summary).await
    }

    /// See [`SessionCoordinator::leave_room`]
    pub async fn leave_room(&self) -> Result<()> {
        self.request(SessionCommand::LeaveRoom).await?
    }
}

/// One client's view of a conferencing room
pub struct SessionCoordinator {
    config: MeshConfig,
    context: RoomContext,
    tracks: TrackManager,
    registry: PeerRegistry,
    signaling: Arc<dyn SignalingChannel>,
    devices: Arc<dyn MediaDevices>,
    observer: Arc<dyn SessionObserver>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    camera_before_share: bool,
    closed: bool,
}

impl SessionCoordinator {
    /// Create a session for `context.local_id()`
    ///
    /// `factory` must build connections owned by the same local peer id.
    pub fn new(
        config: MeshConfig,
        context: RoomContext,
        signaling: Arc<dyn SignalingChannel>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn TransportFactory>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatch_tx = events_tx.clone();
        let registry = PeerRegistry::new(
            context.local_id(),
            &config,
            factory,
            Arc::new(move |event| {
                // Receiver lives as long as the coordinator
                let _ = dispatch_tx.send(SessionEvent::Transport(event));
            }),
        );

        info!(
            "Session created for {} in room {} (max {} peers)",
            context.local_id(),
            context.room_id(),
            config.max_peers
        );

        Ok(Self {
            config,
            context,
            tracks: TrackManager::new(),
            registry,
            signaling,
            devices,
            observer,
            events_tx,
            events_rx,
            camera_before_share: false,
            closed: false,
        })
    }

    /// Our peer id
    pub fn local_id(&self) -> &str {
        self.context.local_id()
    }

    /// Room state
    pub fn context(&self) -> &RoomContext {
        &self.context
    }

    /// Local media
    pub fn local_state(&self) -> &LocalMediaState {
        self.tracks.state()
    }

    /// Peer connections
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Whether [`SessionCoordinator::leave_room`] has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed(format!(
                "{} already left room {}",
                self.context.local_id(),
                self.context.room_id()
            )));
        }
        Ok(())
    }

    // ----- UI toggles -----

    /// Turn the microphone on or off; returns the new state
    ///
    /// Device errors are returned as-is and leave local media unchanged.
    pub async fn toggle_microphone(&mut self) -> Result<bool> {
        self.ensure_open()?;

        if self.tracks.state().mic_on() {
            let peers = self.registry.transports();
            self.tracks.clear_track(TrackKind::Audio, &peers).await;
        } else {
            let mic = self.devices.open_microphone(&self.config.audio).await?;
            self.install(TrackKind::Audio, mic).await?;
        }

        self.local_media_changed().await;
        Ok(self.tracks.state().mic_on())
    }

    /// Turn the camera on or off; returns the new state
    ///
    /// Turning the camera on while sharing the screen ends the share.
    pub async fn toggle_camera(&mut self) -> Result<bool> {
        self.ensure_open()?;

        if self.tracks.state().cam_on() {
            let peers = self.registry.transports();
            self.tracks.clear_track(TrackKind::Video, &peers).await;
        } else {
            let camera = self.devices.open_camera(&self.config.camera).await?;
            let was_sharing = self.tracks.state().screen_on();
            self.install(TrackKind::Video, camera).await?;
            if was_sharing {
                info!("Camera enabled while sharing; ending screen share");
                self.camera_before_share = false;
                self.announce_share_stopped().await;
            }
        }

        self.local_media_changed().await;
        Ok(self.tracks.state().cam_on())
    }

    /// Start or stop sharing the screen; returns whether a share is active
    ///
    /// Starting replaces any camera video in place. Stopping restores the
    /// camera when it was on before the share began.
    pub async fn toggle_screen_share(&mut self) -> Result<bool> {
        self.ensure_open()?;

        if self.tracks.state().screen_on() {
            self.stop_screen_share().await;
            return Ok(false);
        }

        let screen = self.devices.open_display(&self.config.display).await?;
        let camera_was_on = self.tracks.state().cam_on();
        self.install(TrackKind::Video, screen).await?;
        self.camera_before_share = camera_was_on;

        self.send(OutboundSignal::ScreenShareStarted).await;
        if self.context.local_share_started() {
            self.notify_sharer();
        }
        self.local_media_changed().await;

        info!(
            "{} started sharing (camera was {})",
            self.context.local_id(),
            if camera_was_on { "on" } else { "off" }
        );
        Ok(true)
    }

    /// Host-ordered mute
    ///
    /// Releases the microphone like a toggle would. The broadcast carries
    /// the off state only; nothing asks the user to re-enable.
    pub async fn force_mute(&mut self) {
        if self.closed || !self.tracks.state().mic_on() {
            debug!("Force mute: microphone already off");
            return;
        }

        let peers = self.registry.transports();
        self.tracks.clear_track(TrackKind::Audio, &peers).await;
        info!("{} was muted by the host", self.context.local_id());
        self.local_media_changed().await;
    }

    /// Stop all local media, close every connection and leave the room
    ///
    /// Idempotent; only the first call has side effects.
    pub async fn leave_room(&mut self) -> Result<()> {
        if self.closed {
            debug!("{} already left", self.context.local_id());
            return Ok(());
        }
        self.closed = true;

        if self.tracks.state().screen_on() || self.context.is_local_sharer() {
            self.send(OutboundSignal::ScreenShareStopped).await;
        }
        self.camera_before_share = false;
        self.tracks.stop_all();

        let closed = self.registry.clear().await;
        self.send(OutboundSignal::LeaveRoom).await;

        // Anything still queued belongs to connections that no longer exist
        while self.events_rx.try_recv().is_ok() {}

        let sharer_changed = self.context.reset();
        self.notify_local();
        self.notify_streams();
        if sharer_changed {
            self.notify_sharer();
        }

        info!(
            "{} left room {} ({} connections closed)",
            self.context.local_id(),
            self.context.room_id(),
            closed
        );
        Ok(())
    }

    async fn install(&mut self, kind: TrackKind, track: MediaTrack) -> Result<()> {
        let peers = self.registry.transports();
        let report = if kind == TrackKind::Video {
            self.tracks.swap_video_source(track.clone(), &peers).await?.1
        } else {
            self.tracks.set_track(kind, track.clone(), &peers).await?
        };
        if report.needs_negotiation() {
            debug!("{} new {} senders; negotiation will follow", report.added, kind);
        }
        self.watch_track_end(&track);
        Ok(())
    }

    async fn stop_screen_share(&mut self) {
        self.announce_share_stopped().await;

        let restore = std::mem::take(&mut self.camera_before_share)
            && self.config.restore_camera_after_share;
        let peers = self.registry.transports();
        let mut restored = false;

        if restore {
            match self.devices.open_camera(&self.config.camera).await {
                Ok(camera) => match self.tracks.swap_video_source(camera.clone(), &peers).await {
                    Ok(_) => {
                        self.watch_track_end(&camera);
                        restored = true;
                    }
                    Err(e) => warn!("Could not restore camera after screen share: {}", e),
                },
                Err(e) => warn!("Could not restore camera after screen share: {}", e),
            }
        }
        if !restored {
            self.tracks.clear_track(TrackKind::Video, &peers).await;
        }

        info!(
            "{} stopped sharing (camera {})",
            self.context.local_id(),
            if restored { "restored" } else { "off" }
        );
        self.local_media_changed().await;
    }

    async fn announce_share_stopped(&mut self) {
        self.send(OutboundSignal::ScreenShareStopped).await;
        if self.context.local_share_stopped() {
            self.notify_sharer();
        }
    }

    fn watch_track_end(&self, track: &MediaTrack) {
        let track = track.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let reason = track.ended().await;
            let _ = events.send(SessionEvent::TrackEnded {
                track_id: track.id().to_string(),
                source: track.source(),
                reason,
            });
        });
    }

    // ----- event queue -----

    /// Handle every queued event; returns how many were handled
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Handle one queued event or transport callback
    pub async fn handle_event(&mut self, event: SessionEvent) {
        if self.closed {
            return;
        }
        match event {
            SessionEvent::Transport(event) => self.handle_transport_event(event).await,
            SessionEvent::TrackEnded {
                track_id,
                source,
                reason,
            } => self.handle_track_ended(&track_id, source, reason).await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let TransportEvent {
            peer_id,
            generation,
            kind,
        } = event;

        if !self.registry.is_current(&peer_id, generation) {
            debug!(
                "Ignoring {:?} from stale connection {} (generation {})",
                kind, peer_id, generation
            );
            return;
        }

        match kind {
            TransportEventKind::LocalCandidate(candidate) => {
                self.send(OutboundSignal::Candidate {
                    target_id: peer_id,
                    candidate,
                })
                .await;
            }
            TransportEventKind::NegotiationNeeded => {
                let Some(entry) = self.registry.get_mut(&peer_id) else {
                    return;
                };
                if let Err(e) = entry
                    .negotiator
                    .on_negotiation_needed(entry.transport.as_ref(), self.signaling.as_ref())
                    .await
                {
                    warn!("Failed to send offer to {}: {}", peer_id, e);
                }
            }
            TransportEventKind::RemoteTrack(track) => {
                if self.registry.on_remote_track(&peer_id, track) {
                    self.notify_streams();
                }
            }
            TransportEventKind::ConnectionState(state) => {
                self.observer.on_peer_connection_state(&peer_id, state);
                if self.registry.on_connection_state(&peer_id, state).await {
                    self.notify_streams();
                }
            }
            TransportEventKind::IceConnectionState(state) => {
                self.registry.on_ice_connection_state(&peer_id, state).await;
            }
        }
    }

    async fn handle_track_ended(
        &mut self,
        track_id: &str,
        source: TrackSource,
        reason: TrackEndReason,
    ) {
        if reason == TrackEndReason::Stopped {
            return;
        }
        let current = self
            .tracks
            .state()
            .track(source.kind())
            .is_some_and(|track| track.id() == track_id);
        if !current {
            debug!("Ended track {} is no longer in use", track_id);
            return;
        }

        info!("Local {:?} track {} ended by its source", source, track_id);
        match source {
            TrackSource::Screen => self.stop_screen_share().await,
            TrackSource::Camera | TrackSource::Microphone => {
                let peers = self.registry.transports();
                self.tracks.clear_track(source.kind(), &peers).await;
                self.local_media_changed().await;
            }
        }
    }

    // ----- signaling -----

    /// Handle a message from the signaling channel
    ///
    /// Negotiation failures are logged and contained to the peer they
    /// belong to.
    #[instrument(skip_all, fields(local_id = %self.context.local_id(), signal = message.type_name()))]
    pub async fn handle_signal(&mut self, message: SignalMessage) {
        if self.closed {
            debug!("Dropping {} after leaving", message.type_name());
            return;
        }

        match message {
            SignalMessage::RoomJoined { peers } => {
                info!("Joined room with {} peers", peers.len());
                for peer in peers {
                    self.on_peer_joined(&peer.peer_id, Some(peer.username)).await;
                }
            }
            SignalMessage::PeerJoined { peer_id, username } => {
                self.on_peer_joined(&peer_id, Some(username)).await;
            }
            SignalMessage::PeerLeft { peer_id } => self.on_peer_left(&peer_id).await,
            SignalMessage::Offer {
                from,
                description,
                username,
            } => self.on_offer(&from, description, username).await,
            SignalMessage::Answer { from, description } => self.on_answer(&from, description).await,
            SignalMessage::Candidate { from, candidate } => {
                self.on_candidate(&from, candidate).await;
            }
            SignalMessage::MediaStateChanged {
                from,
                mic_on,
                cam_on,
            } => {
                self.context
                    .set_peer_media(&from, PeerMediaState { mic_on, cam_on });
                self.observer.on_peer_media_state(&from, mic_on, cam_on);
            }
            SignalMessage::ScreenShareStarted { peer_id, username } => {
                if self.context.remote_share_started(&peer_id, &username) {
                    self.notify_sharer();
                }
            }
            SignalMessage::ScreenShareStopped { peer_id } => {
                if self.context.remote_share_stopped(&peer_id) {
                    self.notify_sharer();
                }
            }
            SignalMessage::ForceMuted => self.force_mute().await,
        }
    }

    async fn on_peer_joined(&mut self, peer_id: &str, username: Option<String>) {
        let entry = match self.registry.get_or_create(peer_id, self.tracks.state()).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot connect to {}: {}", peer_id, e);
                return;
            }
        };
        if username.is_some() {
            entry.username = username;
        }

        let report = self.tracks.ensure_senders(entry.transport.as_ref()).await;
        if report.added + report.replaced > 0 {
            debug!(
                "Populated senders for {} ({} replaced, {} added)",
                peer_id, report.replaced, report.added
            );
        }
    }

    async fn on_peer_left(&mut self, peer_id: &str) {
        let removed = self.registry.remove(peer_id).await;
        if self.context.peer_left(peer_id) {
            self.notify_sharer();
        }
        if removed {
            info!("Peer {} left", peer_id);
            self.notify_streams();
        }
    }

    async fn on_offer(
        &mut self,
        from: &str,
        description: SessionDescription,
        username: Option<String>,
    ) {
        let entry = match self.registry.get_or_create(from, self.tracks.state()).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Rejecting offer from {}: {}", from, e);
                return;
            }
        };
        if entry.username.is_none() {
            entry.username = username;
        }

        match entry
            .negotiator
            .on_offer(description, entry.transport.as_ref(), self.signaling.as_ref())
            .await
        {
            Ok(outcome) => debug!("Offer from {}: {:?}", from, outcome),
            Err(e) => warn!("Failed to handle offer from {}: {}", from, e),
        }
    }

    async fn on_answer(&mut self, from: &str, description: SessionDescription) {
        let Some(entry) = self.registry.get_mut(from) else {
            debug!("Discarding answer from unknown peer {}", from);
            return;
        };
        match entry
            .negotiator
            .on_answer(description, entry.transport.as_ref())
            .await
        {
            Ok(outcome) => debug!("Answer from {}: {:?}", from, outcome),
            Err(e) => warn!("Failed to apply answer from {}: {}", from, e),
        }
    }

    async fn on_candidate(&mut self, from: &str, candidate: IceCandidate) {
        match self.registry.get_mut(from) {
            Some(entry) => {
                entry
                    .negotiator
                    .on_candidate(candidate, entry.transport.as_ref())
                    .await;
            }
            None => {
                self.registry.park_candidate(from, candidate);
            }
        }
    }

    // ----- outbound -----

    async fn send(&self, signal: OutboundSignal) {
        let name = signal.type_name();
        if let Err(e) = self.signaling.send(signal).await {
            warn!("Failed to send {}: {}", name, e);
        }
    }

    async fn local_media_changed(&self) {
        self.notify_local();
        let state = self.tracks.state();
        self.send(OutboundSignal::MediaStateChanged {
            mic_on: state.mic_on(),
            cam_on: state.video_on(),
        })
        .await;
    }

    fn notify_local(&self) {
        self.observer
            .on_local_state_changed(LocalStateSnapshot::from(self.tracks.state()));
    }

    fn notify_streams(&self) {
        self.observer
            .on_streams_changed(self.registry.streams_snapshot());
    }

    fn notify_sharer(&self) {
        self.observer.on_sharer_changed(self.context.sharer().cloned());
    }

    // ----- driving -----

    /// Current state of the session
    pub fn summary(&self) -> SessionSummary {
        let state = self.tracks.state();
        let mut peer_ids = self.registry.peer_ids();
        peer_ids.sort();

        let peers = peer_ids
            .iter()
            .filter_map(|id| self.registry.get(id))
            .map(|entry| PeerStatus {
                peer_id: entry.peer_id.clone(),
                username: entry.username.clone(),
                generation: entry.generation,
                polite: entry.negotiator.is_polite(),
                signaling_state: entry.transport.signaling_state(),
                connection_state: entry.connection_state,
                phase: entry.negotiator.phase(),
                stats: entry.negotiator.stats(),
                remote: entry.remote_stream.clone(),
                media: self.context.peer_media(&entry.peer_id),
            })
            .collect();

        SessionSummary {
            room_id: self.context.room_id().to_string(),
            peer_id: self.context.local_id().to_string(),
            local: LocalSummary {
                mic_on: state.mic_on(),
                cam_on: state.cam_on(),
                screen_on: state.screen_on(),
            },
            sharer: self.context.sharer().cloned(),
            peers,
            closed: self.closed,
        }
    }

    /// Drive the session until it leaves the room
    ///
    /// Internal events are handled before new signals and commands. The
    /// loop ends, leaving the room, when a leave is requested or either
    /// input closes.
    pub async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<SignalMessage>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        info!("Session loop started for {}", self.context.local_id());

        loop {
            tokio::select! {
                biased;

                Some(event) = self.events_rx.recv() => self.handle_event(event).await,

                message = signals.recv() => match message {
                    Some(message) => self.handle_signal(message).await,
                    None => {
                        info!("Signaling channel closed");
                        break;
                    }
                },

                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All session handles dropped");
                        break;
                    }
                },
            }
        }

        if let Err(e) = self.leave_room().await {
            warn!("Error leaving room: {}", e);
        }
        info!("Session loop stopped for {}", self.context.local_id());
    }

    /// Run the session on its own task
    pub fn spawn(
        self,
        signals: mpsc::UnboundedReceiver<SignalMessage>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (handle, commands) = SessionHandle::channel(32);
        let task = tokio::spawn(self.run(signals, commands));
        (handle, task)
    }

    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::ToggleMicrophone(reply) => {
                let _ = reply.send(self.toggle_microphone().await);
            }
            SessionCommand::ToggleCamera(reply) => {
                let _ = reply.send(self.toggle_camera().await);
            }
            SessionCommand::ToggleScreenShare(reply) => {
                let _ = reply.send(self.toggle_screen_share().await);
            }
            SessionCommand::Summary(reply) => {
                let _ = reply.send(self.summary());
            }
            SessionCommand::LeaveRoom(reply) => {
                let _ = reply.send(self.leave_room().await);
                return false;
            }
        }
        true
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        // Ending the tracks releases the devices and lets the track-end
        // watchers finish
        if !self.closed {
            self.tracks.stop_all();
        }
    }
}
