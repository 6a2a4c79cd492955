//! Mesh session test harness
//!
//! A room of [`SessionCoordinator`]s wired over one [`MemoryBus`] with
//! loopback transports. Nothing runs on its own: [`MeshRoom::settle`]
//! pumps each session's event queue and delivers bus messages until the
//! room is quiescent, so every test sees a deterministic interleaving.
//!
//! Basic usage pattern:
//!
//! 1. Create a `MeshRoom` with the participant ids
//! 2. Call `room.settle()` so everyone connects
//! 3. Drive sessions through `room.session(id)` and settle again
//! 4. Inspect registries, loopback transports and observer events

#![allow(dead_code)]

use collabboard_webrtc::peer::PeerEntry;
use collabboard_webrtc::{
    ChannelObserver, LoopbackFactory, LoopbackTransport, MemoryBus, MeshConfig, ObserverEvent,
    RoomContext, SessionCoordinator, SignalMessage, SyntheticDevices,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Rounds [`MeshRoom::settle`] tolerates before giving up
const MAX_SETTLE_ROUNDS: usize = 200;

/// Consecutive idle rounds that count as quiescent
const IDLE_ROUNDS: usize = 3;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Unknown participant: {0}")]
    UnknownPeer(String),

    #[error("Room did not settle after {0} rounds")]
    Unsettled(usize),

    #[error("Missing connection {0} -> {1}")]
    MissingConnection(String, String),

    #[error("Session error: {0}")]
    Session(#[from] collabboard_webrtc::Error),
}

/// Initialize tracing for tests (safe to call from every test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,collabboard_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// One participant
pub struct MeshClient {
    /// Peer id
    pub id: String,
    /// Session under test
    pub session: SessionCoordinator,
    /// Messages the bus delivered to this participant, not yet handled
    pub signals: mpsc::UnboundedReceiver<SignalMessage>,
    /// Capture devices
    pub devices: Arc<SyntheticDevices>,
    /// Transport factory, for inspecting connections
    pub factory: Arc<LoopbackFactory>,
    /// Observer notifications
    pub observed: mpsc::UnboundedReceiver<ObserverEvent>,
}

/// A room of participants over one bus
pub struct MeshRoom {
    /// Shared signaling bus
    pub bus: MemoryBus,
    /// Room id
    pub room_id: String,
    config: MeshConfig,
    clients: Vec<MeshClient>,
}

impl MeshRoom {
    /// Room where `ids` join in order with the loopback-friendly config
    pub fn new(ids: &[&str]) -> Self {
        Self::with_config(ids, MeshConfig::local_only())
    }

    /// Room where `ids` join in order with `config`
    pub fn with_config(ids: &[&str], config: MeshConfig) -> Self {
        init_test_tracing();
        let mut room = Self {
            bus: MemoryBus::new(),
            room_id: "test-room".to_string(),
            config,
            clients: Vec::new(),
        };
        for id in ids {
            room.join(id);
        }
        room
    }

    /// Add a participant; it is announced on the next settle
    pub fn join(&mut self, id: &str) {
        let username = id.to_uppercase();
        let (signaling, signals) = self.bus.join(&self.room_id, id, &username);
        let devices = Arc::new(SyntheticDevices::new());
        let factory = Arc::new(LoopbackFactory::new(id));
        let (observer, observed) = ChannelObserver::new();

        let session = SessionCoordinator::new(
            self.config.clone(),
            RoomContext::new(&self.room_id, id, username),
            Arc::new(signaling),
            devices.clone(),
            factory.clone(),
            Arc::new(observer),
        )
        .expect("valid test config");

        info!("{} joined {}", id, self.room_id);
        self.clients.push(MeshClient {
            id: id.to_string(),
            session,
            signals,
            devices,
            factory,
            observed,
        });
    }

    /// Participant `id`
    pub fn client(&self, id: &str) -> HarnessResult<&MeshClient> {
        self.clients
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| HarnessError::UnknownPeer(id.to_string()))
    }

    /// Mutable participant `id`
    pub fn client_mut(&mut self, id: &str) -> HarnessResult<&mut MeshClient> {
        self.clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| HarnessError::UnknownPeer(id.to_string()))
    }

    /// Session of participant `id`
    pub fn session(&mut self, id: &str) -> HarnessResult<&mut SessionCoordinator> {
        Ok(&mut self.client_mut(id)?.session)
    }

    /// Registry entry `from` holds for `to`
    pub fn entry(&self, from: &str, to: &str) -> HarnessResult<&PeerEntry> {
        self.client(from)?
            .session
            .registry()
            .get(to)
            .ok_or_else(|| HarnessError::MissingConnection(from.to_string(), to.to_string()))
    }

    /// Loopback transport `from` holds for `to`
    pub fn transport(&self, from: &str, to: &str) -> HarnessResult<Arc<LoopbackTransport>> {
        self.client(from)?
            .factory
            .transport(to)
            .ok_or_else(|| HarnessError::MissingConnection(from.to_string(), to.to_string()))
    }

    /// Observer notifications `id` received since the last call
    pub fn observed(&mut self, id: &str) -> HarnessResult<Vec<ObserverEvent>> {
        let client = self.client_mut(id)?;
        let mut events = Vec::new();
        while let Ok(event) = client.observed.try_recv() {
            events.push(event);
        }
        Ok(events)
    }

    /// Pump every session until nothing moves; returns how many events and
    /// messages were handled
    ///
    /// Each round first runs every session's internal queue (offers and
    /// candidates go out), then delivers everything the bus queued.
    pub async fn settle(&mut self) -> HarnessResult<usize> {
        let mut total = 0;
        let mut idle = 0;

        for round in 0..MAX_SETTLE_ROUNDS {
            let mut handled = 0;

            for client in &mut self.clients {
                handled += client.session.process_pending().await;
            }
            for client in &mut self.clients {
                while let Ok(message) = client.signals.try_recv() {
                    debug!("round {}: {} <- {}", round, client.id, message.type_name());
                    client.session.handle_signal(message).await;
                    handled += 1;
                }
            }

            if handled == 0 {
                idle += 1;
                if idle >= IDLE_ROUNDS {
                    return Ok(total);
                }
                // Let track-end watchers run
                tokio::task::yield_now().await;
            } else {
                idle = 0;
                total += handled;
            }
        }

        Err(HarnessError::Unsettled(MAX_SETTLE_ROUNDS))
    }
}
