//! Session coordination
//!
//! Ties local media, the peer registry and the signaling channel together
//! for one client in one room.

pub mod context;
pub mod coordinator;
pub mod observer;

pub use context::{PeerMediaState, RoomContext, ScreenSharer};
pub use coordinator::{
    LocalSummary, PeerStatus, SessionCommand, SessionCoordinator, SessionEvent, SessionHandle,
    SessionSummary,
};
pub use observer::{
    ChannelObserver, LocalStateSnapshot, NoopObserver, ObserverEvent, SessionObserver,
};
