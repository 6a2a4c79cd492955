//! Peer connection implementations
//!
//! - [`loopback`]: deterministic in-memory transport for tests and the demo
//! - [`rtc`]: native peer connections through webrtc-rs (feature `webrtc-rs`)

pub mod loopback;

#[cfg(feature = "webrtc-rs")]
pub mod rtc;

pub use loopback::{LoopbackFactory, LoopbackTransport};

#[cfg(feature = "webrtc-rs")]
pub use rtc::{RtcTransport, RtcTransportFactory};
