//! Integration tests for local track switching across the mesh
//!
//! Muting, camera toggles and screen sharing must reuse existing senders;
//! only a track kind a connection has never carried causes a new offer.

mod harness;

use collabboard_webrtc::{
    DeviceKind, Error, ObserverEvent, PeerTransport, ScreenSharer, TrackKind, TrackSource,
};
use harness::{HarnessResult, MeshRoom};

fn offers_sent(room: &MeshRoom, from: &str, to: &str) -> HarnessResult<u64> {
    Ok(room.entry(from, to)?.negotiator.stats().offers_sent)
}

fn remote_video_id(room: &MeshRoom, from: &str, to: &str) -> HarnessResult<Option<String>> {
    Ok(room
        .entry(from, to)?
        .remote_stream
        .video()
        .map(|track| track.id.clone()))
}

/// Badges announced by `peer_id`, oldest first
fn badges_from(events: &[ObserverEvent], peer_id: &str) -> Vec<(bool, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            ObserverEvent::PeerMediaState {
                peer_id: from,
                mic_on,
                cam_on,
            } if from == peer_id => Some((*mic_on, *cam_on)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_unmute_replaces_track_without_renegotiation() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;

    assert!(room.session("alice")?.toggle_microphone().await?);
    room.settle().await?;
    assert_eq!(offers_sent(&room, "alice", "bob")?, 1);
    let remote_audio = room
        .entry("bob", "alice")?
        .remote_stream
        .audio()
        .cloned()
        .expect("bob receives alice's microphone");

    let alice_side = room.transport("alice", "bob")?;

    // Mute: the sender stays, its track is nulled
    assert!(!room.session("alice")?.toggle_microphone().await?);
    room.settle().await?;
    assert_eq!(alice_side.sender_count(TrackKind::Audio), 1);
    assert!(alice_side.sender_track(TrackKind::Audio).is_none());
    let first_mic = room
        .client("alice")?
        .devices
        .last_opened(DeviceKind::Microphone)
        .expect("microphone was opened");
    assert!(!first_mic.is_live());

    // Unmute: a fresh capture track goes onto the same sender
    assert!(room.session("alice")?.toggle_microphone().await?);
    room.settle().await?;
    let second_mic = room
        .client("alice")?
        .devices
        .last_opened(DeviceKind::Microphone)
        .expect("microphone was reopened");
    assert_ne!(first_mic.id(), second_mic.id());
    assert_eq!(
        alice_side.sender_track(TrackKind::Audio).map(|t| t.id().to_string()),
        Some(second_mic.id().to_string())
    );
    assert_eq!(alice_side.sender_count(TrackKind::Audio), 1);

    assert_eq!(offers_sent(&room, "alice", "bob")?, 1);
    assert_eq!(
        room.entry("bob", "alice")?.remote_stream.audio(),
        Some(&remote_audio)
    );
    Ok(())
}

#[tokio::test]
async fn test_first_video_adds_sender_once() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;

    room.session("alice")?.toggle_microphone().await?;
    room.settle().await?;
    room.session("alice")?.toggle_camera().await?;
    room.settle().await?;
    assert_eq!(offers_sent(&room, "alice", "bob")?, 2);

    // Camera off and back on reuses the video sender
    room.session("alice")?.toggle_camera().await?;
    room.settle().await?;
    room.session("alice")?.toggle_camera().await?;
    room.settle().await?;

    let alice_side = room.transport("alice", "bob")?;
    assert_eq!(offers_sent(&room, "alice", "bob")?, 2);
    assert_eq!(alice_side.sender_count(TrackKind::Video), 1);
    assert_eq!(alice_side.sender_count(TrackKind::Audio), 1);
    assert!(alice_side.sender_track(TrackKind::Audio).is_some());
    Ok(())
}

#[tokio::test]
async fn test_screen_share_swaps_video_in_place() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;
    room.session("alice")?.toggle_camera().await?;
    room.settle().await?;

    let offers = offers_sent(&room, "alice", "bob")?;
    let video_id = remote_video_id(&room, "bob", "alice")?;
    assert!(video_id.is_some());
    let alice_side = room.transport("alice", "bob")?;

    assert!(room.session("alice")?.toggle_screen_share().await?);
    room.settle().await?;

    let state = room.client("alice")?.session.local_state();
    assert!(state.screen_on());
    assert!(!state.cam_on());
    assert_eq!(
        alice_side.sender_track(TrackKind::Video).map(|t| t.source()),
        Some(TrackSource::Screen)
    );
    assert_eq!(
        room.client("bob")?.session.context().sharer(),
        Some(&ScreenSharer::Remote {
            peer_id: "alice".to_string(),
            username: "ALICE".to_string(),
        })
    );
    assert_eq!(
        room.client("alice")?.session.context().sharer(),
        Some(&ScreenSharer::Local)
    );
    assert_eq!(room.bus.sharer(&room.room_id).as_deref(), Some("alice"));

    room.observed("bob")?;

    // Stopping restores the camera that was on before
    assert!(!room.session("alice")?.toggle_screen_share().await?);
    room.settle().await?;

    let state = room.client("alice")?.session.local_state();
    assert!(state.cam_on());
    assert!(!state.screen_on());
    assert_eq!(
        alice_side.sender_track(TrackKind::Video).map(|t| t.source()),
        Some(TrackSource::Camera)
    );
    assert_eq!(
        room.client("alice")?.devices.open_count(DeviceKind::Camera),
        2
    );
    assert!(room.client("bob")?.session.context().sharer().is_none());

    let events = room.observed("bob")?;
    assert_eq!(badges_from(&events, "alice"), vec![(false, true)]);
    assert!(events
        .iter()
        .any(|event| matches!(event, ObserverEvent::SharerChanged(None))));

    // Neither swap renegotiated; bob's video element never changed
    assert_eq!(offers_sent(&room, "alice", "bob")?, offers);
    assert_eq!(remote_video_id(&room, "bob", "alice")?, video_id);
    Ok(())
}

#[tokio::test]
async fn test_share_without_camera_clears_video_on_stop() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;

    room.session("alice")?.toggle_screen_share().await?;
    room.settle().await?;
    assert!(room.client("bob")?.session.context().peer_media("alice").cam_on);

    room.session("alice")?.toggle_screen_share().await?;
    room.settle().await?;

    let alice_side = room.transport("alice", "bob")?;
    assert_eq!(alice_side.sender_count(TrackKind::Video), 1);
    assert!(alice_side.sender_track(TrackKind::Video).is_none());
    assert_eq!(
        room.client("alice")?.devices.open_count(DeviceKind::Camera),
        0
    );
    assert!(!room.client("bob")?.session.context().peer_media("alice").cam_on);
    Ok(())
}

#[tokio::test]
async fn test_camera_while_sharing_ends_share() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;

    room.session("alice")?.toggle_screen_share().await?;
    room.settle().await?;
    let screen = room
        .client("alice")?
        .devices
        .last_opened(DeviceKind::Display)
        .expect("screen was captured");

    assert!(room.session("alice")?.toggle_camera().await?);
    room.settle().await?;

    let state = room.client("alice")?.session.local_state();
    assert!(state.cam_on());
    assert!(!state.screen_on());
    assert!(!screen.is_live());
    assert!(room.client("alice")?.session.context().sharer().is_none());
    assert!(room.client("bob")?.session.context().sharer().is_none());
    assert_eq!(room.bus.sharer(&room.room_id), None);
    assert_eq!(
        room.transport("alice", "bob")?
            .sender_track(TrackKind::Video)
            .map(|t| t.source()),
        Some(TrackSource::Camera)
    );
    Ok(())
}

#[tokio::test]
async fn test_camera_failure_while_sharing_keeps_share() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;

    room.session("alice")?.toggle_screen_share().await?;
    room.settle().await?;
    let screen = room
        .client("alice")?
        .devices
        .last_opened(DeviceKind::Display)
        .expect("screen was captured");
    room.observed("bob")?;

    // The camera is unplugged while it is being opened
    room.client("alice")?.devices.end_on_open(DeviceKind::Camera);
    let result = room.session("alice")?.toggle_camera().await;
    assert!(matches!(result, Err(Error::MediaTrackError(_))));
    room.settle().await?;

    let state = room.client("alice")?.session.local_state();
    assert!(state.screen_on());
    assert!(!state.cam_on());
    assert!(screen.is_live());
    assert_eq!(
        room.transport("alice", "bob")?
            .sender_track(TrackKind::Video)
            .map(|t| t.source()),
        Some(TrackSource::Screen)
    );
    assert_eq!(
        room.client("alice")?.session.context().sharer(),
        Some(&ScreenSharer::Local)
    );
    assert!(room.client("bob")?.session.context().sharer().is_some());
    assert_eq!(room.bus.sharer(&room.room_id).as_deref(), Some("alice"));

    let events = room.observed("bob")?;
    assert!(!events
        .iter()
        .any(|event| matches!(event, ObserverEvent::SharerChanged(None))));
    assert!(badges_from(&events, "alice").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_screen_ended_by_source_stops_share() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;
    room.session("alice")?.toggle_camera().await?;
    room.session("alice")?.toggle_screen_share().await?;
    room.settle().await?;

    // The user clicks the browser's "stop sharing" button
    room.client("alice")?
        .devices
        .last_opened(DeviceKind::Display)
        .expect("screen was captured")
        .end_from_source();

    for _ in 0..10 {
        tokio::task::yield_now().await;
        room.settle().await?;
        if !room.client("alice")?.session.local_state().screen_on() {
            break;
        }
    }

    let state = room.client("alice")?.session.local_state();
    assert!(!state.screen_on());
    assert!(state.cam_on(), "camera that was on before the share is restored");
    assert!(room.client("bob")?.session.context().sharer().is_none());
    Ok(())
}

#[tokio::test]
async fn test_denied_camera_changes_nothing() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;
    room.client("alice")?
        .devices
        .deny(DeviceKind::Camera, "permission denied");
    room.observed("bob")?;

    let result = room.session("alice")?.toggle_camera().await;
    assert!(matches!(result, Err(Error::MediaUnavailable { .. })));
    room.settle().await?;

    assert!(!room.client("alice")?.session.local_state().cam_on());
    assert!(!room.transport("alice", "bob")?.has_sender(TrackKind::Video));
    assert!(badges_from(&room.observed("bob")?, "alice").is_empty());
    Ok(())
}
