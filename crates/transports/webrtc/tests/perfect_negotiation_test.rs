//! Integration tests for per-peer perfect negotiation over a full mesh
//!
//! Sessions talk through the in-process bus with loopback transports, so
//! offer collisions happen exactly when both sides toggle media before
//! either has seen the other's offer.

mod harness;

use collabboard_webrtc::peer::IceConnectionState;
use collabboard_webrtc::{
    IceCandidate, PeerConnectionState, PeerMediaState, PeerTransport, SdpType, SessionDescription,
    SignalMessage, SignalingState, TrackKind,
};
use harness::{HarnessResult, MeshRoom};

fn mids(candidates: &[IceCandidate]) -> Vec<&str> {
    candidates
        .iter()
        .filter_map(|c| c.sdp_mid.as_deref())
        .collect()
}

/// Both peers turn their camera on at once; the polite one ("aaa") backs off
#[tokio::test]
async fn test_glare_polite_side_rolls_back() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["aaa", "zzz"]);
    room.settle().await?;

    room.session("aaa")?.toggle_camera().await?;
    room.session("zzz")?.toggle_camera().await?;
    room.settle().await?;

    let polite = room.entry("aaa", "zzz")?;
    let impolite = room.entry("zzz", "aaa")?;
    assert!(polite.negotiator.is_polite());
    assert!(!impolite.negotiator.is_polite());

    let polite_stats = polite.negotiator.stats();
    assert_eq!(polite_stats.rollbacks, 1);
    assert_eq!(polite_stats.ignored_offers, 0);
    assert_eq!(polite_stats.answers_sent, 1);

    let impolite_stats = impolite.negotiator.stats();
    assert_eq!(impolite_stats.ignored_offers, 1);
    assert_eq!(impolite_stats.rollbacks, 0);
    assert_eq!(impolite_stats.answers_sent, 0);

    // aaa applied zzz's offer; zzz only ever applied aaa's answer
    let aaa_side = room.transport("aaa", "zzz")?;
    let zzz_side = room.transport("zzz", "aaa")?;
    let applied_by_aaa = aaa_side.applied_remote_descriptions();
    let applied_by_zzz = zzz_side.applied_remote_descriptions();
    assert_eq!(applied_by_aaa.len(), 1);
    assert_eq!(applied_by_aaa[0].sdp_type, SdpType::Offer);
    assert_eq!(Some(applied_by_aaa[0].clone()), zzz_side.local_description());
    assert_eq!(applied_by_zzz.len(), 1);
    assert_eq!(applied_by_zzz[0].sdp_type, SdpType::Answer);

    for transport in [&aaa_side, &zzz_side] {
        assert_eq!(transport.signaling_state(), SignalingState::Stable);
        assert_eq!(transport.connection_state(), PeerConnectionState::Connected);
        assert_eq!(transport.sender_count(TrackKind::Video), 1);
    }

    // Both see the other's camera
    assert!(room.entry("aaa", "zzz")?.remote_stream.video().is_some());
    assert!(room.entry("zzz", "aaa")?.remote_stream.video().is_some());
    Ok(())
}

/// Candidates that arrive while the impolite side ignores an offer are
/// queued and applied in arrival order once the answer lands
#[tokio::test]
async fn test_glare_candidates_drained_in_order() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["aaa", "zzz"]);
    room.settle().await?;

    for id in ["aaa", "zzz"] {
        let session = room.session(id)?;
        session.toggle_microphone().await?;
        session.toggle_camera().await?;
    }
    room.settle().await?;

    let stats = room.entry("zzz", "aaa")?.negotiator.stats();
    assert_eq!(stats.candidates_buffered, 2);
    assert_eq!(stats.candidates_applied, 2);
    assert_eq!(stats.candidates_failed, 0);
    assert_eq!(room.entry("zzz", "aaa")?.negotiator.pending_candidates(), 0);

    let zzz_side = room.transport("zzz", "aaa")?;
    assert_eq!(mids(&zzz_side.remote_candidates()), vec!["audio", "video"]);

    let aaa_side = room.transport("aaa", "zzz")?;
    assert_eq!(mids(&aaa_side.remote_candidates()), vec!["audio", "video"]);
    assert_eq!(room.entry("aaa", "zzz")?.negotiator.stats().candidates_buffered, 0);
    Ok(())
}

/// Cameras turned on one after another never collide
#[tokio::test]
async fn test_sequential_toggles_converge_without_collisions() -> HarnessResult<()> {
    let ids = ["alice", "bob", "carol"];
    let mut room = MeshRoom::new(&ids);
    room.settle().await?;

    for id in ids {
        room.session(id)?.toggle_camera().await?;
        room.settle().await?;
    }

    for local in ids {
        let summary = room.session(local)?.summary();
        assert_eq!(summary.peers.len(), 2, "{} should see both others", local);

        for peer in &summary.peers {
            assert_eq!(peer.signaling_state, SignalingState::Stable);
            assert_eq!(peer.connection_state, PeerConnectionState::Connected);
            assert_eq!(peer.stats.rollbacks, 0);
            assert_eq!(peer.stats.ignored_offers, 0);
            assert!(
                peer.remote.video().is_some(),
                "{} should receive video from {}",
                local,
                peer.peer_id
            );
            assert_eq!(peer.polite, local < peer.peer_id.as_str());
        }
    }
    Ok(())
}

/// A participant joining a room where media is already on receives it
/// without anyone toggling again
#[tokio::test]
async fn test_late_joiner_receives_existing_media() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice"]);
    room.settle().await?;
    {
        let alice = room.session("alice")?;
        alice.toggle_microphone().await?;
        alice.toggle_camera().await?;
    }
    room.settle().await?;

    room.join("bob");
    room.settle().await?;

    let alice_side = room.transport("alice", "bob")?;
    assert_eq!(alice_side.sender_count(TrackKind::Audio), 1);
    assert_eq!(alice_side.sender_count(TrackKind::Video), 1);
    assert_eq!(alice_side.signaling_state(), SignalingState::Stable);

    let bob_view = room.entry("bob", "alice")?;
    assert!(bob_view.remote_stream.audio().is_some());
    assert!(bob_view.remote_stream.video().is_some());
    assert_eq!(bob_view.username.as_deref(), Some("ALICE"));
    assert_eq!(bob_view.negotiator.stats().answers_sent, 1);

    // Badges arrive with the next broadcast, not retroactively
    assert_eq!(
        room.session("bob")?.context().peer_media("alice"),
        PeerMediaState::default()
    );
    Ok(())
}

/// A failed ICE transport renegotiates with fresh credentials and keeps
/// the connection
#[tokio::test]
async fn test_ice_failure_triggers_restart() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;
    room.session("alice")?.toggle_microphone().await?;
    room.settle().await?;

    let bob_side = room.transport("bob", "alice")?;
    let alice_side = room.transport("alice", "bob")?;
    let old_ufrag = bob_side.local_ufrag();
    let offers_before = room.entry("bob", "alice")?.negotiator.stats().offers_sent;

    bob_side.simulate_ice_state(IceConnectionState::Failed);
    room.settle().await?;

    let new_ufrag = bob_side.local_ufrag();
    assert_ne!(old_ufrag, new_ufrag);
    assert_eq!(
        room.entry("bob", "alice")?.negotiator.stats().offers_sent,
        offers_before + 1
    );
    assert_eq!(bob_side.signaling_state(), SignalingState::Stable);
    assert_eq!(alice_side.signaling_state(), SignalingState::Stable);

    // Alice only holds candidates from the new generation
    let candidates = alice_side.remote_candidates();
    assert!(!candidates.is_empty());
    assert!(candidates
        .iter()
        .all(|c| c.username_fragment.as_deref() == Some(new_ufrag.as_str())));

    assert!(room.client("bob")?.session.registry().contains("alice"));
    Ok(())
}

/// Answers from peers that never got an offer are dropped
#[tokio::test]
async fn test_unsolicited_answer_is_discarded() -> HarnessResult<()> {
    let mut room = MeshRoom::new(&["alice", "bob"]);
    room.settle().await?;

    let bogus = SessionDescription::answer("v=0\r\na=ice-ufrag:deadbeef\r\n");
    room.session("alice")?
        .handle_signal(SignalMessage::Answer {
            from: "bob".to_string(),
            description: bogus.clone(),
        })
        .await;
    room.session("alice")?
        .handle_signal(SignalMessage::Answer {
            from: "mallory".to_string(),
            description: bogus,
        })
        .await;
    room.settle().await?;

    let entry = room.entry("alice", "bob")?;
    assert_eq!(entry.negotiator.stats().discarded_answers, 1);
    assert_eq!(entry.transport.signaling_state(), SignalingState::Stable);
    assert!(!room.client("alice")?.session.registry().contains("mallory"));
    Ok(())
}
