//! Mesh demo binary
//!
//! Puts N participants in one room over the in-process signaling bus with
//! loopback transports, turns media on, and prints the converged mesh.
//!
//! # Usage
//!
//! ```bash
//! # Three peers, mic + camera, sequential toggles
//! cargo run --bin mesh_demo -- --peers alice,bob,carol
//!
//! # Force offer glare: everyone turns the camera on at once
//! cargo run --bin mesh_demo -- --peers aaa,zzz --glare
//!
//! # Share the first peer's screen, then stop (camera is restored)
//! cargo run --bin mesh_demo -- --share --json
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use collabboard_webrtc::{
    LoopbackFactory, MemoryBus, MeshConfig, NoopObserver, OrphanCandidatePolicy, RoomContext,
    SessionCoordinator, SessionHandle, SessionSummary, SignalingState, SyntheticDevices,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CollabBoard mesh demo
///
/// Runs a full-mesh room in one process and reports how every connection
/// negotiated.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Participant ids (comma-separated); the smaller id of each pair is polite
    #[arg(long, value_delimiter = ',', default_value = "alice,bob,carol", env = "MESH_PEERS")]
    peers: Vec<String>,

    /// Room id
    #[arg(long, default_value = "demo-room", env = "MESH_ROOM")]
    room: String,

    /// Toggle every camera concurrently to provoke offer collisions
    #[arg(long, default_value_t = false)]
    glare: bool,

    /// Start and stop a screen share from the first participant
    #[arg(long, default_value_t = false)]
    share: bool,

    /// Maximum remote peers per participant
    #[arg(long, default_value_t = 16, env = "MESH_MAX_PEERS")]
    max_peers: u32,

    /// What to do with candidates from peers without a connection
    #[arg(long, default_value = "park", env = "MESH_ORPHAN_CANDIDATES")]
    orphan_candidates: OrphanArg,

    /// Seconds to wait for the mesh to settle
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// Print summaries as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

/// Orphan candidate policy CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OrphanArg {
    Drop,
    Park,
}

impl From<OrphanArg> for OrphanCandidatePolicy {
    fn from(arg: OrphanArg) -> Self {
        match arg {
            OrphanArg::Drop => OrphanCandidatePolicy::Drop,
            OrphanArg::Park => OrphanCandidatePolicy::Park,
        }
    }
}

/// Build MeshConfig from CLI arguments
fn build_config_from_args(args: &Args) -> anyhow::Result<MeshConfig> {
    let config = MeshConfig {
        max_peers: args.max_peers,
        orphan_candidates: args.orphan_candidates.into(),
        ..MeshConfig::local_only()
    };
    config.validate()?;
    Ok(config)
}

struct Participant {
    peer_id: String,
    handle: SessionHandle,
    task: tokio::task::JoinHandle<()>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("mesh-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    init_tracing();

    let mut peers = args.peers.clone();
    peers.sort();
    peers.dedup();
    if peers.len() < 2 {
        bail!("need at least two distinct peers, got {:?}", args.peers);
    }

    let config = build_config_from_args(&args)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        room = %args.room,
        peers = ?peers,
        glare = args.glare,
        max_peers = config.max_peers,
        orphan_candidates = ?config.orphan_candidates,
        "Mesh demo starting"
    );

    let bus = MemoryBus::new();
    let mut participants = Vec::with_capacity(peers.len());
    for peer_id in &peers {
        let (signaling, signals) = bus.join(&args.room, peer_id, &display_name(peer_id));
        let session = SessionCoordinator::new(
            config.clone(),
            RoomContext::new(&args.room, peer_id, display_name(peer_id)),
            Arc::new(signaling),
            Arc::new(SyntheticDevices::new()),
            Arc::new(LoopbackFactory::new(peer_id)),
            Arc::new(NoopObserver),
        )?;
        let (handle, task) = session.spawn(signals);
        participants.push(Participant {
            peer_id: peer_id.clone(),
            handle,
            task,
        });
    }

    let settle = Duration::from_secs(args.timeout_secs);
    wait_for_mesh(&participants, settle).await?;

    for participant in &participants {
        participant
            .handle
            .toggle_microphone()
            .await
            .with_context(|| format!("{} could not enable the microphone", participant.peer_id))?;
    }

    if args.glare {
        info!("Enabling every camera at once");
        let toggles = participants.iter().map(|p| p.handle.toggle_camera());
        for result in futures::future::join_all(toggles).await {
            result?;
        }
    } else {
        for participant in &participants {
            participant.handle.toggle_camera().await?;
            wait_for_mesh(&participants, settle).await?;
        }
    }
    wait_for_mesh(&participants, settle).await?;

    if args.share {
        let sharer = &participants[0];
        info!("{} shares their screen", sharer.peer_id);
        sharer.handle.toggle_screen_share().await?;
        wait_for_mesh(&participants, settle).await?;
        report(&participants, args.json).await?;

        info!("{} stops sharing", sharer.peer_id);
        sharer.handle.toggle_screen_share().await?;
        wait_for_mesh(&participants, settle).await?;
    }

    report(&participants, args.json).await?;

    for participant in participants {
        if let Err(e) = participant.handle.leave_room().await {
            warn!("{} failed to leave: {}", participant.peer_id, e);
        }
        participant.task.await?;
    }

    info!("Mesh demo finished");
    Ok(())
}

fn display_name(peer_id: &str) -> String {
    let mut chars = peer_id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Wait until every participant holds a stable connection to every other
async fn wait_for_mesh(participants: &[Participant], limit: Duration) -> anyhow::Result<()> {
    let expected = participants.len() - 1;
    let converged = async {
        loop {
            let mut done = true;
            for participant in participants {
                let summary = participant.handle.summary().await?;
                let stable = summary
                    .peers
                    .iter()
                    .filter(|p| p.signaling_state == SignalingState::Stable)
                    .count();
                if summary.peers.len() != expected || stable != expected {
                    done = false;
                    break;
                }
            }
            if done {
                return anyhow::Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    tokio::time::timeout(limit, converged)
        .await
        .context("mesh did not settle in time")?
}

async fn report(participants: &[Participant], json: bool) -> anyhow::Result<()> {
    for participant in participants {
        let summary = participant.handle.summary().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
    }
    Ok(())
}

fn print_summary(summary: &SessionSummary) {
    println!(
        "{} mic={} cam={} screen={} sharer={:?}",
        summary.peer_id,
        summary.local.mic_on,
        summary.local.cam_on,
        summary.local.screen_on,
        summary.sharer
    );
    for peer in &summary.peers {
        println!(
            "  -> {:<10} {:<17} {:<12} polite={:<5} offers={} answers={} rollbacks={} ignored={} tracks={}",
            peer.peer_id,
            peer.signaling_state.to_string(),
            format!("{:?}", peer.connection_state),
            peer.polite,
            peer.stats.offers_sent,
            peer.stats.answers_sent,
            peer.stats.rollbacks,
            peer.stats.ignored_offers,
            peer.remote.tracks().count()
        );
    }
}

fn init_tracing() {
    // RUST_LOG wins; otherwise info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
