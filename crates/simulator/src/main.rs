//! Host-side player: streams MP3 files from a local directory through the
//! full pipeline into the VS1053b bus simulator.
//!
//! Run with: `cargo run -p simulator -- --music ~/Music --all`
//!
//! Log filtering follows `RUST_LOG` (default `info`).

// Desktop tool: unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use platform::config::{APP_NAME, APP_VERSION, MUSIC_PATH_ENV};
use platform::storage_local::LocalFileStorage;
use playback::decoder::sim::{BusEvent, SimDriver, Vs1053Sim};
use playback::{
    Pipeline, PipelineEvent, PlayPolicy, PlaybackController, PlayerConfig,
    PlayerError, PlayerState, ReadyGate, Volume,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Player<'a> = PlaybackController<'a, NoopRawMutex, SimDriver>;

#[derive(Parser)]
#[command(name = "vs1053-sim")]
#[command(about = "Play a music directory through the simulated VS1053b", long_about = None)]
struct Cli {
    /// Music directory (defaults to $MUSIC_PATH)
    #[arg(short, long)]
    music: Option<String>,
    /// Catalog index to play
    #[arg(short, long, default_value_t = 0)]
    track: usize,
    /// Play the whole catalog from `--track` onwards
    #[arg(long)]
    all: bool,
    /// Volume ratio in [0.0, 1.0]
    #[arg(short, long, default_value_t = playback::config::DEFAULT_VOLUME)]
    volume: f32,
    /// What `play` does while a track is running
    #[arg(long, value_enum, default_value_t = Policy::Queue)]
    policy: Policy,
    /// Abort if DREQ stays low for this many polls
    #[arg(long, default_value_t = playback::config::DEFAULT_MAX_READY_POLLS)]
    max_polls: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Reject,
    Queue,
    Preempt,
}

impl From<Policy> for PlayPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Reject => PlayPolicy::Reject,
            Policy::Queue => PlayPolicy::Queue,
            Policy::Preempt => PlayPolicy::Preempt,
        }
    }
}

fn report(error: PlayerError) -> anyhow::Error {
    anyhow!("{error}")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("{APP_NAME} {APP_VERSION} (simulated VS1053b)");
    let root = cli
        .music
        .clone()
        .or_else(|| std::env::var(MUSIC_PATH_ENV).ok())
        .with_context(|| format!("pass --music or set {MUSIC_PATH_ENV}"))?;

    // The controller scans, the fetch stage streams; each gets its own handle.
    let mut scan_storage = LocalFileStorage::new(&root);
    let mut fetch_storage = LocalFileStorage::new(&root);

    let sim = Vs1053Sim::new();
    let decoder: Mutex<NoopRawMutex, SimDriver> =
        Mutex::new(sim.driver(ReadyGate::bounded(cli.max_polls)));
    let pipeline: Pipeline<NoopRawMutex> = Pipeline::new();

    let config = PlayerConfig {
        play_policy: cli.policy.into(),
        default_volume: Volume::new(cli.volume),
        ..PlayerConfig::default()
    };
    let mut player = PlaybackController::new(&pipeline, &decoder, config);
    player.initialize().await.map_err(report)?;
    let clocks = decoder.lock().await.clocks();
    info!(
        "decoder ready: SCI read {} Hz, SCI write {} Hz, SDI {} Hz",
        clocks.register_read_hz, clocks.register_write_hz, clocks.stream_write_hz
    );

    match player.refresh(&mut scan_storage).await {
        Ok(count) => info!("{count} tracks in {root}"),
        Err(PlayerError::CatalogOverflow { capacity }) => {
            warn!("more than {capacity} tracks in {root}, playing the first {capacity}");
        }
        Err(error) => return Err(report(error)),
    }
    for (index, track) in player.catalog().iter().enumerate() {
        info!("{index:>3}  {}  ({} bytes)", track.path(), track.size_bytes());
    }

    let stages = join(
        pipeline.run_fetch(&mut fetch_storage),
        pipeline.run_decode(&decoder),
    );
    let session = play_session(&mut player, &mut scan_storage, &cli);
    let outcome = match select(stages, session).await {
        Either::First((never, _)) => match never {},
        Either::Second(outcome) => outcome,
    };

    let events = sim.events();
    let bursts = events
        .iter()
        .filter(|e| matches!(e, BusEvent::SdiWrite { .. }))
        .count();
    let violations: Vec<&BusEvent> = events
        .iter()
        .filter(|e| matches!(e, BusEvent::ProtocolViolation(_)))
        .collect();
    info!(
        "bus: {} SDI bytes in {bursts} bursts, {} events",
        sim.sdi_bytes().len(),
        events.len()
    );
    if let Some(BusEvent::ProtocolViolation(first)) = violations.first() {
        warn!("bus: {} protocol violations, first: {first}", violations.len());
    }
    outcome
}

async fn play_session(
    player: &mut Player<'_>,
    storage: &mut LocalFileStorage,
    cli: &Cli,
) -> Result<()> {
    let count = player.catalog().len();
    if cli.track >= count {
        return Err(report(PlayerError::IndexOutOfRange {
            index: cli.track,
            len: count,
        }));
    }
    let last = if cli.all { count } else { cli.track.saturating_add(1) };

    for index in cli.track..last {
        match player.metadata(storage, index).await {
            Ok(meta) => info!(
                "next: {} / {} (audio at byte {})",
                meta.title().unwrap_or("untitled"),
                meta.artist().unwrap_or("unknown artist"),
                meta.audio_offset()
            ),
            Err(error) => warn!("no tags for track {index}: {error}"),
        }

        player.play(index).await.map_err(report)?;
        while matches!(player.state(), PlayerState::Playing | PlayerState::Paused) {
            match player.wait_event().await {
                PipelineEvent::TrackStarted { ticket } => info!("ticket {ticket} started"),
                PipelineEvent::TrackFinished { ticket } => info!("ticket {ticket} finished"),
                PipelineEvent::TrackFailed { ticket, error } => {
                    warn!("ticket {ticket} failed: {error}");
                }
                PipelineEvent::TrackCancelled { ticket } => info!("ticket {ticket} cancelled"),
                PipelineEvent::DecoderFault { ticket, error } => {
                    warn!("decoder fault on ticket {ticket}: {error}, recovering");
                    player.recover().await.map_err(report)?;
                }
            }
        }
    }
    Ok(())
}
