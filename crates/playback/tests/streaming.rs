//! End-to-end streaming through the real driver and the bus simulator.
//!
//! Storage → fetch stage → ChunkBuffer → decode stage → Vs1053b → simulated
//! SCI/SDI bus, with the controller on top.

#![allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::arithmetic_side_effects
)]

use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use platform::mocks::MemoryStorage;
use playback::decoder::sim::{BusEvent, SimDriver, Vs1053Sim};
use playback::decoder::SciRegister;
use playback::{
    Mp3Decoder, Pipeline, PipelineEvent, PlaybackController, PlayerConfig, PlayerState,
    ReadyGate,
};

type TestPipeline = Pipeline<NoopRawMutex, 1024, 3>;

fn sdi_lengths(events: &[BusEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match *e {
            BusEvent::SdiWrite { len, .. } => Some(len),
            _ => None,
        })
        .collect()
}

fn mode_reads(events: &[BusEvent]) -> Vec<u16> {
    events
        .iter()
        .filter_map(|e| match *e {
            BusEvent::SciRead {
                register: SciRegister::Mode,
                value,
                ..
            } => Some(value),
            _ => None,
        })
        .collect()
}

fn no_violations(events: &[BusEvent]) -> bool {
    !events
        .iter()
        .any(|e| matches!(e, BusEvent::ProtocolViolation(_)))
}

#[tokio::test]
async fn plays_a_track_to_the_end() {
    let sim = Vs1053Sim::new();
    let decoder: Mutex<NoopRawMutex, SimDriver> = Mutex::new(sim.driver(ReadyGate::hardened()));
    let pipeline = TestPipeline::new();
    let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 2048);
    let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());

    player.initialize().await.unwrap();
    player.refresh(&mut storage).await.unwrap();
    sim.clear_events();
    player.play(0).await.unwrap();
    assert_eq!(player.state(), PlayerState::Playing);

    pipeline.fetch_next(&mut storage).await.unwrap();
    assert_eq!(storage.log().seeks, vec![0, 1024]);
    assert_eq!(pipeline.buffered_chunks(), 2);

    pipeline.decode_next(&decoder).await;
    pipeline.decode_next(&decoder).await;
    assert_eq!(
        player.wait_event().await,
        PipelineEvent::TrackStarted { ticket: 0 }
    );
    assert_eq!(
        player.wait_event().await,
        PipelineEvent::TrackFinished { ticket: 0 }
    );
    assert_eq!(player.state(), PlayerState::Idle);

    let events = sim.events();
    assert_eq!(sdi_lengths(&events), vec![32; 64]);
    let expected: Vec<u8> = (0..2048usize).map(|i| i as u8).collect();
    assert_eq!(sim.sdi_bytes(), expected);
    assert!(no_violations(&events));
}

#[tokio::test]
async fn stages_stream_a_long_track_concurrently() {
    let sim = Vs1053Sim::new();
    let decoder: Mutex<NoopRawMutex, SimDriver> = Mutex::new(sim.driver(ReadyGate::hardened()));
    let pipeline = TestPipeline::new();
    // Scan and fetch use separate handles, as on the device.
    let mut scan = MemoryStorage::new().with_counting_file("long.mp3", 10 * 1024 + 100);
    let mut fetch = MemoryStorage::new().with_counting_file("long.mp3", 10 * 1024 + 100);
    let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
    player.initialize().await.unwrap();
    player.refresh(&mut scan).await.unwrap();
    player.play(0).await.unwrap();

    let stages = join(pipeline.run_fetch(&mut fetch), pipeline.run_decode(&decoder));
    let watch = async {
        let mut events = Vec::new();
        while player.state() == PlayerState::Playing {
            events.push(player.wait_event().await);
        }
        events
    };
    let events = match select(stages, watch).await {
        Either::First((never, _)) => match never {},
        Either::Second(events) => events,
    };

    assert_eq!(
        events,
        vec![
            PipelineEvent::TrackStarted { ticket: 0 },
            PipelineEvent::TrackFinished { ticket: 0 }
        ]
    );
    assert_eq!(fetch.log().reads.len(), 11);
    assert_eq!(sim.sdi_bytes().len(), 10 * 1024 + 100);
    assert!(no_violations(&sim.events()));
}

#[tokio::test]
async fn enable_clears_decode_time_twice() {
    let sim = Vs1053Sim::new();
    let decoder: Mutex<NoopRawMutex, SimDriver> = Mutex::new(sim.driver(ReadyGate::UNBOUNDED));
    let pipeline = TestPipeline::new();
    let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 64);
    let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
    player.initialize().await.unwrap();
    player.refresh(&mut storage).await.unwrap();
    sim.set_register(SciRegister::DecodeTime, 99);

    player.play(0).await.unwrap();
    pipeline.fetch_next(&mut storage).await.unwrap();
    pipeline.decode_next(&decoder).await;

    let clears = sim
        .events()
        .iter()
        .filter(|e| {
            matches!(
                e,
                BusEvent::SciWrite {
                    register: SciRegister::DecodeTime,
                    value: 0,
                    ..
                }
            )
        })
        .count();
    assert_eq!(clears, 2);
    assert_eq!(player.position_secs().await, Ok(0));
}

#[tokio::test]
async fn pause_waits_for_the_cancel_handshake() {
    let sim = Vs1053Sim::new();
    let decoder: Mutex<NoopRawMutex, SimDriver> = Mutex::new(sim.driver(ReadyGate::UNBOUNDED));
    let pipeline = TestPipeline::new();
    let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 3072);
    let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
    player.initialize().await.unwrap();
    player.refresh(&mut storage).await.unwrap();
    player.play(0).await.unwrap();
    pipeline.fetch_next(&mut storage).await.unwrap();
    pipeline.decode_next(&decoder).await;
    assert_eq!(pipeline.buffered_chunks(), 2);

    sim.clear_events();
    sim.set_cancel_latency(2);
    sim.script_dreq(&[false, false, true]);
    player.pause().await.unwrap();

    assert_eq!(player.state(), PlayerState::Paused);
    assert_eq!(mode_reads(&sim.events()), vec![0x4808, 0x4808, 0x4800]);
    assert_eq!(pipeline.buffered_chunks(), 2);
    assert!(sdi_lengths(&sim.events()).is_empty());

    player.resume().await.unwrap();
    assert_eq!(pipeline.buffered_chunks(), 2);
    pipeline.decode_next(&decoder).await;
    pipeline.decode_next(&decoder).await;
    player.service_events();
    assert_eq!(player.state(), PlayerState::Idle);
    // Chunks at 1024 and 2048 arrive once each, in file order.
    let expected: Vec<u8> = (1024..3072usize).map(|i| i as u8).collect();
    assert_eq!(sim.sdi_bytes(), expected);
    assert!(no_violations(&sim.events()));
}

#[tokio::test]
async fn sdi_transfers_never_exceed_one_burst() {
    let sim = Vs1053Sim::new();
    let mut driver = sim.driver(ReadyGate::UNBOUNDED);
    driver.send_data(&[0x55; 1000]).await.unwrap();

    let lengths = sdi_lengths(&sim.events());
    assert!(lengths.iter().all(|len| *len <= 32));
    assert_eq!(lengths.iter().sum::<usize>(), 1000);
}

#[tokio::test]
async fn silent_decoder_becomes_a_fault_and_recovers() {
    let sim = Vs1053Sim::new();
    let decoder: Mutex<NoopRawMutex, SimDriver> = Mutex::new(sim.driver(ReadyGate::bounded(8)));
    let pipeline = TestPipeline::new();
    let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 64);
    let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
    player.initialize().await.unwrap();
    player.refresh(&mut storage).await.unwrap();
    player.play(0).await.unwrap();
    pipeline.fetch_next(&mut storage).await.unwrap();

    sim.hold_dreq_low();
    pipeline.decode_next(&decoder).await;
    assert!(matches!(
        player.wait_event().await,
        PipelineEvent::DecoderFault { ticket: 0, .. }
    ));
    assert_eq!(player.state(), PlayerState::Idle);
    assert!(pipeline.fault().is_some());

    sim.release_dreq();
    player.recover().await.unwrap();
    assert_eq!(pipeline.fault(), None);
    player.play(0).await.unwrap();
    assert_eq!(player.state(), PlayerState::Playing);
}
