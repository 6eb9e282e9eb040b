//! Playback controller: the application-facing state machine.
//!
//! ```text
//! Idle ──refresh──▶ Loaded ──play──▶ Playing ◀──resume── Paused
//!   ▲                                   │ └──────pause──────▶│
//!   └──── finished / failed / cancelled / decoder fault ─────┘
//! ```
//!
//! The controller owns the catalog and issues work to the pipeline. Register
//! operations (pause, resume, volume) go through the same decoder lock the
//! decode stage takes per SDI burst, so they never interleave with a burst.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use platform::Storage;

use crate::catalog::SongCatalog;
use crate::config::{PlayPolicy, PlayerConfig, DEFAULT_CHUNK_DEPTH, DEFAULT_CHUNK_SIZE};
use crate::decoder::Mp3Decoder;
use crate::error::{DecoderError, PlayerError};
use crate::metadata::TrackMetadata;
use crate::pipeline::{Pipeline, PipelineEvent};
use crate::volume::Volume;

/// Player state as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerState {
    /// Nothing loaded, or the last track ended
    Idle,
    /// Catalog populated, nothing playing
    Loaded,
    /// Streaming to the decoder
    Playing,
    /// Streaming suspended, buffered chunks kept
    Paused,
}

/// Application-facing playback controller.
pub struct PlaybackController<
    'a,
    M: RawMutex,
    D: Mp3Decoder,
    const CHUNK: usize = DEFAULT_CHUNK_SIZE,
    const DEPTH: usize = DEFAULT_CHUNK_DEPTH,
> {
    pipeline: &'a Pipeline<M, CHUNK, DEPTH>,
    decoder: &'a Mutex<M, D>,
    catalog: SongCatalog,
    config: PlayerConfig,
    state: PlayerState,
    next_ticket: u32,
    active_ticket: Option<u32>,
    current: Option<usize>,
}

impl<'a, M, D, const CHUNK: usize, const DEPTH: usize> PlaybackController<'a, M, D, CHUNK, DEPTH>
where
    M: RawMutex,
    D: Mp3Decoder,
{
    /// Controller in `Idle` with an empty catalog.
    pub fn new(
        pipeline: &'a Pipeline<M, CHUNK, DEPTH>,
        decoder: &'a Mutex<M, D>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            pipeline,
            decoder,
            catalog: SongCatalog::new(),
            config,
            state: PlayerState::Idle,
            next_ticket: 0,
            active_ticket: None,
            current: None,
        }
    }

    /// Bring up the decoder with the configured default volume.
    pub async fn initialize(&mut self) -> Result<(), PlayerError> {
        self.decoder
            .lock()
            .await
            .initialize(self.config.default_volume)
            .await?;
        Ok(())
    }

    /// Rescan storage. Valid from `Idle` and `Loaded`.
    ///
    /// On overflow the catalog holds the first tracks found, the player is
    /// `Loaded`, and [`PlayerError::CatalogOverflow`] is returned.
    pub async fn refresh<S: Storage>(&mut self, storage: &mut S) -> Result<usize, PlayerError> {
        self.service_events();
        if !matches!(self.state, PlayerState::Idle | PlayerState::Loaded) {
            return Err(PlayerError::InvalidState);
        }

        let result = self.catalog.refresh(storage, self.config.pattern).await;
        if matches!(result, Ok(_) | Err(PlayerError::CatalogOverflow { .. })) {
            self.current = None;
            self.state = if self.catalog.is_empty() {
                PlayerState::Idle
            } else {
                PlayerState::Loaded
            };
        }
        result
    }

    /// Play catalog entry `index`.
    ///
    /// While a track is playing or paused the configured [`PlayPolicy`]
    /// decides: `Reject` fails with [`PlayerError::Busy`], `Queue` waits for
    /// room in the song queue and plays after the current track, `Preempt`
    /// cancels the current track and starts this one.
    pub async fn play(&mut self, index: usize) -> Result<(), PlayerError> {
        self.service_events();
        if let Some(error) = self.pipeline.fault() {
            return Err(PlayerError::DecoderFault(error));
        }
        let track = self
            .catalog
            .get(index)
            .cloned()
            .ok_or(PlayerError::IndexOutOfRange {
                index,
                len: self.catalog.len(),
            })?;

        if self.is_busy() {
            match self.config.play_policy {
                PlayPolicy::Reject => return Err(PlayerError::Busy),
                PlayPolicy::Queue => {
                    let ticket = self.issue_ticket();
                    info!("player: queueing {} as ticket {}", track.path(), ticket);
                    self.pipeline.enqueue(ticket, track).await;
                    self.active_ticket = Some(ticket);
                    self.current = Some(index);
                    return Ok(());
                }
                PlayPolicy::Preempt => {
                    debug!("player: preempting ticket {}", self.active_ticket.unwrap_or(0));
                    self.pipeline.cancel_all();
                    self.active_ticket = None;
                    self.state = PlayerState::Loaded;
                    let cancelled = self.decoder.lock().await.pause_playback().await;
                    if let Err(error) = cancelled {
                        return Err(self.decoder_failed(error));
                    }
                    self.pipeline.resume();
                }
            }
        }

        let ticket = self.issue_ticket();
        info!("player: playing {} as ticket {}", track.path(), ticket);
        self.pipeline.enqueue(ticket, track).await;
        self.active_ticket = Some(ticket);
        self.current = Some(index);
        self.state = PlayerState::Playing;
        Ok(())
    }

    /// Play the entry after the current one, wrapping to the first.
    pub async fn next(&mut self) -> Result<(), PlayerError> {
        let len = self.catalog.len();
        if len == 0 {
            return Err(PlayerError::EmptyCatalog);
        }
        let index = self
            .current
            .map_or(0, |i| i.saturating_add(1).checked_rem(len).unwrap_or(0));
        self.play(index).await
    }

    /// Play the entry before the current one, wrapping to the last.
    pub async fn previous(&mut self) -> Result<(), PlayerError> {
        let len = self.catalog.len();
        if len == 0 {
            return Err(PlayerError::EmptyCatalog);
        }
        let last = len.saturating_sub(1);
        let index = self
            .current
            .map_or(last, |i| i.checked_sub(1).unwrap_or(last));
        self.play(index).await
    }

    /// Suspend streaming. Valid only while `Playing`.
    pub async fn pause(&mut self) -> Result<(), PlayerError> {
        self.service_events();
        if self.state != PlayerState::Playing {
            return Err(PlayerError::InvalidState);
        }
        self.pipeline.pause();
        let cancelled = self.decoder.lock().await.pause_playback().await;
        if let Err(error) = cancelled {
            return Err(self.decoder_failed(error));
        }
        self.state = PlayerState::Paused;
        info!("player: paused");
        Ok(())
    }

    /// Continue streaming. Valid only while `Paused`.
    pub async fn resume(&mut self) -> Result<(), PlayerError> {
        self.service_events();
        if self.state != PlayerState::Paused {
            return Err(PlayerError::InvalidState);
        }
        let resumed = self.decoder.lock().await.resume_playback().await;
        if let Err(error) = resumed {
            return Err(self.decoder_failed(error));
        }
        self.pipeline.resume();
        self.state = PlayerState::Playing;
        info!("player: resumed");
        Ok(())
    }

    /// Apply `volume` immediately. Valid in every state.
    pub async fn set_volume(&mut self, volume: Volume) -> Result<(), PlayerError> {
        self.decoder.lock().await.set_volume(volume).await?;
        Ok(())
    }

    /// Seconds decoded since the current track started.
    pub async fn position_secs(&mut self) -> Result<u16, PlayerError> {
        Ok(self.decoder.lock().await.decode_time_secs().await?)
    }

    /// ID3 tags of catalog entry `index`.
    pub async fn metadata<S: Storage>(
        &self,
        storage: &mut S,
        index: usize,
    ) -> Result<TrackMetadata, PlayerError> {
        self.catalog.read_metadata(storage, index).await
    }

    /// Reset the decoder and pipeline after a fault and return to `Idle`.
    pub async fn recover(&mut self) -> Result<(), PlayerError> {
        warn!("player: recovering decoder");
        self.pipeline.cancel_all();
        self.decoder
            .lock()
            .await
            .initialize(self.config.default_volume)
            .await?;
        self.pipeline.restart();
        while self.pipeline.try_next_event().is_some() {}
        self.active_ticket = None;
        self.state = PlayerState::Idle;
        Ok(())
    }

    /// Apply pending pipeline events to the state machine.
    pub fn service_events(&mut self) {
        while let Some(event) = self.pipeline.try_next_event() {
            self.apply(event);
        }
    }

    /// Wait for one pipeline event, apply it, and return it.
    pub async fn wait_event(&mut self) -> PipelineEvent {
        let event = self.pipeline.next_event().await;
        self.apply(event);
        event
    }

    fn apply(&mut self, event: PipelineEvent) {
        let ended = match event {
            PipelineEvent::TrackStarted { ticket } => {
                debug!("player: ticket {} started", ticket);
                None
            }
            PipelineEvent::TrackFinished { ticket }
            | PipelineEvent::TrackFailed { ticket, .. }
            | PipelineEvent::TrackCancelled { ticket } => Some(ticket),
            PipelineEvent::DecoderFault { ticket, error } => {
                error!("player: decoder fault on ticket {}: {}", ticket, error);
                self.active_ticket = None;
                self.state = PlayerState::Idle;
                None
            }
        };
        if ended.is_some() && ended == self.active_ticket {
            self.active_ticket = None;
            if self.is_busy() {
                self.state = PlayerState::Idle;
            }
        }
    }

    /// A register handshake failed mid-playback: the bus state is unknown,
    /// so halt the pipeline and drop to `Idle` until [`recover`](Self::recover).
    fn decoder_failed(&mut self, error: DecoderError) -> PlayerError {
        warn!("player: decoder fault: {}", error);
        self.pipeline.halt(error);
        self.active_ticket = None;
        self.state = PlayerState::Idle;
        PlayerError::DecoderFault(error)
    }

    fn issue_ticket(&mut self) -> u32 {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        ticket
    }

    fn is_busy(&self) -> bool {
        matches!(self.state, PlayerState::Playing | PlayerState::Paused)
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// `true` while `Playing`.
    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    /// Catalog index of the most recently requested track.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// The catalog from the last refresh.
    pub fn catalog(&self) -> &SongCatalog {
        &self.catalog
    }

    /// Active configuration.
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::decoder::mock::{DecoderCall, MockDecoder};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use platform::mocks::MemoryStorage;

    type TestPipeline = Pipeline<NoopRawMutex, 64, 3>;
    type TestDecoder = Mutex<NoopRawMutex, MockDecoder>;

    fn storage() -> MemoryStorage {
        MemoryStorage::new()
            .with_counting_file("one.mp3", 128)
            .with_counting_file("two.mp3", 64)
            .with_counting_file("three.mp3", 96)
    }

    #[tokio::test]
    async fn test_refresh_moves_to_loaded() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());

        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(player.refresh(&mut storage()).await, Ok(3));
        assert_eq!(player.state(), PlayerState::Loaded);
    }

    #[tokio::test]
    async fn test_refresh_of_empty_volume_stays_idle() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        assert_eq!(player.refresh(&mut MemoryStorage::new()).await, Ok(0));
        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(player.next().await, Err(PlayerError::EmptyCatalog));
    }

    #[tokio::test]
    async fn test_play_validates_index() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        player.refresh(&mut storage()).await.unwrap();

        assert_eq!(
            player.play(3).await,
            Err(PlayerError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(player.state(), PlayerState::Loaded);
        player.play(2).await.unwrap();
        assert!(player.is_playing());
        assert_eq!(pipeline.queued_songs(), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_state_checked() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        player.refresh(&mut storage()).await.unwrap();

        assert_eq!(player.pause().await, Err(PlayerError::InvalidState));
        assert_eq!(player.resume().await, Err(PlayerError::InvalidState));

        player.play(0).await.unwrap();
        player.pause().await.unwrap();
        assert_eq!(player.state(), PlayerState::Paused);
        assert!(pipeline.is_paused());
        assert_eq!(player.pause().await, Err(PlayerError::InvalidState));
        assert_eq!(player.refresh(&mut storage()).await, Err(PlayerError::InvalidState));

        player.resume().await.unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        assert!(!pipeline.is_paused());
        assert_eq!(
            decoder.lock().await.calls(),
            &[DecoderCall::Pause, DecoderCall::Resume]
        );
    }

    #[tokio::test]
    async fn test_finished_event_returns_to_idle() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        let mut storage = storage();
        player.refresh(&mut storage).await.unwrap();
        player.play(1).await.unwrap();

        pipeline.fetch_next(&mut storage).await.unwrap();
        pipeline.decode_next(&decoder).await;
        player.service_events();
        assert_eq!(player.state(), PlayerState::Idle);
        assert_eq!(player.current_index(), Some(1));
    }

    #[tokio::test]
    async fn test_next_and_previous_wrap() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let config = PlayerConfig::default().with_policy(PlayPolicy::Preempt);
        let mut player = PlaybackController::new(&pipeline, &decoder, config);
        player.refresh(&mut storage()).await.unwrap();

        player.previous().await.unwrap();
        assert_eq!(player.current_index(), Some(2));
        player.next().await.unwrap();
        assert_eq!(player.current_index(), Some(0));
        player.next().await.unwrap();
        assert_eq!(player.current_index(), Some(1));
        player.previous().await.unwrap();
        assert_eq!(player.current_index(), Some(0));
    }

    #[tokio::test]
    async fn test_decoder_fault_requires_recover() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        let mut storage = storage();
        player.refresh(&mut storage).await.unwrap();
        player.play(0).await.unwrap();
        pipeline.fetch_next(&mut storage).await.unwrap();

        let fault = DecoderError::NotReady { polls: 3 };
        decoder.lock().await.fail_next(fault);
        pipeline.decode_next(&decoder).await;

        assert_eq!(player.play(1).await, Err(PlayerError::DecoderFault(fault)));
        assert_eq!(player.state(), PlayerState::Idle);

        player.recover().await.unwrap();
        assert_eq!(pipeline.fault(), None);
        assert_eq!(pipeline.buffered_chunks(), 0);
        assert_eq!(
            decoder.lock().await.calls().last(),
            Some(&DecoderCall::Initialize(51))
        );
        player.play(1).await.unwrap();
        assert!(player.is_playing());
    }

    #[tokio::test]
    async fn test_volume_and_position_reach_decoder() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        player.initialize().await.unwrap();
        player.set_volume(Volume::MAX).await.unwrap();
        decoder.lock().await.set_decode_time(42);

        assert_eq!(player.position_secs().await, Ok(42));
        assert_eq!(
            decoder.lock().await.calls(),
            &[DecoderCall::Initialize(51), DecoderCall::SetVolume(0)]
        );
    }

    #[tokio::test]
    async fn test_failed_pause_halts_pipeline_until_recover() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        let mut storage = storage();
        player.refresh(&mut storage).await.unwrap();
        player.play(0).await.unwrap();
        pipeline.fetch_next(&mut storage).await.unwrap();

        let fault = DecoderError::NotReady { polls: 3 };
        decoder.lock().await.fail_next(fault);
        assert_eq!(player.pause().await, Err(PlayerError::DecoderFault(fault)));

        assert_eq!(player.state(), PlayerState::Idle);
        assert!(!pipeline.is_paused());
        assert_eq!(pipeline.fault(), Some(fault));
        assert_eq!(pipeline.buffered_chunks(), 0);
        assert_eq!(player.resume().await, Err(PlayerError::InvalidState));
        assert_eq!(player.play(1).await, Err(PlayerError::DecoderFault(fault)));

        player.recover().await.unwrap();
        player.play(1).await.unwrap();
        assert!(player.is_playing());
    }

    #[tokio::test]
    async fn test_failed_resume_halts_pipeline() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let mut player = PlaybackController::new(&pipeline, &decoder, PlayerConfig::default());
        player.refresh(&mut storage()).await.unwrap();
        player.play(0).await.unwrap();
        player.pause().await.unwrap();

        decoder.lock().await.fail_next(DecoderError::Spi);
        assert_eq!(
            player.resume().await,
            Err(PlayerError::DecoderFault(DecoderError::Spi))
        );
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(!pipeline.is_paused());
        assert_eq!(pipeline.fault(), Some(DecoderError::Spi));
    }

    #[tokio::test]
    async fn test_failed_preempt_cancel_halts_pipeline() {
        let pipeline = TestPipeline::new();
        let decoder = TestDecoder::new(MockDecoder::new());
        let config = PlayerConfig::default().with_policy(PlayPolicy::Preempt);
        let mut player = PlaybackController::new(&pipeline, &decoder, config);
        player.refresh(&mut storage()).await.unwrap();
        player.play(0).await.unwrap();
        player.pause().await.unwrap();

        let fault = DecoderError::NotReady { polls: 8 };
        decoder.lock().await.fail_next(fault);
        assert_eq!(player.play(1).await, Err(PlayerError::DecoderFault(fault)));

        assert_eq!(player.state(), PlayerState::Idle);
        assert!(!pipeline.is_paused());
        assert_eq!(pipeline.queued_songs(), 0);
        assert_eq!(pipeline.fault(), Some(fault));
    }
}
