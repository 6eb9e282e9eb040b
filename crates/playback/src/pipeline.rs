//! Fetch/decode streaming pipeline.
//!
//! ```text
//!  controller ──SongQueue(2)──▶ fetch stage ──ChunkBuffer(DEPTH)──▶ decode stage ──SDI──▶ VS1053b
//!      ▲                          (storage)                          (decoder lock)
//!      └──────────────────────────── events ◀──────────────────────────────┘
//! ```
//!
//! The two stages run as independent tasks (`run_fetch`, `run_decode`). The
//! ChunkBuffer is the backpressure point: when the decoder falls behind, the
//! fetch stage blocks on a full queue instead of reading further ahead.
//!
//! Every request carries the pipeline generation it was issued under.
//! [`Pipeline::cancel_all`] bumps the generation, so both stages can drop
//! superseded work without any other coordination.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use platform::{File, Storage};

use crate::config::{
    DEFAULT_CHUNK_DEPTH, DEFAULT_CHUNK_SIZE, EVENT_QUEUE_DEPTH, SDI_BURST_LEN, SONG_QUEUE_DEPTH,
};
use crate::decoder::Mp3Decoder;
use crate::error::{DecoderError, PipelineError};
use crate::track::TrackDescriptor;

/// A track handed to the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRequest {
    /// Controller-assigned id, echoed in events
    pub ticket: u32,
    /// Pipeline generation at enqueue time
    pub generation: u32,
    /// File to stream
    pub track: TrackDescriptor,
}

/// Fixed-size slice of a track between the fetch and decode stages.
///
/// Moved by value: the fetch stage fills one on its stack before sending,
/// and the decode stage receives it onto its own.
#[derive(Debug, Clone)]
pub struct Chunk<const CHUNK: usize> {
    ticket: u32,
    generation: u32,
    offset: u64,
    len: usize,
    last: bool,
    data: [u8; CHUNK],
}

impl<const CHUNK: usize> Chunk<CHUNK> {
    fn empty(ticket: u32, generation: u32, offset: u64) -> Self {
        Self {
            ticket,
            generation,
            offset,
            len: 0,
            last: false,
            data: [0; CHUNK],
        }
    }

    /// Ticket of the track this chunk belongs to.
    pub fn ticket(&self) -> u32 {
        self.ticket
    }

    /// File offset of the first byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Valid bytes.
    pub fn bytes(&self) -> &[u8] {
        self.data.get(..self.len).unwrap_or_default()
    }

    /// `true` for the final chunk of a track.
    pub fn is_last(&self) -> bool {
        self.last
    }
}

/// Progress reported by the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineEvent {
    /// First chunk reached the decoder
    TrackStarted {
        /// Track ticket
        ticket: u32,
    },
    /// Last chunk was streamed
    TrackFinished {
        /// Track ticket
        ticket: u32,
    },
    /// Storage failed; the rest of the track was skipped
    TrackFailed {
        /// Track ticket
        ticket: u32,
        /// Failure kind
        error: PipelineError,
    },
    /// The track was superseded before it finished
    TrackCancelled {
        /// Track ticket
        ticket: u32,
    },
    /// The decoder failed; the decode stage is halted until restart
    DecoderFault {
        /// Ticket of the chunk being streamed
        ticket: u32,
        /// Driver error
        error: DecoderError,
    },
}

/// Queues and shared flags connecting controller, fetch stage and decode
/// stage.
///
/// `CHUNK` must be a whole multiple of the 32-byte SDI burst.
pub struct Pipeline<
    M: RawMutex,
    const CHUNK: usize = DEFAULT_CHUNK_SIZE,
    const DEPTH: usize = DEFAULT_CHUNK_DEPTH,
> {
    songs: Channel<M, SongRequest, SONG_QUEUE_DEPTH>,
    chunks: Channel<M, Chunk<CHUNK>, DEPTH>,
    events: Channel<M, PipelineEvent, EVENT_QUEUE_DEPTH>,
    generation: AtomicU32,
    paused: AtomicBool,
    resumed: Signal<M, ()>,
    fault: BlockingMutex<M, Cell<Option<DecoderError>>>,
}

impl<M: RawMutex, const CHUNK: usize, const DEPTH: usize> Pipeline<M, CHUNK, DEPTH> {
    /// Empty pipeline, not paused, generation 0.
    pub const fn new() -> Self {
        const {
            assert!(
                CHUNK > 0 && matches!(CHUNK.checked_rem(SDI_BURST_LEN), Some(0)),
                "chunk size must be a multiple of the SDI burst"
            );
        }
        Self {
            songs: Channel::new(),
            chunks: Channel::new(),
            events: Channel::new(),
            generation: AtomicU32::new(0),
            paused: AtomicBool::new(false),
            resumed: Signal::new(),
            fault: BlockingMutex::new(Cell::new(None)),
        }
    }

    // ── controller side ─────────────────────────────────────────────────────

    /// Queue a track for the fetch stage, waiting while the queue is full.
    pub async fn enqueue(&self, ticket: u32, track: TrackDescriptor) {
        let request = self.request(ticket, track);
        self.songs.send(request).await;
    }

    /// Queue a track without waiting.
    ///
    /// # Errors
    ///
    /// [`PipelineError::QueueFull`] when two tracks are already waiting.
    pub fn try_enqueue(&self, ticket: u32, track: TrackDescriptor) -> Result<(), PipelineError> {
        let request = self.request(ticket, track);
        self.songs
            .try_send(request)
            .map_err(|_| PipelineError::QueueFull)
    }

    fn request(&self, ticket: u32, track: TrackDescriptor) -> SongRequest {
        SongRequest {
            ticket,
            generation: self.generation(),
            track,
        }
    }

    /// Supersede everything in flight: queued songs and buffered chunks are
    /// discarded, and both stages drop work from earlier generations.
    pub fn cancel_all(&self) {
        let next = self.generation().wrapping_add(1);
        self.generation.store(next, Ordering::Release);
        self.songs.clear();
        self.chunks.clear();
        debug!("pipeline: cancelled, generation {}", next);
    }

    /// Stop forwarding chunks after the current SDI burst. Buffered chunks
    /// stay queued.
    pub fn pause(&self) {
        self.resumed.reset();
        self.paused.store(true, Ordering::Release);
    }

    /// Continue forwarding from the next buffered byte.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resumed.signal(());
    }

    /// Cancel everything, clear a decoder fault and unpause.
    pub fn restart(&self) {
        self.cancel_all();
        self.fault.lock(|fault| fault.set(None));
        self.resume();
        info!("pipeline: restarted");
    }

    /// Halt the decode stage with `error` until [`restart`](Self::restart).
    ///
    /// Work in flight is cancelled and the pause is lifted, so neither stage
    /// stays parked on a track that can no longer play.
    pub fn halt(&self, error: DecoderError) {
        self.fault.lock(|fault| fault.set(Some(error)));
        self.cancel_all();
        self.resume();
        error!("pipeline: halted by decoder fault: {}", error);
    }

    /// Next stage event, if any.
    pub fn try_next_event(&self) -> Option<PipelineEvent> {
        self.events.try_receive().ok()
    }

    /// Wait for the next stage event.
    pub async fn next_event(&self) -> PipelineEvent {
        self.events.receive().await
    }

    /// Current generation.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// `true` between `pause` and `resume`.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// The decoder error that halted the decode stage, if any.
    pub fn fault(&self) -> Option<DecoderError> {
        self.fault.lock(Cell::get)
    }

    /// Chunks waiting for the decode stage.
    pub fn buffered_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Songs waiting for the fetch stage.
    pub fn queued_songs(&self) -> usize {
        self.songs.len()
    }

    /// Take the next buffered chunk without waiting.
    ///
    /// # Errors
    ///
    /// [`PipelineError::QueueEmpty`] when nothing is buffered.
    pub fn try_next_chunk(&self) -> Result<Chunk<CHUNK>, PipelineError> {
        self.chunks
            .try_receive()
            .map_err(|_| PipelineError::QueueEmpty)
    }

    fn emit(&self, event: PipelineEvent) {
        if self.events.try_send(event).is_err() {
            warn!("pipeline: event queue full, event dropped");
        }
    }

    // ── fetch stage ─────────────────────────────────────────────────────────

    /// Fetch stage task body.
    pub async fn run_fetch<S: Storage>(&self, storage: &mut S) -> ! {
        loop {
            let _ = self.fetch_next(storage).await;
        }
    }

    /// Take one song from the queue and stream it into the ChunkBuffer.
    ///
    /// Storage failures and cancellation are reported as events and returned.
    pub async fn fetch_next<S: Storage>(&self, storage: &mut S) -> Result<(), PipelineError> {
        let request = self.songs.receive().await;
        let ticket = request.ticket;

        let result = if request.generation == self.generation() {
            info!("fetch: {} ({} bytes)", request.track.path(), request.track.size_bytes());
            self.fetch_track(storage, &request).await
        } else {
            Err(PipelineError::Cancelled)
        };

        match result {
            Ok(()) => {}
            Err(PipelineError::Cancelled) => {
                debug!("fetch: ticket {} cancelled", ticket);
                self.emit(PipelineEvent::TrackCancelled { ticket });
            }
            Err(error) => {
                warn!("fetch: ticket {} failed: {}", ticket, error);
                self.emit(PipelineEvent::TrackFailed { ticket, error });
            }
        }
        result
    }

    async fn fetch_track<S: Storage>(
        &self,
        storage: &mut S,
        request: &SongRequest,
    ) -> Result<(), PipelineError> {
        let mut file = storage
            .open_file(request.track.path())
            .await
            .map_err(|_| PipelineError::StorageFault)?;

        let result = self.stream_file(&mut file, request).await;
        if file.close().await.is_err() {
            warn!("fetch: close failed for {}", request.track.path());
        }
        result
    }

    /// Read `ceil(size / CHUNK)` chunks in file order, one seek and one read
    /// each, and push them into the ChunkBuffer.
    async fn stream_file<F: File>(
        &self,
        file: &mut F,
        request: &SongRequest,
    ) -> Result<(), PipelineError> {
        let size = request.track.size_bytes();
        let count = request.track.chunk_count(CHUNK);
        let chunk_len = CHUNK as u64;

        if count == 0 {
            let mut marker = Chunk::empty(request.ticket, request.generation, 0);
            marker.last = true;
            self.chunks.send(marker).await;
            return Ok(());
        }

        for index in 0..count {
            if request.generation != self.generation() {
                return Err(PipelineError::Cancelled);
            }
            let offset = index.saturating_mul(chunk_len);
            let wanted =
                usize::try_from(size.saturating_sub(offset).min(chunk_len)).unwrap_or(CHUNK);

            let mut chunk = Chunk::empty(request.ticket, request.generation, offset);
            file.seek(offset)
                .await
                .map_err(|_| PipelineError::StorageFault)?;
            let read = file
                .read(chunk.data.get_mut(..wanted).unwrap_or_default())
                .await
                .map_err(|_| PipelineError::StorageFault)?;

            chunk.len = read;
            chunk.last = read == 0 || index.saturating_add(1) == count;
            self.chunks.send(chunk).await;

            if read == 0 {
                warn!("fetch: {} ended early at {}", request.track.path(), offset);
                break;
            }
        }
        Ok(())
    }

    // ── decode stage ────────────────────────────────────────────────────────

    /// Decode stage task body.
    pub async fn run_decode<D: Mp3Decoder>(&self, decoder: &Mutex<M, D>) -> ! {
        loop {
            self.decode_next(decoder).await;
        }
    }

    /// Take one chunk from the ChunkBuffer and stream it to the decoder.
    ///
    /// Chunks from an earlier generation, and every chunk while the stage is
    /// halted by a decoder fault, are discarded.
    pub async fn decode_next<D: Mp3Decoder>(&self, decoder: &Mutex<M, D>) {
        self.wait_while_paused().await;
        let chunk = self.chunks.receive().await;

        if self.fault().is_some() || chunk.generation != self.generation() {
            trace!("decode: dropping chunk at {}", chunk.offset);
            return;
        }

        match self.forward(decoder, &chunk).await {
            Ok(true) if chunk.last => {
                info!("decode: ticket {} finished", chunk.ticket);
                self.emit(PipelineEvent::TrackFinished {
                    ticket: chunk.ticket,
                });
            }
            Ok(_) => {}
            Err(error) => {
                error!("decode: decoder fault: {}", error);
                self.fault.lock(|fault| fault.set(Some(error)));
                self.emit(PipelineEvent::DecoderFault {
                    ticket: chunk.ticket,
                    error,
                });
            }
        }
    }

    /// Stream one chunk in SDI-burst pieces, taking the decoder lock per
    /// piece so register traffic can interleave between bursts. Returns
    /// `false` if the chunk was superseded part way.
    async fn forward<D: Mp3Decoder>(
        &self,
        decoder: &Mutex<M, D>,
        chunk: &Chunk<CHUNK>,
    ) -> Result<bool, DecoderError> {
        if chunk.offset == 0 && chunk.len > 0 {
            self.wait_while_paused().await;
            decoder.lock().await.enable_playback().await?;
            self.emit(PipelineEvent::TrackStarted {
                ticket: chunk.ticket,
            });
        }
        for burst in chunk.bytes().chunks(SDI_BURST_LEN) {
            self.wait_while_paused().await;
            if chunk.generation != self.generation() {
                return Ok(false);
            }
            decoder.lock().await.send_data(burst).await?;
        }
        Ok(true)
    }

    async fn wait_while_paused(&self) {
        while self.is_paused() {
            self.resumed.wait().await;
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::decoder::mock::{DecoderCall, MockDecoder};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use platform::mocks::MemoryStorage;

    type TestPipeline = Pipeline<NoopRawMutex, 64, 3>;

    fn track(path: &str, size: u64) -> TrackDescriptor {
        TrackDescriptor::new(path, size).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_reads_every_chunk_in_order() {
        let pipeline = TestPipeline::new();
        let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 150);
        pipeline.try_enqueue(1, track("a.mp3", 150)).unwrap();

        pipeline.fetch_next(&mut storage).await.unwrap();

        let log = storage.log();
        assert_eq!(log.seeks, vec![0, 64, 128]);
        let sizes: Vec<usize> = log.reads.iter().map(|r| r.returned).collect();
        assert_eq!(sizes, vec![64, 64, 22]);
        assert_eq!(log.closes, 1);

        let chunks: Vec<Chunk<64>> = (0..3).map(|_| pipeline.try_next_chunk().unwrap()).collect();
        assert_eq!(chunks[2].offset(), 128);
        assert!(chunks[2].is_last());
        assert!(!chunks[1].is_last());
        assert_eq!(chunks[1].bytes()[0], 64);
    }

    #[tokio::test]
    async fn test_storage_fault_reports_failed_and_closes() {
        let pipeline = TestPipeline::new();
        let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 128);
        storage.fail_read_at(64);
        pipeline.try_enqueue(7, track("a.mp3", 128)).unwrap();

        assert_eq!(
            pipeline.fetch_next(&mut storage).await,
            Err(PipelineError::StorageFault)
        );
        assert_eq!(pipeline.buffered_chunks(), 1);
        assert_eq!(storage.log().closes, 1);
        assert_eq!(
            pipeline.try_next_event(),
            Some(PipelineEvent::TrackFailed {
                ticket: 7,
                error: PipelineError::StorageFault
            })
        );
    }

    #[tokio::test]
    async fn test_open_failure_is_storage_fault() {
        let pipeline = TestPipeline::new();
        let mut storage = MemoryStorage::new();
        pipeline.try_enqueue(1, track("missing.mp3", 10)).unwrap();
        assert_eq!(
            pipeline.fetch_next(&mut storage).await,
            Err(PipelineError::StorageFault)
        );
        assert_eq!(storage.log().closes, 0);
    }

    #[tokio::test]
    async fn test_song_queue_holds_two() {
        let pipeline = TestPipeline::new();
        pipeline.try_enqueue(1, track("a.mp3", 1)).unwrap();
        pipeline.try_enqueue(2, track("b.mp3", 1)).unwrap();
        assert_eq!(
            pipeline.try_enqueue(3, track("c.mp3", 1)),
            Err(PipelineError::QueueFull)
        );
        assert_eq!(pipeline.try_next_chunk().err(), Some(PipelineError::QueueEmpty));
    }

    #[tokio::test]
    async fn test_decode_enables_then_streams_bursts() {
        let pipeline = TestPipeline::new();
        let decoder: Mutex<NoopRawMutex, MockDecoder> = Mutex::new(MockDecoder::new());
        let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 100);
        pipeline.try_enqueue(3, track("a.mp3", 100)).unwrap();
        pipeline.fetch_next(&mut storage).await.unwrap();

        pipeline.decode_next(&decoder).await;
        pipeline.decode_next(&decoder).await;

        let decoder = decoder.lock().await;
        assert_eq!(decoder.calls()[0], DecoderCall::Enable);
        assert_eq!(decoder.send_lengths(), vec![32, 32, 32, 4]);
        assert_eq!(decoder.streamed(), (0..100u8).collect::<Vec<_>>().as_slice());
        assert_eq!(
            pipeline.try_next_event(),
            Some(PipelineEvent::TrackStarted { ticket: 3 })
        );
        assert_eq!(
            pipeline.try_next_event(),
            Some(PipelineEvent::TrackFinished { ticket: 3 })
        );
    }

    #[tokio::test]
    async fn test_cancel_drops_buffered_and_stale_chunks() {
        let pipeline = TestPipeline::new();
        let decoder: Mutex<NoopRawMutex, MockDecoder> = Mutex::new(MockDecoder::new());
        let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 128);
        pipeline.try_enqueue(1, track("a.mp3", 128)).unwrap();
        pipeline.try_enqueue(2, track("a.mp3", 128)).unwrap();

        pipeline.cancel_all();
        assert_eq!(pipeline.queued_songs(), 0);
        assert_eq!(pipeline.generation(), 1);

        // A request issued before the cancel is dropped by the fetch stage.
        let stale = SongRequest {
            ticket: 9,
            generation: 0,
            track: track("a.mp3", 128),
        };
        pipeline.songs.try_send(stale).unwrap();
        assert_eq!(
            pipeline.fetch_next(&mut storage).await,
            Err(PipelineError::Cancelled)
        );
        assert_eq!(
            pipeline.try_next_event(),
            Some(PipelineEvent::TrackCancelled { ticket: 9 })
        );
        assert!(storage.log().opens.is_empty());

        // A stale chunk reaching the decode stage is discarded.
        pipeline.chunks.try_send(Chunk::empty(9, 0, 0)).unwrap();
        pipeline.decode_next(&decoder).await;
        assert!(decoder.lock().await.calls().is_empty());
    }

    #[tokio::test]
    async fn test_decoder_fault_halts_stage() {
        let pipeline = TestPipeline::new();
        let decoder: Mutex<NoopRawMutex, MockDecoder> = Mutex::new(MockDecoder::new());
        let mut storage = MemoryStorage::new().with_counting_file("a.mp3", 128);
        pipeline.try_enqueue(4, track("a.mp3", 128)).unwrap();
        pipeline.fetch_next(&mut storage).await.unwrap();

        let fault = DecoderError::NotReady { polls: 10 };
        decoder.lock().await.fail_next(fault);
        pipeline.decode_next(&decoder).await;
        assert_eq!(pipeline.fault(), Some(fault));
        assert_eq!(
            pipeline.try_next_event(),
            Some(PipelineEvent::DecoderFault {
                ticket: 4,
                error: fault
            })
        );

        // Remaining chunks drain without touching the decoder.
        pipeline.decode_next(&decoder).await;
        assert!(decoder.lock().await.calls().is_empty());
        assert_eq!(pipeline.buffered_chunks(), 0);

        pipeline.restart();
        assert_eq!(pipeline.fault(), None);
    }

    #[tokio::test]
    async fn test_empty_file_finishes_without_reads() {
        let pipeline = TestPipeline::new();
        let decoder: Mutex<NoopRawMutex, MockDecoder> = Mutex::new(MockDecoder::new());
        let mut storage = MemoryStorage::new().with_file("e.mp3", Vec::new());
        pipeline.try_enqueue(5, track("e.mp3", 0)).unwrap();

        pipeline.fetch_next(&mut storage).await.unwrap();
        pipeline.decode_next(&decoder).await;

        assert!(storage.log().reads.is_empty());
        assert!(decoder.lock().await.calls().is_empty());
        assert_eq!(
            pipeline.try_next_event(),
            Some(PipelineEvent::TrackFinished { ticket: 5 })
        );
    }
}
