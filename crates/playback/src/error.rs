//! Error types for the decoder driver, the streaming pipeline and the
//! playback controller.
//!
//! A [`DecoderError`] leaves the bus in an unknown state. The decode stage
//! halts and the controller stays unusable until
//! `PlaybackController::recover` runs a hardware reset.

use thiserror_no_std::Error;

/// Failure inside a decoder register or streaming transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecoderError {
    /// The SPI peripheral rejected a transfer or a clock change.
    #[error("SPI transfer failed")]
    Spi,
    /// A control pin (reset, chip select, DREQ) could not be driven or read.
    #[error("control pin fault")]
    Pin,
    /// DREQ stayed low for the whole ready-gate bound.
    #[error("decoder not ready after {polls} polls")]
    NotReady {
        /// Low samples observed before giving up
        polls: u32,
    },
}

/// Failure inside the fetch/decode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineError {
    /// Open, seek or read failed; the rest of the track is skipped.
    #[error("storage fault")]
    StorageFault,
    /// The track was superseded before it finished streaming.
    #[error("track cancelled")]
    Cancelled,
    /// Non-blocking enqueue found the queue full.
    #[error("queue full")]
    QueueFull,
    /// Non-blocking dequeue found the queue empty.
    #[error("queue empty")]
    QueueEmpty,
}

/// Error returned by the playback controller's application surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerError {
    /// The operation is not valid in the current player state.
    #[error("operation not valid in the current state")]
    InvalidState,
    /// `play` was given an index past the end of the catalog.
    #[error("track index {index} out of range (catalog holds {len})")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Catalog length at the time of the call
        len: usize,
    },
    /// The catalog is empty.
    #[error("catalog is empty")]
    EmptyCatalog,
    /// A track is already playing and the play policy is `Reject`.
    #[error("player busy")]
    Busy,
    /// The directory held more tracks than the catalog can store; the first
    /// `capacity` were kept.
    #[error("catalog overflow: kept the first {capacity} tracks")]
    CatalogOverflow {
        /// Catalog capacity
        capacity: usize,
    },
    /// A path did not fit the track descriptor's bounded string.
    #[error("path too long")]
    PathTooLong,
    /// Storage failed during a scan or metadata read.
    #[error("storage fault")]
    StorageFault,
    /// The decoder faulted; call `recover` before playing again.
    #[error("decoder fault: {0}")]
    DecoderFault(DecoderError),
    /// A non-blocking queue operation could not proceed.
    #[error("pipeline: {0}")]
    Pipeline(PipelineError),
}

impl From<DecoderError> for PlayerError {
    fn from(error: DecoderError) -> Self {
        Self::DecoderFault(error)
    }
}

impl From<PipelineError> for PlayerError {
    fn from(error: PipelineError) -> Self {
        Self::Pipeline(error)
    }
}
