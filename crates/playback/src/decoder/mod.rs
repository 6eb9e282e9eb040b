//! Hardware MP3 decoder abstraction.
//!
//! The pipeline and controller only see [`Mp3Decoder`]; the VS1053b driver is
//! the one concrete implementation. Other chips of the same family implement
//! the same contract.

pub mod registers;
pub mod vs1053b;

#[cfg(any(test, feature = "std"))]
pub mod mock;

#[cfg(any(test, feature = "std"))]
pub mod sim;

pub use registers::{ClockProfile, ModeFlags, ModeRegister, SciRegister};
pub use vs1053b::{ControlPins, Vs1053b};

use crate::error::DecoderError;
use crate::volume::Volume;

/// Playback operations of a hardware MP3 decoder.
///
/// Every operation waits for the decoder's ready signal before it touches the
/// bus, so each call may suspend for as long as the chip is busy (bounded by
/// the driver's ready gate).
pub trait Mp3Decoder {
    /// Full bring-up: hardware reset, clock multiplier, then `volume`.
    async fn initialize(&mut self, volume: Volume) -> Result<(), DecoderError>;

    /// Pulse the reset line and wait for the chip to come back.
    async fn hardware_reset(&mut self) -> Result<(), DecoderError>;

    /// Reset through the mode register without touching the reset line.
    async fn software_reset(&mut self) -> Result<(), DecoderError>;

    /// Start decoding a new stream from 0:00.
    async fn enable_playback(&mut self) -> Result<(), DecoderError>;

    /// Cancel the current stream and wait until the chip confirms it.
    async fn pause_playback(&mut self) -> Result<(), DecoderError>;

    /// Restore the playing mode and audio format.
    async fn resume_playback(&mut self) -> Result<(), DecoderError>;

    /// Reset the decode-time counter to zero.
    async fn clear_decode_time(&mut self) -> Result<(), DecoderError>;

    /// Seconds decoded since the last clear.
    async fn decode_time_secs(&mut self) -> Result<u16, DecoderError>;

    /// Apply `volume` to both channels.
    async fn set_volume(&mut self, volume: Volume) -> Result<(), DecoderError>;

    /// Stream compressed audio bytes to the decoder.
    async fn send_data(&mut self, data: &[u8]) -> Result<(), DecoderError>;
}
