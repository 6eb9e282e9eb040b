//! Decoder timing constants and runtime player configuration.
//!
//! # VS1053b clock chain
//!
//! ```text
//! XTALI 12.288 MHz ──(SCI_CLOCKF multiplier)──▶ CLKI
//!   reset:      CLKI = XTALI       → SPI must stay ≤ 3 MHz
//!   after init: CLKI = 4 × XTALI   = 49.152 MHz
//!                 SCI read  ≤ CLKI / 7 ≈ 7.02 MHz
//!                 SCI/SDI write ≤ CLKI / 4 = 12.288 MHz
//! ```

use crate::volume::Volume;

/// Crystal frequency on the decoder's XTALI pin.
pub const XTALI_HZ: u32 = 12_288_000;

/// Internal clock multiplier programmed during initialisation.
pub const CLOCK_MULTIPLIER: u32 = 4;

/// SPI clock used before the multiplier is programmed.
pub const BRING_UP_SPI_HZ: u32 = 3_000_000;

/// Minimum low time of the hardware reset pulse.
pub const RESET_PULSE_US: u32 = 10;

/// Settle time after a software reset before DREQ is polled.
pub const SOFT_RESET_SETTLE_US: u32 = 2;

/// Largest SDI burst the decoder accepts per DREQ assertion.
pub const SDI_BURST_LEN: usize = 32;

/// Bytes moved per chunk between the fetch and decode stages.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Chunks buffered between fetch and decode.
pub const DEFAULT_CHUNK_DEPTH: usize = 3;

/// Tracks that may wait for the fetch stage.
pub const SONG_QUEUE_DEPTH: usize = 2;

/// Pipeline events buffered for the controller.
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Maximum number of tracks held by the catalog.
pub const CATALOG_CAPACITY: usize = 32;

/// Longest track path, in UTF-8 bytes.
pub const MAX_PATH_LEN: usize = 128;

/// Directory pattern used by catalog refresh.
pub const DEFAULT_PATTERN: &str = "*.mp3";

/// Volume ratio applied at the end of initialisation.
pub const DEFAULT_VOLUME: f32 = 0.8;

/// Ready-gate poll bound used by [`ReadyGate::hardened`].
pub const DEFAULT_MAX_READY_POLLS: u32 = 100_000;

/// How long the driver may spin on DREQ before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadyGate {
    /// `None` spins forever; `Some(n)` fails after `n` low samples.
    pub max_polls: Option<u32>,
}

impl ReadyGate {
    /// Spin until DREQ rises, however long that takes.
    pub const UNBOUNDED: Self = Self { max_polls: None };

    /// Give up after `max_polls` low samples.
    pub const fn bounded(max_polls: u32) -> Self {
        Self { max_polls: Some(max_polls) }
    }

    /// Bounded by [`DEFAULT_MAX_READY_POLLS`].
    pub const fn hardened() -> Self {
        Self::bounded(DEFAULT_MAX_READY_POLLS)
    }

    /// `true` once `polls` low samples exhaust the bound.
    pub fn exhausted(self, polls: u32) -> bool {
        self.max_polls.is_some_and(|max| polls >= max)
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// What `play` does when a track is already playing or paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayPolicy {
    /// Refuse with `PlayerError::Busy`.
    #[default]
    Reject,
    /// Wait for room in the song queue and play after the current track.
    Queue,
    /// Cancel the current track and start the new one immediately.
    Preempt,
}

/// Runtime configuration for the playback controller.
#[derive(Debug, Clone, Copy)]
pub struct PlayerConfig {
    /// Behaviour of `play` while busy
    pub play_policy: PlayPolicy,
    /// Volume applied as the last step of decoder initialisation
    pub default_volume: Volume,
    /// Directory pattern for catalog refresh
    pub pattern: &'static str,
}

impl PlayerConfig {
    /// Same configuration with a different play policy.
    #[must_use]
    pub const fn with_policy(mut self, play_policy: PlayPolicy) -> Self {
        self.play_policy = play_policy;
        self
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            play_policy: PlayPolicy::default(),
            default_volume: Volume::default(),
            pattern: DEFAULT_PATTERN,
        }
    }
}
