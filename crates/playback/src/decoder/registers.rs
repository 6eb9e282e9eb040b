//! VS1053b SCI register map, mode-register image, and SPI clock profile.
//!
//! Every SCI transaction is four bytes on the wire:
//!
//! ```text
//! write: [0x02, addr, value_hi, value_lo]
//! read:  [0x03, addr, 0x00,     0x00    ]  → value_hi, value_lo clocked back
//! ```

use crate::config::{BRING_UP_SPI_HZ, CLOCK_MULTIPLIER, XTALI_HZ};

/// SCI write opcode.
pub const OPCODE_WRITE: u8 = 0x02;

/// SCI read opcode.
pub const OPCODE_READ: u8 = 0x03;

/// SCI_CLOCKF value selecting a 4.0× internal clock multiplier (SC_MULT = 5).
pub const CLOCKF_MULT_4X: u16 = 0xA000;

/// SCI_AUDATA value for 44 100 Hz stereo (0xAC44 | stereo bit).
pub const AUDATA_44100_STEREO: u16 = 0xAC45;

/// Parametric RAM address of the stream auto-resync word.
pub const WRAM_AUTO_RESYNC_ADDR: u16 = 0x1E29;

/// Value written to [`WRAM_AUTO_RESYNC_ADDR`] by playback enable.
pub const WRAM_AUTO_RESYNC_VALUE: u16 = 0x0000;

/// SCI registers the driver touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SciRegister {
    /// SCI_MODE: mode control
    Mode = 0x0,
    /// SCI_STATUS: status
    Status = 0x1,
    /// SCI_CLOCKF: clock multiplier
    ClockF = 0x3,
    /// SCI_DECODE_TIME: seconds decoded since the last clear
    DecodeTime = 0x4,
    /// SCI_AUDATA: sample rate and channel count
    AuData = 0x5,
    /// SCI_WRAM: RAM data port
    WRam = 0x6,
    /// SCI_WRAMADDR: RAM address port
    WRamAddr = 0x7,
    /// SCI_HDAT0: stream header data 0
    HDat0 = 0x8,
    /// SCI_HDAT1: stream header data 1
    HDat1 = 0x9,
    /// SCI_VOL: per-channel attenuation
    Volume = 0xB,
}

impl SciRegister {
    /// Wire address of the register.
    pub const fn addr(self) -> u8 {
        self as u8
    }

    /// Reverse of [`addr`](Self::addr); `None` for registers the driver does
    /// not model.
    pub const fn from_addr(addr: u8) -> Option<Self> {
        match addr {
            0x0 => Some(Self::Mode),
            0x1 => Some(Self::Status),
            0x3 => Some(Self::ClockF),
            0x4 => Some(Self::DecodeTime),
            0x5 => Some(Self::AuData),
            0x6 => Some(Self::WRam),
            0x7 => Some(Self::WRamAddr),
            0x8 => Some(Self::HDat0),
            0x9 => Some(Self::HDat1),
            0xB => Some(Self::Volume),
            _ => None,
        }
    }
}

/// Named SCI_MODE flags the driver sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(clippy::struct_excessive_bools)]
pub struct ModeFlags {
    /// SM_RESET: software reset
    pub reset: bool,
    /// SM_CANCEL: cancel decoding of the current stream
    pub cancel: bool,
    /// SM_SDINEW: VS1002 native SPI mode (separate XDCS)
    pub sdi_new: bool,
    /// SM_LINE1: line input selected instead of the microphone
    pub line_input: bool,
}

/// Image of the 16-bit SCI_MODE register, built from [`ModeFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeRegister(u16);

impl ModeRegister {
    const RESET: u16 = 1 << 2;
    const CANCEL: u16 = 1 << 3;
    const SDI_NEW: u16 = 1 << 11;
    const LINE1: u16 = 1 << 14;

    /// Assemble the register from named flags.
    pub const fn from_flags(flags: ModeFlags) -> Self {
        let mut bits = 0;
        if flags.reset {
            bits |= Self::RESET;
        }
        if flags.cancel {
            bits |= Self::CANCEL;
        }
        if flags.sdi_new {
            bits |= Self::SDI_NEW;
        }
        if flags.line_input {
            bits |= Self::LINE1;
        }
        Self(bits)
    }

    /// Native SPI mode with line input: the mode used while playing.
    pub const fn default_mode() -> Self {
        Self::from_flags(ModeFlags {
            reset: false,
            cancel: false,
            sdi_new: true,
            line_input: true,
        })
    }

    /// Native SPI mode with the software-reset bit.
    pub const fn software_reset() -> Self {
        Self::from_flags(ModeFlags {
            reset: true,
            cancel: false,
            sdi_new: true,
            line_input: false,
        })
    }

    /// Same image with SM_CANCEL set.
    #[must_use]
    pub const fn with_cancel(self) -> Self {
        Self(self.0 | Self::CANCEL)
    }

    /// Wrap a value read back from the chip.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw register value.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// `true` while the chip has not yet acknowledged a cancel request.
    pub const fn is_cancel_set(self) -> bool {
        self.0 & Self::CANCEL != 0
    }

    /// Decompose into named flags.
    pub const fn flags(self) -> ModeFlags {
        ModeFlags {
            reset: self.0 & Self::RESET != 0,
            cancel: self.0 & Self::CANCEL != 0,
            sdi_new: self.0 & Self::SDI_NEW != 0,
            line_input: self.0 & Self::LINE1 != 0,
        }
    }
}

/// SPI clock for each transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockProfile {
    /// SCI read clock (≤ CLKI / 7)
    pub register_read_hz: u32,
    /// SCI write clock (≤ CLKI / 4)
    pub register_write_hz: u32,
    /// SDI write clock (≤ CLKI / 4)
    pub stream_write_hz: u32,
}

impl ClockProfile {
    /// Conservative clocks valid before SCI_CLOCKF is programmed.
    pub const fn bring_up() -> Self {
        Self {
            register_read_hz: BRING_UP_SPI_HZ,
            register_write_hz: BRING_UP_SPI_HZ,
            stream_write_hz: BRING_UP_SPI_HZ,
        }
    }

    /// Clocks derived from the internal clock `clki_hz`.
    pub const fn from_internal_clock(clki_hz: u32) -> Self {
        Self {
            register_read_hz: clki_hz / 7,
            register_write_hz: clki_hz / 4,
            stream_write_hz: clki_hz / 4,
        }
    }

    /// Clocks after initialisation: CLKI = XTALI × [`CLOCK_MULTIPLIER`].
    pub const fn multiplied() -> Self {
        Self::from_internal_clock(XTALI_HZ.saturating_mul(CLOCK_MULTIPLIER))
    }
}
