//! Peripheral abstraction layer
//!
//! The decoder needs three different SPI clock rates over its lifetime (slow
//! bring-up, register reads, register/stream writes), which `embedded-hal`'s
//! `SpiBus` cannot express. [`SpiPeripheral`] adds clock reconfiguration on
//! top of a plain full-duplex byte exchange. Chip selects are driven by the
//! caller as ordinary GPIO outputs.

/// SPI peripheral abstraction
pub trait SpiPeripheral {
    /// Error type
    type Error: core::fmt::Debug;

    /// Transfer data (full duplex). `read` and `write` have equal length.
    fn transfer(
        &mut self,
        read: &mut [u8],
        write: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Write data (half duplex, received bytes discarded)
    fn write(&mut self, data: &[u8])
        -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Change the bus clock
    fn configure(&mut self, config: SpiConfig) -> Result<(), Self::Error>;
}

/// SPI configuration. The bus always runs mode 0 (CPOL=0, CPHA=0), MSB
/// first; only the clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
}

impl SpiConfig {
    /// Mode 0, MSB first at `frequency` Hz.
    pub const fn mode0(frequency: u32) -> Self {
        Self { frequency }
    }
}
