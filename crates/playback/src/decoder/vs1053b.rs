//! VS1053b register and streaming protocol driver.
//!
//! The chip exposes two SPI interfaces on one bus:
//!
//! - **SCI** (XCS): 16-bit control registers, see [`super::registers`]
//! - **SDI** (XDCS): compressed audio, at most 32 bytes per DREQ assertion
//!
//! DREQ high means the chip can take the next transaction. Every SCI and SDI
//! transfer starts by waiting for it; the wait yields to the executor between
//! samples and is bounded by the configured [`ReadyGate`].

use embassy_futures::yield_now;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use platform::{SpiConfig, SpiPeripheral};

use super::registers::{
    ClockProfile, ModeRegister, SciRegister, AUDATA_44100_STEREO, CLOCKF_MULT_4X, OPCODE_READ,
    OPCODE_WRITE, WRAM_AUTO_RESYNC_ADDR, WRAM_AUTO_RESYNC_VALUE,
};
use super::Mp3Decoder;
use crate::config::{ReadyGate, RESET_PULSE_US, SDI_BURST_LEN, SOFT_RESET_SETTLE_US};
use crate::error::DecoderError;
use crate::volume::Volume;

/// GPIO lines between the MCU and the VS1053b.
pub struct ControlPins<RST, XCS, XDCS, DREQ> {
    /// XRESET, active low
    pub rst: RST,
    /// XCS: SCI chip select, active low
    pub xcs: XCS,
    /// XDCS: SDI chip select, active low
    pub xdcs: XDCS,
    /// DREQ input, high when the chip accepts data
    pub dreq: DREQ,
}

/// VS1053b driver.
pub struct Vs1053b<SPI, RST, XCS, XDCS, DREQ, DELAY> {
    spi: SPI,
    pins: ControlPins<RST, XCS, XDCS, DREQ>,
    delay: DELAY,
    clocks: ClockProfile,
    active_hz: Option<u32>,
    gate: ReadyGate,
}

impl<SPI, RST, XCS, XDCS, DREQ, DELAY> Vs1053b<SPI, RST, XCS, XDCS, DREQ, DELAY>
where
    SPI: SpiPeripheral,
    RST: OutputPin,
    XCS: OutputPin,
    XDCS: OutputPin,
    DREQ: InputPin,
    DELAY: DelayNs,
{
    /// Wrap the bus, pins and delay. Nothing is driven until
    /// [`initialize`](Mp3Decoder::initialize).
    pub fn new(
        spi: SPI,
        pins: ControlPins<RST, XCS, XDCS, DREQ>,
        delay: DELAY,
        gate: ReadyGate,
    ) -> Self {
        Self {
            spi,
            pins,
            delay,
            clocks: ClockProfile::bring_up(),
            active_hz: None,
            gate,
        }
    }

    /// Clock profile currently in effect.
    pub fn clocks(&self) -> ClockProfile {
        self.clocks
    }

    /// Ready-gate bound in effect.
    pub fn ready_gate(&self) -> ReadyGate {
        self.gate
    }

    /// Release the bus, pins and delay.
    pub fn release(self) -> (SPI, ControlPins<RST, XCS, XDCS, DREQ>, DELAY) {
        (self.spi, self.pins, self.delay)
    }

    /// Spin until DREQ is high.
    ///
    /// # Errors
    ///
    /// [`DecoderError::NotReady`] once the ready gate's bound is exhausted.
    pub async fn wait_for_ready(&mut self) -> Result<(), DecoderError> {
        let mut polls: u32 = 0;
        loop {
            if self.dreq_high()? {
                return Ok(());
            }
            polls = polls.saturating_add(1);
            if self.gate.exhausted(polls) {
                warn!("vs1053b: DREQ low after {} polls", polls);
                return Err(DecoderError::NotReady { polls });
            }
            yield_now().await;
        }
    }

    /// Write one SCI register.
    pub async fn write_register(
        &mut self,
        register: SciRegister,
        value: u16,
    ) -> Result<(), DecoderError> {
        self.wait_for_ready().await?;
        self.select_clock(self.clocks.register_write_hz)?;

        let [hi, lo] = value.to_be_bytes();
        self.pins.xcs.set_low().map_err(|_| DecoderError::Pin)?;
        let result = self
            .spi
            .write(&[OPCODE_WRITE, register.addr(), hi, lo])
            .await
            .map_err(|_| DecoderError::Spi);
        self.pins.xcs.set_high().map_err(|_| DecoderError::Pin)?;

        trace!("vs1053b: SCI write reg {} = {}", register.addr(), value);
        result
    }

    /// Read one SCI register.
    pub async fn read_register(&mut self, register: SciRegister) -> Result<u16, DecoderError> {
        self.wait_for_ready().await?;
        self.select_clock(self.clocks.register_read_hz)?;

        let mut response = [0u8; 2];
        self.pins.xcs.set_low().map_err(|_| DecoderError::Pin)?;
        let result = match self.spi.write(&[OPCODE_READ, register.addr()]).await {
            Ok(()) => self.spi.transfer(&mut response, &[0x00, 0x00]).await,
            Err(e) => Err(e),
        };
        self.pins.xcs.set_high().map_err(|_| DecoderError::Pin)?;
        result.map_err(|_| DecoderError::Spi)?;

        let value = u16::from_be_bytes(response);
        trace!("vs1053b: SCI read reg {} = {}", register.addr(), value);
        Ok(value)
    }

    /// One gated SDI transfer of at most [`SDI_BURST_LEN`] bytes.
    async fn write_data(&mut self, burst: &[u8]) -> Result<(), DecoderError> {
        self.wait_for_ready().await?;
        self.select_clock(self.clocks.stream_write_hz)?;

        self.pins.xdcs.set_low().map_err(|_| DecoderError::Pin)?;
        let result = self.spi.write(burst).await.map_err(|_| DecoderError::Spi);
        self.pins.xdcs.set_high().map_err(|_| DecoderError::Pin)?;
        result
    }

    /// Current SCI_MODE contents.
    pub async fn read_mode(&mut self) -> Result<ModeRegister, DecoderError> {
        self.read_register(SciRegister::Mode)
            .await
            .map(ModeRegister::from_bits)
    }

    /// Raw SCI_STATUS contents.
    pub async fn read_status(&mut self) -> Result<u16, DecoderError> {
        self.read_register(SciRegister::Status).await
    }

    fn dreq_high(&mut self) -> Result<bool, DecoderError> {
        self.pins.dreq.is_high().map_err(|_| DecoderError::Pin)
    }

    fn select_clock(&mut self, hz: u32) -> Result<(), DecoderError> {
        if self.active_hz != Some(hz) {
            self.spi
                .configure(SpiConfig::mode0(hz))
                .map_err(|_| DecoderError::Spi)?;
            self.active_hz = Some(hz);
        }
        Ok(())
    }

    fn idle_pins(&mut self) -> Result<(), DecoderError> {
        self.pins.rst.set_high().map_err(|_| DecoderError::Pin)?;
        self.pins.xcs.set_high().map_err(|_| DecoderError::Pin)?;
        self.pins.xdcs.set_high().map_err(|_| DecoderError::Pin)
    }
}

impl<SPI, RST, XCS, XDCS, DREQ, DELAY> Mp3Decoder for Vs1053b<SPI, RST, XCS, XDCS, DREQ, DELAY>
where
    SPI: SpiPeripheral,
    RST: OutputPin,
    XCS: OutputPin,
    XDCS: OutputPin,
    DREQ: InputPin,
    DELAY: DelayNs,
{
    async fn initialize(&mut self, volume: Volume) -> Result<(), DecoderError> {
        info!("vs1053b: initialising");
        self.idle_pins()?;

        // CLKI equals XTALI until SCI_CLOCKF is written.
        self.clocks = ClockProfile::bring_up();
        self.active_hz = None;
        self.select_clock(self.clocks.register_write_hz)?;

        self.hardware_reset().await?;
        self.write_register(SciRegister::ClockF, CLOCKF_MULT_4X)
            .await?;
        self.wait_for_ready().await?;

        self.clocks = ClockProfile::multiplied();
        debug!(
            "vs1053b: clocks read={} Hz write={} Hz",
            self.clocks.register_read_hz,
            self.clocks.register_write_hz
        );

        self.set_volume(volume).await
    }

    async fn hardware_reset(&mut self) -> Result<(), DecoderError> {
        self.pins.rst.set_high().map_err(|_| DecoderError::Pin)?;
        self.pins.rst.set_low().map_err(|_| DecoderError::Pin)?;
        self.delay.delay_us(RESET_PULSE_US).await;
        self.pins.rst.set_high().map_err(|_| DecoderError::Pin)?;
        self.wait_for_ready().await
    }

    async fn software_reset(&mut self) -> Result<(), DecoderError> {
        self.write_register(SciRegister::Mode, ModeRegister::software_reset().bits())
            .await?;
        self.delay.delay_us(SOFT_RESET_SETTLE_US).await;
        self.wait_for_ready().await
    }

    async fn enable_playback(&mut self) -> Result<(), DecoderError> {
        self.resume_playback().await?;
        self.write_register(SciRegister::WRamAddr, WRAM_AUTO_RESYNC_ADDR)
            .await?;
        self.write_register(SciRegister::WRam, WRAM_AUTO_RESYNC_VALUE)
            .await?;
        self.clear_decode_time().await
    }

    async fn pause_playback(&mut self) -> Result<(), DecoderError> {
        let cancel = ModeRegister::default_mode().with_cancel();
        self.write_register(SciRegister::Mode, cancel.bits()).await?;

        // Done only when DREQ is high and SM_CANCEL reads back clear at once.
        let mut polls: u32 = 0;
        loop {
            if self.dreq_high()? {
                let mode = self.read_mode().await?;
                if !mode.is_cancel_set() && self.dreq_high()? {
                    debug!("vs1053b: stream cancelled after {} polls", polls);
                    return Ok(());
                }
            }
            polls = polls.saturating_add(1);
            if self.gate.exhausted(polls) {
                warn!("vs1053b: cancel not acknowledged after {} polls", polls);
                return Err(DecoderError::NotReady { polls });
            }
            yield_now().await;
        }
    }

    async fn resume_playback(&mut self) -> Result<(), DecoderError> {
        self.write_register(SciRegister::Mode, ModeRegister::default_mode().bits())
            .await?;
        self.write_register(SciRegister::AuData, AUDATA_44100_STEREO)
            .await
    }

    async fn clear_decode_time(&mut self) -> Result<(), DecoderError> {
        // The 32-bit counter only resets after two consecutive writes.
        self.write_register(SciRegister::DecodeTime, 0x0000).await?;
        self.write_register(SciRegister::DecodeTime, 0x0000).await
    }

    async fn decode_time_secs(&mut self) -> Result<u16, DecoderError> {
        self.read_register(SciRegister::DecodeTime).await
    }

    async fn set_volume(&mut self, volume: Volume) -> Result<(), DecoderError> {
        self.write_register(SciRegister::Volume, volume.register_value())
            .await
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), DecoderError> {
        for burst in data.chunks(SDI_BURST_LEN) {
            self.write_data(burst).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::decoder::sim::{BusEvent, Vs1053Sim};

    fn sci_writes(events: &[BusEvent]) -> Vec<(SciRegister, u16)> {
        events
            .iter()
            .filter_map(|e| match *e {
                BusEvent::SciWrite { register, value, .. } => Some((register, value)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_sequence() {
        let sim = Vs1053Sim::new();
        let mut driver = sim.driver(ReadyGate::UNBOUNDED);
        driver.initialize(Volume::default()).await.unwrap();

        let events = sim.events();
        let reset_at = events
            .iter()
            .position(|e| *e == BusEvent::HardwareReset)
            .unwrap();
        let clockf_at = events
            .iter()
            .position(|e| matches!(e, BusEvent::SciWrite { register: SciRegister::ClockF, .. }))
            .unwrap();
        assert!(reset_at < clockf_at);

        // ClockF goes out at the bring-up clock.
        assert_eq!(
            events[clockf_at],
            BusEvent::SciWrite {
                register: SciRegister::ClockF,
                value: CLOCKF_MULT_4X,
                hz: 3_000_000
            }
        );

        // Volume goes out at the multiplied write clock.
        assert_eq!(
            events.last(),
            Some(&BusEvent::SciWrite {
                register: SciRegister::Volume,
                value: Volume::default().register_value(),
                hz: 12_288_000
            })
        );
        assert_eq!(driver.clocks(), ClockProfile::multiplied());
    }

    #[tokio::test]
    async fn test_register_write_frames_high_byte_first() {
        let sim = Vs1053Sim::new();
        let mut driver = sim.driver(ReadyGate::UNBOUNDED);
        driver
            .write_register(SciRegister::Volume, 0x1234)
            .await
            .unwrap();
        assert_eq!(sim.register(SciRegister::Volume), 0x1234);
        assert_eq!(sim.wire_bytes(), vec![0x02, 0x0B, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_register_read_assembles_big_endian() {
        let sim = Vs1053Sim::new();
        sim.set_register(SciRegister::Status, 0xBEEF);
        let mut driver = sim.driver(ReadyGate::UNBOUNDED);
        assert_eq!(driver.read_status().await.unwrap(), 0xBEEF);
    }

    #[tokio::test]
    async fn test_enable_clears_decode_time_twice() {
        let sim = Vs1053Sim::new();
        let mut driver = sim.driver(ReadyGate::UNBOUNDED);
        driver.enable_playback().await.unwrap();

        assert_eq!(
            sci_writes(&sim.events()),
            vec![
                (SciRegister::Mode, 0x4800),
                (SciRegister::AuData, AUDATA_44100_STEREO),
                (SciRegister::WRamAddr, WRAM_AUTO_RESYNC_ADDR),
                (SciRegister::WRam, WRAM_AUTO_RESYNC_VALUE),
                (SciRegister::DecodeTime, 0x0000),
                (SciRegister::DecodeTime, 0x0000),
            ]
        );
    }

    #[tokio::test]
    async fn test_software_reset_writes_reset_mode() {
        let sim = Vs1053Sim::new();
        let mut driver = sim.driver(ReadyGate::UNBOUNDED);
        driver.software_reset().await.unwrap();
        assert_eq!(sci_writes(&sim.events()), vec![(SciRegister::Mode, 0x0804)]);
    }

    #[tokio::test]
    async fn test_pause_waits_for_cancel_acknowledge() {
        let sim = Vs1053Sim::new();
        sim.set_cancel_latency(3);
        let mut driver = sim.driver(ReadyGate::UNBOUNDED);
        driver.pause_playback().await.unwrap();

        let mode_reads: Vec<u16> = sim
            .events()
            .iter()
            .filter_map(|e| match *e {
                BusEvent::SciRead {
                    register: SciRegister::Mode,
                    value,
                    ..
                } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(mode_reads, vec![0x4808, 0x4808, 0x4808, 0x4800]);
    }

    #[tokio::test]
    async fn test_send_data_splits_into_gated_bursts() {
        let sim = Vs1053Sim::new();
        let mut driver = sim.driver(ReadyGate::UNBOUNDED);
        let data = [0xAAu8; 100];
        driver.send_data(&data).await.unwrap();

        let lens: Vec<usize> = sim
            .events()
            .iter()
            .filter_map(|e| match *e {
                BusEvent::SdiWrite { len, .. } => Some(len),
                _ => None,
            })
            .collect();
        assert_eq!(lens, vec![32, 32, 32, 4]);
        assert_eq!(sim.sdi_bytes(), data.to_vec());
    }

    #[tokio::test]
    async fn test_bounded_gate_reports_not_ready() {
        let sim = Vs1053Sim::new();
        sim.hold_dreq_low();
        let mut driver = sim.driver(ReadyGate::bounded(5));
        let result = driver.write_register(SciRegister::Mode, 0x4800).await;
        assert_eq!(result, Err(DecoderError::NotReady { polls: 5 }));
        assert!(sim.events().is_empty());
    }
}
