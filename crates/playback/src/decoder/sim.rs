//! Register-level VS1053b bus simulator for host builds.
//!
//! [`Vs1053Sim`] hands out an SPI bus, four GPIO lines and a delay that all
//! share one simulated chip. The chip decodes SCI frames byte by byte while
//! XCS is low, counts SDI bytes while XDCS is low, keeps a register file, and
//! logs every completed transaction as a [`BusEvent`] with the SPI clock that
//! was in effect.
//!
//! Modelled behaviour:
//! - DREQ is low while XRESET is held low, otherwise follows the script from
//!   [`Vs1053Sim::script_dreq`] and then the idle level
//! - SM_CANCEL reads back set for [`Vs1053Sim::set_cancel_latency`] reads
//!   after it is written, then clears itself
//! - SM_RESET clears itself immediately
//! - a hardware reset restores the power-on register file

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal_async::delay::DelayNs;
use platform::{SpiConfig, SpiPeripheral};

use super::registers::{ModeRegister, SciRegister, OPCODE_READ, OPCODE_WRITE};
use super::vs1053b::{ControlPins, Vs1053b};
use crate::config::{ReadyGate, SDI_BURST_LEN};

/// SCI_MODE after power-on or hardware reset (SM_SDINEW).
const POWER_ON_MODE: u16 = 0x0800;

const SM_RESET: u16 = 1 << 2;
const SM_CANCEL: u16 = 1 << 3;

/// One completed bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// SPI clock changed
    Configure {
        /// New clock
        hz: u32,
    },
    /// Four-byte SCI write completed
    SciWrite {
        /// Target register
        register: SciRegister,
        /// Value written
        value: u16,
        /// SPI clock during the transfer
        hz: u32,
    },
    /// Four-byte SCI read completed
    SciRead {
        /// Source register
        register: SciRegister,
        /// Value clocked back
        value: u16,
        /// SPI clock during the transfer
        hz: u32,
    },
    /// SDI burst while XDCS was low
    SdiWrite {
        /// Bytes in the burst
        len: usize,
        /// SPI clock during the transfer
        hz: u32,
    },
    /// XRESET released after being held low
    HardwareReset,
    /// The host broke the bus protocol
    ProtocolViolation(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinRole {
    Reset,
    ControlSelect,
    DataSelect,
    DataRequest,
}

#[derive(Debug)]
struct SimState {
    events: Vec<BusEvent>,
    registers: [u16; 16],
    hz: u32,
    rst_high: bool,
    xcs_high: bool,
    xdcs_high: bool,
    sci_frame: Vec<u8>,
    sdi_burst: usize,
    wire: Vec<u8>,
    sdi_bytes: Vec<u8>,
    dreq_script: VecDeque<bool>,
    dreq_idle: bool,
    cancel_latency: u32,
    cancel_reads_left: u32,
    delayed_ns: u64,
}

#[allow(clippy::indexing_slicing)]
fn power_on_registers() -> [u16; 16] {
    let mut registers = [0u16; 16];
    registers[usize::from(SciRegister::Mode.addr())] = POWER_ON_MODE;
    registers
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            registers: power_on_registers(),
            hz: 0,
            rst_high: true,
            xcs_high: true,
            xdcs_high: true,
            sci_frame: Vec::new(),
            sdi_burst: 0,
            wire: Vec::new(),
            sdi_bytes: Vec::new(),
            dreq_script: VecDeque::new(),
            dreq_idle: true,
            cancel_latency: 0,
            cancel_reads_left: 0,
            delayed_ns: 0,
        }
    }
}

#[allow(clippy::indexing_slicing)] // register addresses are 4-bit
impl SimState {
    fn exchange(&mut self, mosi: u8) -> u8 {
        self.wire.push(mosi);
        match (self.xcs_high, self.xdcs_high) {
            (false, false) => {
                self.events
                    .push(BusEvent::ProtocolViolation("XCS and XDCS both low"));
                0
            }
            (false, true) => self.sci_byte(mosi),
            (true, false) => {
                self.sdi_burst = self.sdi_burst.saturating_add(1);
                self.sdi_bytes.push(mosi);
                0
            }
            (true, true) => {
                self.events
                    .push(BusEvent::ProtocolViolation("SPI traffic with no chip select"));
                0
            }
        }
    }

    fn sci_byte(&mut self, mosi: u8) -> u8 {
        self.sci_frame.push(mosi);
        let (opcode, addr) = match self.sci_frame.as_slice() {
            [op, addr, ..] => (*op, *addr),
            _ => return 0,
        };
        let Some(register) = SciRegister::from_addr(addr) else {
            self.events
                .push(BusEvent::ProtocolViolation("unmodelled SCI register"));
            return 0;
        };
        match (opcode, self.sci_frame.len()) {
            (OPCODE_READ, 3) => self.read_value(register).to_be_bytes()[0],
            (OPCODE_READ, 4) => {
                let value = self.read_value(register);
                self.complete_read(register, value);
                value.to_be_bytes()[1]
            }
            (OPCODE_WRITE, 4) => {
                let value = u16::from_be_bytes([self.sci_frame[2], self.sci_frame[3]]);
                self.complete_write(register, value);
                0
            }
            (OPCODE_READ | OPCODE_WRITE, _) => 0,
            _ => {
                self.events
                    .push(BusEvent::ProtocolViolation("unknown SCI opcode"));
                0
            }
        }
    }

    /// Value the chip will clock out for `register` in the current frame.
    fn read_value(&self, register: SciRegister) -> u16 {
        let value = self.registers[usize::from(register.addr())];
        if register == SciRegister::Mode && self.cancel_reads_left == 0 {
            return value & !SM_CANCEL;
        }
        value
    }

    fn complete_read(&mut self, register: SciRegister, value: u16) {
        if register == SciRegister::Mode {
            let stored = self.registers[usize::from(register.addr())];
            if ModeRegister::from_bits(stored).is_cancel_set() {
                if self.cancel_reads_left == 0 {
                    self.registers[usize::from(register.addr())] = value;
                } else {
                    self.cancel_reads_left = self.cancel_reads_left.saturating_sub(1);
                }
            }
        }
        self.events.push(BusEvent::SciRead {
            register,
            value,
            hz: self.hz,
        });
    }

    fn complete_write(&mut self, register: SciRegister, value: u16) {
        let mut stored = value;
        if register == SciRegister::Mode {
            stored &= !SM_RESET;
            if ModeRegister::from_bits(value).is_cancel_set() {
                self.cancel_reads_left = self.cancel_latency;
            }
        }
        self.registers[usize::from(register.addr())] = stored;
        self.events.push(BusEvent::SciWrite {
            register,
            value,
            hz: self.hz,
        });
    }

    fn set_pin(&mut self, role: PinRole, high: bool) {
        match role {
            PinRole::Reset => {
                if high && !self.rst_high {
                    self.registers = power_on_registers();
                    self.sci_frame.clear();
                    self.cancel_reads_left = 0;
                    self.events.push(BusEvent::HardwareReset);
                }
                self.rst_high = high;
            }
            PinRole::ControlSelect => {
                if !high && self.xcs_high {
                    self.sci_frame.clear();
                }
                if high && !self.xcs_high && !matches!(self.sci_frame.len(), 0 | 4) {
                    self.events
                        .push(BusEvent::ProtocolViolation("SCI frame not four bytes"));
                }
                self.xcs_high = high;
            }
            PinRole::DataSelect => {
                if !high && self.xdcs_high {
                    self.sdi_burst = 0;
                }
                if high && !self.xdcs_high {
                    self.finish_sdi_burst();
                }
                self.xdcs_high = high;
            }
            PinRole::DataRequest => {}
        }
    }

    fn finish_sdi_burst(&mut self) {
        if self.sdi_burst > SDI_BURST_LEN {
            self.events
                .push(BusEvent::ProtocolViolation("SDI burst longer than 32 bytes"));
        }
        self.events.push(BusEvent::SdiWrite {
            len: self.sdi_burst,
            hz: self.hz,
        });
    }

    fn dreq(&mut self) -> bool {
        if !self.rst_high {
            return false;
        }
        self.dreq_script.pop_front().unwrap_or(self.dreq_idle)
    }
}

/// Handle to one simulated VS1053b. Clones share the same chip.
#[derive(Debug, Clone, Default)]
pub struct Vs1053Sim {
    state: Rc<RefCell<SimState>>,
}

/// The driver wired to a simulator.
pub type SimDriver = Vs1053b<SimSpi, SimPin, SimPin, SimPin, SimPin, SimDelay>;

impl Vs1053Sim {
    /// Fresh chip: power-on registers, DREQ idle high, no cancel latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// SPI bus attached to this chip.
    pub fn spi(&self) -> SimSpi {
        SimSpi {
            state: Rc::clone(&self.state),
        }
    }

    /// XRESET, XCS, XDCS and DREQ lines attached to this chip.
    pub fn pins(&self) -> ControlPins<SimPin, SimPin, SimPin, SimPin> {
        let pin = |role| SimPin {
            role,
            state: Rc::clone(&self.state),
        };
        ControlPins {
            rst: pin(PinRole::Reset),
            xcs: pin(PinRole::ControlSelect),
            xdcs: pin(PinRole::DataSelect),
            dreq: pin(PinRole::DataRequest),
        }
    }

    /// Delay that only accumulates the requested time.
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: Rc::clone(&self.state),
        }
    }

    /// Driver wired to this chip.
    pub fn driver(&self, gate: ReadyGate) -> SimDriver {
        Vs1053b::new(self.spi(), self.pins(), self.delay(), gate)
    }

    /// Every transaction so far, in bus order.
    pub fn events(&self) -> Vec<BusEvent> {
        self.state.borrow().events.clone()
    }

    /// Forget recorded transactions and wire bytes.
    pub fn clear_events(&self) {
        let mut state = self.state.borrow_mut();
        state.events.clear();
        state.wire.clear();
        state.sdi_bytes.clear();
    }

    /// Every MOSI byte so far, both interfaces.
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.state.borrow().wire.clone()
    }

    /// Every byte streamed over SDI so far.
    pub fn sdi_bytes(&self) -> Vec<u8> {
        self.state.borrow().sdi_bytes.clone()
    }

    /// Current register contents.
    #[allow(clippy::indexing_slicing)]
    pub fn register(&self, register: SciRegister) -> u16 {
        self.state.borrow().registers[usize::from(register.addr())]
    }

    /// Preload a register, e.g. SCI_DECODE_TIME or SCI_STATUS.
    #[allow(clippy::indexing_slicing)]
    pub fn set_register(&self, register: SciRegister, value: u16) {
        self.state.borrow_mut().registers[usize::from(register.addr())] = value;
    }

    /// SM_CANCEL reads back set this many times before it clears.
    pub fn set_cancel_latency(&self, reads: u32) {
        self.state.borrow_mut().cancel_latency = reads;
    }

    /// Queue DREQ samples; each `is_high` consumes one.
    pub fn script_dreq(&self, levels: &[bool]) {
        self.state.borrow_mut().dreq_script.extend(levels.iter().copied());
    }

    /// DREQ stays low once the script runs out.
    pub fn hold_dreq_low(&self) {
        self.state.borrow_mut().dreq_idle = false;
    }

    /// DREQ idles high once the script runs out.
    pub fn release_dreq(&self) {
        self.state.borrow_mut().dreq_idle = true;
    }

    /// Total time requested from the delay, in nanoseconds.
    pub fn delayed_ns(&self) -> u64 {
        self.state.borrow().delayed_ns
    }
}

/// SPI bus half of the simulator.
#[derive(Debug)]
pub struct SimSpi {
    state: Rc<RefCell<SimState>>,
}

impl SpiPeripheral for SimSpi {
    type Error = Infallible;

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        for (rx, tx) in read.iter_mut().zip(write) {
            *rx = state.exchange(*tx);
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        for byte in data {
            state.exchange(*byte);
        }
        Ok(())
    }

    fn configure(&mut self, config: SpiConfig) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.hz = config.frequency;
        state.events.push(BusEvent::Configure {
            hz: config.frequency,
        });
        Ok(())
    }
}

/// One GPIO line of the simulator.
#[derive(Debug)]
pub struct SimPin {
    role: PinRole,
    state: Rc<RefCell<SimState>>,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().set_pin(self.role, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().set_pin(self.role, true);
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let mut state = self.state.borrow_mut();
        Ok(match self.role {
            PinRole::DataRequest => state.dreq(),
            PinRole::Reset => state.rst_high,
            PinRole::ControlSelect => state.xcs_high,
            PinRole::DataSelect => state.xdcs_high,
        })
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Delay half of the simulator; returns immediately.
#[derive(Debug)]
pub struct SimDelay {
    state: Rc<RefCell<SimState>>,
}

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        let mut state = self.state.borrow_mut();
        state.delayed_ns = state.delayed_ns.saturating_add(u64::from(ns));
    }
}
