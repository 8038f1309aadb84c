//! dapflash-dummy - Simulated SWD target for testing
//!
//! [`DummySwd`] implements [`SwdProbe`] against an in-memory model of a
//! Cortex-M debug port: the line-reset handshake, power-up acknowledge,
//! sticky errors, the posted-read pipeline and TAR auto-increment with its
//! 1 KiB wrap. Behind the MEM-AP sits a model of one chip's NVM controller
//! (nRF52 NVMC, SAM D21 NVMCTRL + DSU, SAM D5x NVMCTRL + DSU, or the
//! STM32F4 ID registers), so the real family code can be driven end to end.

mod memory;
mod nrf;
mod sam;
mod samd21;
mod samx5;
mod stm32;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use dapflash_core::dap::regs::{ap, dp, Abort, CtrlStat, TAR_WRAP};
use dapflash_core::probe::{Ack, PinDrive, Pins, ProbeError, ProbeResult, SwdProbe};
use log::trace;

pub use memory::FlashArray;

/// DPIDR reported by the simulated debug port (ARM DPv1)
pub const DEFAULT_DPIDR: u32 = 0x0BC1_1477;

/// Line sequence that brings the simulated DP out of reset
const ACTIVATION: [(u8, u64); 4] = [
    (51, (1 << 51) - 1),
    (16, 0xE79E),
    (51, (1 << 51) - 1),
    (8, 0),
];

/// Which chip model sits behind the debug port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DummyChip {
    /// nRF52 with NVMC, FICR and UICR
    Nrf5x,
    /// SAM D21 with NVMCTRL and DSU
    Samd21,
    /// SAM D51 with NVMCTRL and DSU
    Samx5,
    /// STM32F4 identification registers
    Stm32,
}

impl FromStr for DummyChip {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nrf5x" | "nrf52" => Ok(DummyChip::Nrf5x),
            "samd21" => Ok(DummyChip::Samd21),
            "samx5" | "samd51" => Ok(DummyChip::Samx5),
            "stm32" => Ok(DummyChip::Stm32),
            _ => Err(format!("unknown dummy chip '{}'", s)),
        }
    }
}

impl fmt::Display for DummyChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DummyChip::Nrf5x => "nrf5x",
            DummyChip::Samd21 => "samd21",
            DummyChip::Samx5 => "samx5",
            DummyChip::Stm32 => "stm32",
        };
        f.write_str(s)
    }
}

/// Configuration for the simulated target
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Chip model
    pub chip: DummyChip,
    /// Value of the family's ID register (INFO.PART, DSU DID or DBGMCU_IDCODE)
    pub device_id: u32,
    /// Main flash size in bytes
    pub flash_size: usize,
    /// Security bit set (SAM only)
    pub locked: bool,
    /// Whether the debug and system domains acknowledge power-up
    pub powered: bool,
    /// Initial user row contents (SAM only); factory defaults when `None`
    pub user_row: Option<Vec<u8>>,
    /// DP IDCODE
    pub dpidr: u32,
}

impl DummyConfig {
    /// nRF52840, 1 MiB
    pub fn nrf52840() -> Self {
        Self::new(DummyChip::Nrf5x, 0x52840, 1024 * 1024)
    }

    /// SAM D21J18A rev D, 256 KiB
    pub fn samd21() -> Self {
        Self::new(DummyChip::Samd21, 0x1001_0305, 256 * 1024)
    }

    /// SAM D51J19A, 512 KiB
    pub fn samd51() -> Self {
        Self::new(DummyChip::Samx5, 0x6006_0005, 512 * 1024)
    }

    /// STM32F405, 1 MiB
    pub fn stm32f405() -> Self {
        Self::new(DummyChip::Stm32, 0x1000_6413, 1024 * 1024)
    }

    /// Default configuration for `chip`
    pub fn for_chip(chip: DummyChip) -> Self {
        match chip {
            DummyChip::Nrf5x => Self::nrf52840(),
            DummyChip::Samd21 => Self::samd21(),
            DummyChip::Samx5 => Self::samd51(),
            DummyChip::Stm32 => Self::stm32f405(),
        }
    }

    fn new(chip: DummyChip, device_id: u32, flash_size: usize) -> Self {
        Self {
            chip,
            device_id,
            flash_size,
            locked: false,
            powered: true,
            user_row: None,
            dpidr: DEFAULT_DPIDR,
        }
    }
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self::nrf52840()
    }
}

/// Memory-mapped behaviour of one chip model
pub(crate) trait Peripheral {
    /// Handle a bus read, or `None` if the address isn't decoded here
    fn read(&mut self, addr: u32) -> Option<Result<u32, Ack>>;

    /// Handle a bus write, or `None` if the address isn't decoded here
    fn write(&mut self, addr: u32, value: u32) -> Option<Result<(), Ack>>;

    /// Whether `addr` is non-volatile memory
    fn is_flash(&self, addr: u32) -> bool;

    /// Main flash array
    fn flash(&self) -> &FlashArray;

    /// User row / UICR, where the chip has one
    fn config_row(&self) -> Option<&FlashArray> {
        None
    }

    /// Whether the access is refused by chip security
    fn blocked(&self, _addr: u32) -> bool {
        false
    }

    /// Whether the CPU is held in reset extension
    fn core_in_reset(&self) -> bool {
        false
    }

    /// nRESET released; `extended` when SWCLK was held low at the time
    fn hardware_reset(&mut self, _extended: bool) {}
}

fn build_chip(config: &DummyConfig) -> Box<dyn Peripheral> {
    match config.chip {
        DummyChip::Nrf5x => Box::new(nrf::NrfChip::new(config)),
        DummyChip::Samd21 => Box::new(samd21::Samd21Chip::new(config)),
        DummyChip::Samx5 => Box::new(samx5::Samx5Chip::new(config)),
        DummyChip::Stm32 => Box::new(stm32::Stm32Chip::new(config)),
    }
}

/// Simulated SWD probe with a target attached
pub struct DummySwd {
    config: DummyConfig,
    chip: Box<dyn Peripheral>,
    /// Backing store for addresses no peripheral decodes
    ram: HashMap<u32, u32>,
    connected: bool,
    clock_hz: u32,
    swj_log: Vec<(u8, u64)>,
    line_active: bool,
    select: u32,
    ctrl_stat: u32,
    sticky_err: bool,
    csw: u32,
    tar: u32,
    rdbuff: u32,
    bus_writes: Vec<(u32, u32)>,
    flash_writes: usize,
    pins: Pins,
    resets: usize,
}

impl DummySwd {
    /// Create a simulated target
    pub fn new(config: DummyConfig) -> Self {
        let chip = build_chip(&config);
        Self {
            config,
            chip,
            ram: HashMap::new(),
            connected: false,
            clock_hz: 0,
            swj_log: Vec::new(),
            line_active: false,
            select: 0,
            ctrl_stat: 0,
            sticky_err: false,
            csw: 0,
            tar: 0,
            rdbuff: 0,
            bus_writes: Vec::new(),
            flash_writes: 0,
            pins: Pins::all(),
            resets: 0,
        }
    }

    /// Configuration the target was built with
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Main flash contents
    pub fn flash(&self) -> &[u8] {
        self.chip.flash().data()
    }

    /// User row or UICR contents
    pub fn config_row(&self) -> Option<&[u8]> {
        self.chip.config_row().map(FlashArray::data)
    }

    /// Every SWJ sequence sent since creation
    pub fn swj_log(&self) -> &[(u8, u64)] {
        &self.swj_log
    }

    /// Every memory write that reached the bus, in order
    pub fn bus_writes(&self) -> &[(u32, u32)] {
        &self.bus_writes
    }

    /// Number of bus writes that landed in non-volatile memory
    pub fn flash_writes(&self) -> usize {
        self.flash_writes
    }

    /// Forget logged bus writes
    pub fn clear_log(&mut self) {
        self.bus_writes.clear();
        self.flash_writes = 0;
    }

    /// Times the hardware reset line was pulsed
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// Whether the CPU is still held in reset extension
    pub fn core_in_reset(&self) -> bool {
        self.chip.core_in_reset()
    }

    /// Last configured SWCLK frequency
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    fn check_link(&self) -> ProbeResult<()> {
        if !self.connected {
            return Err(ProbeError::Transport("probe not connected".into()));
        }
        if !self.line_active {
            return Err(ProbeError::Ack(Ack::NoResponse));
        }
        Ok(())
    }

    fn check_ap(&self) -> ProbeResult<()> {
        self.check_link()?;
        let powered = CtrlStat::from_bits_retain(self.ctrl_stat_value())
            .contains(CtrlStat::CDBGPWRUPACK);
        if self.sticky_err || !powered || self.select != 0 {
            return Err(ProbeError::Ack(Ack::Fault));
        }
        Ok(())
    }

    fn ctrl_stat_value(&self) -> u32 {
        let mut value = self.ctrl_stat;
        if self.config.powered {
            // Each ACK bit sits just above its REQ bit
            value |= (value & CtrlStat::POWER_UP_REQ.bits()) << 1;
        }
        if self.sticky_err {
            value |= CtrlStat::STICKYERR.bits();
        }
        value
    }

    fn fault(&mut self) -> ProbeError {
        self.sticky_err = true;
        ProbeError::Ack(Ack::Fault)
    }

    fn advance_tar(&mut self) {
        if self.csw & 0x30 == 0x10 {
            let next = (self.tar % TAR_WRAP + 4) % TAR_WRAP;
            self.tar = self.tar - self.tar % TAR_WRAP + next;
        }
    }

    fn bus_read(&mut self, addr: u32) -> ProbeResult<u32> {
        if self.chip.blocked(addr) {
            return Err(self.fault());
        }
        match self.chip.read(addr) {
            Some(Ok(value)) => Ok(value),
            Some(Err(_)) => Err(self.fault()),
            None => Ok(self.ram.get(&addr).copied().unwrap_or(0)),
        }
    }

    fn bus_write(&mut self, addr: u32, value: u32) -> ProbeResult<()> {
        if self.chip.blocked(addr) {
            return Err(self.fault());
        }
        trace!("dummy bus write 0x{:08X} <- 0x{:08X}", addr, value);
        self.bus_writes.push((addr, value));
        if self.chip.is_flash(addr) {
            self.flash_writes += 1;
        }
        match self.chip.write(addr, value) {
            Some(Ok(())) => Ok(()),
            Some(Err(_)) => Err(self.fault()),
            None => {
                self.ram.insert(addr, value);
                Ok(())
            }
        }
    }
}

impl SwdProbe for DummySwd {
    fn connect(&mut self) -> ProbeResult<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> ProbeResult<()> {
        self.connected = false;
        self.line_active = false;
        Ok(())
    }

    fn set_clock(&mut self, hz: u32) -> ProbeResult<()> {
        self.clock_hz = hz;
        Ok(())
    }

    fn swj_sequence(&mut self, bit_count: u8, bits: u64) -> ProbeResult<()> {
        if !self.connected {
            return Err(ProbeError::Transport("probe not connected".into()));
        }
        self.swj_log.push((bit_count, bits));
        self.line_active = self.swj_log.ends_with(&ACTIVATION);
        Ok(())
    }

    fn read_dp(&mut self, reg: u8) -> ProbeResult<u32> {
        self.check_link()?;
        match reg {
            dp::IDCODE => Ok(self.config.dpidr),
            dp::CTRL_STAT => Ok(self.ctrl_stat_value()),
            dp::RESEND | dp::RDBUFF => Ok(self.rdbuff),
            _ => Err(ProbeError::Ack(Ack::Fault)),
        }
    }

    fn write_dp(&mut self, reg: u8, value: u32) -> ProbeResult<()> {
        self.check_link()?;
        match reg {
            dp::ABORT => {
                if value & Abort::STKERRCLR.bits() != 0 {
                    self.sticky_err = false;
                }
            }
            dp::CTRL_STAT => self.ctrl_stat = value & !CtrlStat::POWER_UP_ACK.bits(),
            dp::SELECT => self.select = value,
            _ => return Err(ProbeError::Ack(Ack::Fault)),
        }
        Ok(())
    }

    fn read_ap(&mut self, reg: u8) -> ProbeResult<u32> {
        self.check_ap()?;
        match reg {
            ap::CSW => Ok(self.csw),
            ap::TAR => Ok(self.tar),
            ap::DRW => {
                let posted = self.rdbuff;
                self.rdbuff = self.bus_read(self.tar)?;
                self.advance_tar();
                Ok(posted)
            }
            _ => Ok(0),
        }
    }

    fn write_ap(&mut self, reg: u8, value: u32) -> ProbeResult<()> {
        self.check_ap()?;
        match reg {
            ap::CSW => self.csw = value,
            ap::TAR => self.tar = value,
            ap::DRW => {
                self.bus_write(self.tar, value)?;
                self.advance_tar();
            }
            _ => {}
        }
        Ok(())
    }

    fn write_pins(&mut self, mask: Pins, _drive: PinDrive, value: Pins) -> ProbeResult<()> {
        let previous = self.pins;
        self.pins = (self.pins - mask) | (value & mask);
        let released = !previous.contains(Pins::NRESET) && self.pins.contains(Pins::NRESET);
        if released {
            let extended = !self.pins.contains(Pins::SWCLK);
            self.chip.hardware_reset(extended);
        }
        Ok(())
    }

    fn reset(&mut self) -> ProbeResult<()> {
        self.resets += 1;
        self.line_active = false;
        self.chip.hardware_reset(false);
        Ok(())
    }
}
