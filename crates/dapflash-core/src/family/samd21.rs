//! Microchip SAM D21 class (SAM D09/D10/D11/D20/D21, R21, C21, L21, R30)
//!
//! Flash is written a 256-byte row at a time with automatic page writes.
//! Region lock bits survive a chip erase, so every row is preceded by an
//! unlock-region command.

use log::{debug, info};

use super::sam::{self, USER_ROW_ADDR};
use super::user_row::{NvmWriteMode, UserRow, USER_ROW_SIZE};
use crate::dap::DebugTarget;
use crate::device::{DeviceInfo, DeviceRecord};
use crate::error::Result;
use crate::family::Family;
use crate::flash::{
    check_aligned, check_bounds, program_chunks, ChunkProgrammer, FlashSession, FlashTarget,
    TargetState,
};
use crate::probe::SwdProbe;

const FLASH_START: u32 = 0;
const ROW_SIZE: usize = 256;

const NVMCTRL_CTRLA: u32 = 0x4100_4000;
const NVMCTRL_CTRLB: u32 = 0x4100_4004;
const NVMCTRL_INTFLAG: u32 = 0x4100_4014;
const NVMCTRL_ADDR: u32 = 0x4100_401C;

const CTRLB_MANW: u32 = 1 << 7;
const INTFLAG_READY: u32 = 1 << 0;

const CMD_WAP: u32 = 0xA506;
const CMD_EAR: u32 = 0xA505;
const CMD_UR: u32 = 0xA541;
const CMD_PBC: u32 = 0xA544;

/// Word 0 bits 2:0; all ones means no bootloader protection
const BOOTPROT_MASK: u32 = 0x0000_0007;
/// Word 1 bits 31:16; a set bit leaves its region unlocked
const LOCK_MASK: u32 = 0xFFFF_0000;

/// Known parts, keyed by DSU DID
pub static SAMD21_DEVICES: &[DeviceRecord] = &[
    DeviceRecord::new(0x1004_0100, "SAM D09D14A", 16 * 1024, 256),
    DeviceRecord::new(0x1004_0107, "SAM D09C13A", 8 * 1024, 128),
    DeviceRecord::new(0x1002_0100, "SAM D10D14AM", 16 * 1024, 256),
    DeviceRecord::new(0x1003_0100, "SAM D11D14A", 16 * 1024, 256),
    DeviceRecord::new(0x1003_0000, "SAM D11D14AM", 16 * 1024, 256),
    DeviceRecord::new(0x1003_0003, "SAM D11D14AS", 16 * 1024, 256),
    DeviceRecord::new(0x1003_0103, "SAM D11D14AS (Rev B)", 16 * 1024, 256),
    DeviceRecord::new(0x1003_0006, "SAM D11C14A", 16 * 1024, 256),
    DeviceRecord::new(0x1003_0106, "SAM D11C14A (Rev B)", 16 * 1024, 256),
    DeviceRecord::new(0x1000_120D, "SAM D20E15A", 32 * 1024, 512),
    DeviceRecord::new(0x1000_140A, "SAM D20E18A", 256 * 1024, 4096),
    DeviceRecord::new(0x1000_1100, "SAM D20J18A", 256 * 1024, 4096),
    DeviceRecord::new(0x1000_1200, "SAM D20J18A (Rev C)", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0100, "SAM D21J18A", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0200, "SAM D21J18A (Rev C)", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0300, "SAM D21J18A (Rev D)", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_020D, "SAM D21E15A (Rev C)", 32 * 1024, 512),
    DeviceRecord::new(0x1001_030A, "SAM D21E18A", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0205, "SAM D21G18A", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0305, "SAM D21J18A (Rev D)", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0019, "SAM R21G18 ES", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0119, "SAM R21G18", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0219, "SAM R21G18A (Rev C)", 256 * 1024, 4096),
    DeviceRecord::new(0x1001_0319, "SAM R21G18A (Rev D)", 256 * 1024, 4096),
    DeviceRecord::new(0x1101_0100, "SAM C21J18A ES", 256 * 1024, 4096),
    DeviceRecord::new(0x1081_0219, "SAM L21E18B", 256 * 1024, 4096),
    DeviceRecord::new(0x1081_0000, "SAM L21J18A", 256 * 1024, 4096),
    DeviceRecord::new(0x1081_010F, "SAM L21J18B (Rev B)", 256 * 1024, 4096),
    DeviceRecord::new(0x1081_020F, "SAM L21J18B (Rev C)", 256 * 1024, 4096),
    DeviceRecord::new(0x1081_021E, "SAM R30G18A", 256 * 1024, 4096),
    DeviceRecord::new(0x1081_021F, "SAM R30E18A", 256 * 1024, 4096),
];

/// Issue an NVMCTRL command and wait for it to complete
fn nvm_command<P: SwdProbe + ?Sized>(dap: &mut DebugTarget<'_, P>, cmd: u32) -> Result<()> {
    dap.write_word(NVMCTRL_CTRLA, cmd)?;
    dap.wait_bits("NVM command", NVMCTRL_INTFLAG, INTFLAG_READY)
}

/// SAM D21 flash target
pub struct Samd21<'a, P: SwdProbe + ?Sized> {
    dap: DebugTarget<'a, P>,
    state: TargetState,
}

impl<'a, P: SwdProbe + ?Sized> Samd21<'a, P> {
    /// Wrap a debug link
    pub fn new(dap: DebugTarget<'a, P>) -> Self {
        Self {
            dap,
            state: TargetState::Disconnected,
        }
    }

    /// Read the first 64 bytes of the user row
    pub fn fuse_read(&mut self) -> Result<UserRow> {
        self.state.require_selected("read fuses")?;
        sam::check_unlocked(&self.dap)?;
        let bytes = self.dap.read_block(USER_ROW_ADDR, USER_ROW_SIZE)?;
        Ok(UserRow::from_slice(&bytes))
    }

    /// Erase the user row and write `row` in manual page-write mode
    pub fn fuse_write(&mut self, row: &UserRow) -> Result<()> {
        self.state.require_selected("write fuses")?;
        row.validate()?;
        sam::check_unlocked(&self.dap)?;

        let mut nvm = NvmWriteMode::enter(&mut self.dap, NVMCTRL_CTRLB, |v| v | CTRLB_MANW)?;
        nvm.write_word(NVMCTRL_ADDR, USER_ROW_ADDR >> 1)?;
        nvm_command(&mut *nvm, CMD_EAR)?;
        nvm_command(&mut *nvm, CMD_PBC)?;
        nvm.write_block(USER_ROW_ADDR, row.as_bytes())?;
        nvm_command(&mut *nvm, CMD_WAP)?;
        Ok(())
    }

    /// Clear bootloader protection and region locks
    ///
    /// The row is only rewritten when something changes. Returns true if it
    /// was written.
    pub fn reset_fuses(&mut self) -> Result<bool> {
        let current = self.fuse_read()?;
        let mut row = current.clone();
        row.set_word(0, row.word(0) | BOOTPROT_MASK);
        row.set_word(1, row.word(1) | LOCK_MASK);

        if row == current {
            debug!("fuses already at defaults");
            return Ok(false);
        }
        info!(
            "Resetting fuses: 0x{:08X} 0x{:08X} -> 0x{:08X} 0x{:08X}",
            current.word(0),
            current.word(1),
            row.word(0),
            row.word(1)
        );
        self.fuse_write(&row)?;
        Ok(true)
    }
}

impl<P: SwdProbe + ?Sized> FlashTarget for Samd21<'_, P> {
    fn family(&self) -> Family {
        Family::Samd21
    }

    fn state(&self) -> TargetState {
        self.state
    }

    fn device(&self) -> Option<&DeviceInfo> {
        self.dap.device()
    }

    fn target_connect(&mut self, clock_hz: u32) -> Result<()> {
        self.dap.connect(clock_hz)?;
        self.state = TargetState::Connected;
        Ok(())
    }

    fn select(&mut self) -> Result<Option<DeviceInfo>> {
        self.state.require_connected("select")?;
        let device = sam::select(&mut self.dap, Family::Samd21, SAMD21_DEVICES)?;
        if device.is_some() {
            self.state = TargetState::Selected;
        }
        Ok(device)
    }

    fn deselect(&mut self) -> Result<()> {
        self.state.require_selected("deselect")?;
        self.dap.release_core()?;
        self.dap.set_device(None);
        self.state = TargetState::Deselected;
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        self.state.require_selected("erase")?;
        sam::chip_erase(&mut self.dap)?;
        self.state = TargetState::Selected;
        Ok(())
    }

    fn program_start(&mut self, offset: u32, size: u32) -> Result<u32> {
        self.state.require_selected("start programming")?;
        sam::check_unlocked(&self.dap)?;
        check_bounds(self.dap.device(), offset, size)?;

        // Automatic page write: a page commits when its last word lands
        let ctrlb = self.dap.read_word(NVMCTRL_CTRLB)?;
        self.dap.write_word(NVMCTRL_CTRLB, ctrlb & !CTRLB_MANW)?;

        let base = FLASH_START + offset;
        self.state = TargetState::Programming(FlashSession {
            base,
            size,
            page_size: ROW_SIZE as u32,
        });
        Ok(base)
    }

    fn program_flash(&mut self, addr: u32, buf: &[u8], verify: bool) -> Result<()> {
        self.state.require_session("program")?;
        // Lock regions are cleared per row, so a chunk must not straddle rows
        check_aligned(addr, ROW_SIZE as u32)?;
        let stats = program_chunks(self, addr, buf, verify)?;
        debug!(
            "0x{:08X}: {} rows written, {} blank",
            addr, stats.written, stats.skipped
        );
        Ok(())
    }

    fn read_flash(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_selected("read")?;
        self.dap.read_block(addr, len)
    }
}

impl<P: SwdProbe + ?Sized> ChunkProgrammer for Samd21<'_, P> {
    fn program_unit(&self) -> usize {
        ROW_SIZE
    }

    fn write_chunk(&mut self, addr: u32, chunk: &[u8]) -> Result<()> {
        self.dap.write_word(NVMCTRL_ADDR, addr >> 1)?;
        nvm_command(&mut self.dap, CMD_UR)?;
        self.dap.write_block(addr, chunk)
    }

    fn wait_ready(&mut self, _addr: u32) -> Result<()> {
        self.dap
            .wait_bits("NVM ready", NVMCTRL_INTFLAG, INTFLAG_READY)
    }

    fn read_back(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.dap.read_block(addr, len)
    }
}
