//! Microchip SAM D51 / SAM E5x
//!
//! Same DSU as the D21, but a different NVMCTRL: commands go to CTRLB,
//! readiness is STATUS.READY, pages are 512 bytes and the user row is
//! written one quad-word at a time.

use log::{debug, info};

use super::sam::{self, USER_ROW_ADDR};
use super::user_row::{NvmWriteMode, UserRow, USER_ROW_SIZE};
use crate::dap::DebugTarget;
use crate::device::{DeviceInfo, DeviceRecord};
use crate::error::Result;
use crate::family::Family;
use crate::flash::{
    check_aligned, check_bounds, is_erased, program_chunks, ChunkProgrammer, FlashSession,
    FlashTarget, TargetState,
};
use crate::probe::SwdProbe;

const FLASH_START: u32 = 0;
const PAGE_SIZE: usize = 512;
const QUAD_WORD: usize = 16;
/// Quad-words always rewritten after a user page erase
const USER_ROW_QUADS: usize = 16;

const NVMCTRL_CTRLA: u32 = 0x4100_4000;
const NVMCTRL_CTRLB: u32 = 0x4100_4004;
/// INTFLAG in the low half, STATUS in the high half
const NVMCTRL_INTFLAG_STATUS: u32 = 0x4100_4010;
const NVMCTRL_ADDR: u32 = 0x4100_4014;

const CTRLA_WMODE_MASK: u32 = 0x3 << 4;
const CTRLA_WMODE_MAN: u32 = 0x0 << 4;
const STATUS_READY: u32 = 1 << 16;

const CMD_KEY: u32 = 0xA5 << 8;
const CMD_EP: u32 = CMD_KEY | 0x00;
const CMD_WP: u32 = CMD_KEY | 0x03;
const CMD_WQW: u32 = CMD_KEY | 0x04;
const CMD_UR: u32 = CMD_KEY | 0x12;
const CMD_PBC: u32 = CMD_KEY | 0x15;
const CMD_SBPDIS: u32 = CMD_KEY | 0x1A;

/// Word 0 bits 29:26; all ones means no bootloader protection
const BOOTPROT_MASK: u32 = 0xF << 26;
/// Word 2 holds one unlock bit per region
const LOCK_WORD: usize = 2;

/// Factory user row contents, first two words
pub const FACTORY_USER_ROW: [u8; 8] = [0x39, 0x92, 0x9A, 0xFE, 0x80, 0xFF, 0xEC, 0xAE];

/// Known parts, keyed by DSU DID
pub static SAMX5_DEVICES: &[DeviceRecord] = &[
    DeviceRecord::new(0x6006_0000, "SAM D51P20A", 1024 * 1024, 8192),
    DeviceRecord::new(0x6006_0001, "SAM D51P19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6006_0002, "SAM D51N20A", 1024 * 1024, 8192),
    DeviceRecord::new(0x6006_0003, "SAM D51N19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6006_0004, "SAM D51J20A", 1024 * 1024, 8192),
    DeviceRecord::new(0x6006_0005, "SAM D51J19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6006_0006, "SAM D51J18A", 256 * 1024, 8192),
    DeviceRecord::new(0x6006_0007, "SAM D51G19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6006_0008, "SAM D51G18A", 256 * 1024, 8192),
    DeviceRecord::new(0x6006_3006, "SAM D51J18A (Rev D)", 256 * 1024, 8192),
    DeviceRecord::new(0x6006_3005, "SAM D51J19A (Rev D)", 512 * 1024, 8192),
    DeviceRecord::new(0x6006_3007, "SAM D51G19A (Rev D)", 512 * 1024, 8192),
    DeviceRecord::new(0x6184_0000, "SAM E54P20A", 1024 * 1024, 8192),
    DeviceRecord::new(0x6184_0001, "SAM E54P19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6184_0002, "SAM E54N20A", 1024 * 1024, 8192),
    DeviceRecord::new(0x6184_0003, "SAM E54N19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6181_0002, "SAM E51N20A", 1024 * 1024, 8192),
    DeviceRecord::new(0x6181_0003, "SAM E51N19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6181_0004, "SAM E51J19A", 512 * 1024, 8192),
    DeviceRecord::new(0x6181_0005, "SAM E51J18A", 256 * 1024, 8192),
    DeviceRecord::new(0x6181_0006, "SAM E51J20A", 1024 * 1024, 8192),
];

fn nvm_command<P: SwdProbe + ?Sized>(dap: &mut DebugTarget<'_, P>, cmd: u32) -> Result<()> {
    dap.write_word(NVMCTRL_CTRLB, cmd)?;
    wait_nvm(dap)
}

fn wait_nvm<P: SwdProbe + ?Sized>(dap: &mut DebugTarget<'_, P>) -> Result<()> {
    dap.wait_bits("NVM ready", NVMCTRL_INTFLAG_STATUS, STATUS_READY)
}

fn manual_write_mode(ctrla: u32) -> u32 {
    (ctrla & !CTRLA_WMODE_MASK) | CTRLA_WMODE_MAN
}

/// SAM D5x/E5x flash target
pub struct Samx5<'a, P: SwdProbe + ?Sized> {
    dap: DebugTarget<'a, P>,
    state: TargetState,
}

impl<'a, P: SwdProbe + ?Sized> Samx5<'a, P> {
    /// Wrap a debug link
    pub fn new(dap: DebugTarget<'a, P>) -> Self {
        Self {
            dap,
            state: TargetState::Disconnected,
        }
    }

    /// Read the user row, repairing a half-erased mirror
    pub fn fuse_read(&mut self) -> Result<UserRow> {
        self.state.require_selected("read fuses")?;
        sam::check_unlocked(&self.dap)?;
        let bytes = self.dap.read_block(USER_ROW_ADDR, USER_ROW_SIZE)?;
        let mut row = UserRow::from_slice(&bytes);
        row.recover_mirrored(&FACTORY_USER_ROW);
        Ok(row)
    }

    /// Erase the user page and commit `row` as quad-word writes
    ///
    /// Page erase clears all 512 bytes, so the page is read first and only
    /// the leading [`USER_ROW_SIZE`] bytes are replaced. The first 16
    /// quad-words are always written back; later ones only if not blank.
    pub fn fuse_write(&mut self, row: &UserRow) -> Result<()> {
        self.state.require_selected("write fuses")?;
        row.validate()?;
        sam::check_unlocked(&self.dap)?;

        let mut page = self.dap.read_block(USER_ROW_ADDR, PAGE_SIZE)?;
        page[..USER_ROW_SIZE].copy_from_slice(row.as_bytes());

        let mut nvm = NvmWriteMode::enter(&mut self.dap, NVMCTRL_CTRLA, manual_write_mode)?;
        nvm.write_word(NVMCTRL_ADDR, USER_ROW_ADDR)?;
        nvm_command(&mut *nvm, CMD_EP)?;

        for (i, quad) in page.chunks(QUAD_WORD).enumerate() {
            if i >= USER_ROW_QUADS && is_erased(quad) {
                continue;
            }
            let addr = USER_ROW_ADDR + (i * QUAD_WORD) as u32;
            nvm_command(&mut *nvm, CMD_PBC)?;
            nvm.write_block(addr, quad)?;
            nvm.write_word(NVMCTRL_ADDR, addr)?;
            nvm_command(&mut *nvm, CMD_WQW)?;
        }
        Ok(())
    }

    /// Clear bootloader protection and region locks in both mirror halves
    ///
    /// Returns true if the row was written.
    pub fn reset_fuses(&mut self) -> Result<bool> {
        let current = self.fuse_read()?;
        let mut row = current.clone();
        let half_words = USER_ROW_SIZE / 2 / 4;
        for base in [0, half_words] {
            row.set_word(base, row.word(base) | BOOTPROT_MASK);
            row.set_word(base + LOCK_WORD, u32::MAX);
        }

        if row == current {
            debug!("fuses already at defaults");
            return Ok(false);
        }
        info!(
            "Resetting fuses: BOOTPROT 0x{:X}, LOCK 0x{:08X}",
            (current.word(0) & BOOTPROT_MASK) >> 26,
            current.word(LOCK_WORD)
        );
        self.fuse_write(&row)?;
        Ok(true)
    }
}

impl<P: SwdProbe + ?Sized> FlashTarget for Samx5<'_, P> {
    fn family(&self) -> Family {
        Family::Samx5
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
        let device = sam::select(&mut self.dap, Family::Samx5, SAMX5_DEVICES)?;
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

        // Bootloader protection comes back on the next reset
        nvm_command(&mut self.dap, CMD_SBPDIS)?;
        let ctrla = self.dap.read_word(NVMCTRL_CTRLA)?;
        self.dap.write_word(NVMCTRL_CTRLA, manual_write_mode(ctrla))?;

        let base = FLASH_START + offset;
        self.state = TargetState::Programming(FlashSession {
            base,
            size,
            page_size: PAGE_SIZE as u32,
        });
        Ok(base)
    }

    fn program_flash(&mut self, addr: u32, buf: &[u8], verify: bool) -> Result<()> {
        self.state.require_session("program")?;
        check_aligned(addr, PAGE_SIZE as u32)?;
        let stats = program_chunks(self, addr, buf, verify)?;
        debug!(
            "0x{:08X}: {} pages written, {} blank",
            addr, stats.written, stats.skipped
        );
        Ok(())
    }

    fn read_flash(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_selected("read")?;
        self.dap.read_block(addr, len)
    }
}

impl<P: SwdProbe + ?Sized> ChunkProgrammer for Samx5<'_, P> {
    fn program_unit(&self) -> usize {
        PAGE_SIZE
    }

    fn write_chunk(&mut self, addr: u32, chunk: &[u8]) -> Result<()> {
        self.dap.write_word(NVMCTRL_ADDR, addr)?;
        nvm_command(&mut self.dap, CMD_UR)?;
        nvm_command(&mut self.dap, CMD_PBC)?;
        self.dap.write_block(addr, chunk)?;
        self.dap.write_word(NVMCTRL_CTRLB, CMD_WP)
    }

    fn wait_ready(&mut self, _addr: u32) -> Result<()> {
        wait_nvm(&mut self.dap)
    }

    fn read_back(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.dap.read_block(addr, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_write_mode_clears_wmode() {
        assert_eq!(manual_write_mode(0x0034), 0x0004);
        assert_eq!(manual_write_mode(0x0004), 0x0004);
    }

    #[test]
    fn test_factory_row_has_no_bootprot() {
        let row = UserRow::from_slice(&FACTORY_USER_ROW);
        assert_eq!(row.word(0) & BOOTPROT_MASK, BOOTPROT_MASK);
    }
}
