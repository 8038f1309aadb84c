//! SAM D21 model: NVMCTRL with page buffer, region locks and the user row

use dapflash_core::probe::Ack;
use log::debug;

use crate::memory::FlashArray;
use crate::sam::{Dsu, DsuAction};
use crate::{DummyConfig, Peripheral};

const PAGE_SIZE: usize = 64;
const ROW_SIZE: usize = 256;
const REGIONS: usize = 16;

const USER_ROW_ADDR: u32 = 0x0080_4000;

const CTRLA: u32 = 0x4100_4000;
const CTRLB: u32 = 0x4100_4004;
const INTFLAG: u32 = 0x4100_4014;
const STATUS: u32 = 0x4100_4018;
const ADDR: u32 = 0x4100_401C;

const CTRLB_MANW: u32 = 1 << 7;
const INTFLAG_READY: u32 = 1 << 0;
const INTFLAG_ERROR: u32 = 1 << 1;
const STATUS_PROGE: u32 = 1 << 2;
const STATUS_LOCKE: u32 = 1 << 3;

const CMD_KEY: u32 = 0xA5;
const CMD_ER: u32 = 0x02;
const CMD_WP: u32 = 0x04;
const CMD_EAR: u32 = 0x05;
const CMD_WAP: u32 = 0x06;
const CMD_LR: u32 = 0x40;
const CMD_UR: u32 = 0x41;
const CMD_PBC: u32 = 0x44;

/// Factory user row: no bootloader protection, every region unlocked
const DEFAULT_USER_ROW: [u32; 2] = [0xD8E0_C7FF, 0xFFFF_FC5D];

pub(crate) struct Samd21Chip {
    dsu: Dsu,
    flash: FlashArray,
    user_row: FlashArray,
    page_buffer: [u8; PAGE_SIZE],
    /// Page the buffer was loaded for
    page_addr: Option<u32>,
    ctrlb: u32,
    addr: u32,
    intflag: u32,
    status: u32,
    /// Bit n set: region n is locked
    locks: u16,
}

impl Samd21Chip {
    pub(crate) fn new(config: &DummyConfig) -> Self {
        let row = match &config.user_row {
            Some(bytes) => bytes.clone(),
            None => DEFAULT_USER_ROW.iter().flat_map(|w| w.to_le_bytes()).collect(),
        };
        let mut chip = Self {
            dsu: Dsu::new(config.device_id, config.locked),
            flash: FlashArray::new(0, config.flash_size),
            user_row: FlashArray::with_contents(USER_ROW_ADDR, ROW_SIZE, &row),
            page_buffer: [0xFF; PAGE_SIZE],
            page_addr: None,
            ctrlb: 0,
            addr: 0,
            intflag: INTFLAG_READY,
            status: 0,
            locks: 0,
        };
        chip.load_fuses();
        chip
    }

    /// Region lock bits come from user row word 1, bits 31:16 (0 = locked)
    fn load_fuses(&mut self) {
        let lock = self.user_row.read_word(USER_ROW_ADDR + 4) >> 16;
        self.locks = !(lock as u16);
    }

    fn region_size(&self) -> usize {
        self.flash.len() / REGIONS
    }

    fn region(&self, addr: u32) -> usize {
        addr as usize / self.region_size()
    }

    fn is_locked(&self, addr: u32) -> bool {
        self.flash.contains(addr) && self.locks & (1 << self.region(addr)) != 0
    }

    fn error(&mut self, status: u32) {
        self.status |= status;
        self.intflag |= INTFLAG_ERROR;
    }

    fn buffer_write(&mut self, addr: u32, value: u32) {
        let page = addr & !(PAGE_SIZE as u32 - 1);
        if self.page_addr != Some(page) {
            self.page_buffer = [0xFF; PAGE_SIZE];
            self.page_addr = Some(page);
        }
        let offset = (addr - page) as usize;
        self.page_buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());

        let last_word = offset == PAGE_SIZE - 4;
        if self.ctrlb & CTRLB_MANW == 0 && last_word && self.flash.contains(addr) {
            self.write_page(page);
        }
    }

    fn write_page(&mut self, page: u32) {
        if self.is_locked(page) {
            debug!("dummy NVMCTRL: page 0x{:08X} is in a locked region", page);
            self.error(STATUS_LOCKE);
            return;
        }
        let target = if self.flash.contains(page) {
            &mut self.flash
        } else if self.user_row.contains(page) {
            &mut self.user_row
        } else {
            self.error(STATUS_PROGE);
            return;
        };
        for (i, word) in self.page_buffer.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            target.program_word(page + (i * 4) as u32, value);
        }
        self.page_buffer = [0xFF; PAGE_SIZE];
        self.page_addr = None;
    }

    fn command(&mut self, value: u32) {
        if (value >> 8) & 0xFF != CMD_KEY {
            self.error(STATUS_PROGE);
            return;
        }
        let addr = self.addr << 1;
        match value & 0x7F {
            CMD_ER => {
                if self.is_locked(addr) {
                    self.error(STATUS_LOCKE);
                } else {
                    self.flash.erase(addr & !(ROW_SIZE as u32 - 1), ROW_SIZE);
                }
            }
            CMD_WP => self.write_page(addr & !(PAGE_SIZE as u32 - 1)),
            CMD_EAR => {
                if self.user_row.contains(addr) {
                    self.user_row.erase_all();
                } else {
                    self.error(STATUS_PROGE);
                }
            }
            CMD_WAP => {
                if self.user_row.contains(addr) {
                    self.write_page(addr & !(PAGE_SIZE as u32 - 1));
                } else {
                    self.error(STATUS_PROGE);
                }
            }
            CMD_LR if self.flash.contains(addr) => self.locks |= 1 << self.region(addr),
            CMD_UR if self.flash.contains(addr) => self.locks &= !(1 << self.region(addr)),
            CMD_PBC => {
                self.page_buffer = [0xFF; PAGE_SIZE];
                self.page_addr = None;
            }
            _ => self.error(STATUS_PROGE),
        }
    }
}

impl Peripheral for Samd21Chip {
    fn read(&mut self, addr: u32) -> Option<Result<u32, Ack>> {
        if let Some(value) = self.dsu.read(addr) {
            return Some(Ok(value));
        }
        let value = match addr {
            CTRLA => 0,
            CTRLB => self.ctrlb,
            INTFLAG => self.intflag,
            STATUS => self.status,
            ADDR => self.addr,
            a if self.flash.contains(a) => self.flash.read_word(a),
            a if self.user_row.contains(a) => self.user_row.read_word(a),
            _ => return None,
        };
        Some(Ok(value))
    }

    fn write(&mut self, addr: u32, value: u32) -> Option<Result<(), Ack>> {
        if Dsu::decodes(addr) {
            if self.dsu.write(addr, value) == DsuAction::ChipErase {
                self.flash.erase_all();
            }
            return Some(Ok(()));
        }
        match addr {
            CTRLA => self.command(value),
            CTRLB => self.ctrlb = value,
            INTFLAG => self.intflag &= !(value & INTFLAG_ERROR),
            STATUS => self.status &= !value,
            ADDR => self.addr = value,
            a if self.flash.contains(a) || self.user_row.contains(a) => {
                self.buffer_write(a, value)
            }
            _ => return None,
        }
        Some(Ok(()))
    }

    fn is_flash(&self, addr: u32) -> bool {
        self.flash.contains(addr) || self.user_row.contains(addr)
    }

    fn flash(&self) -> &FlashArray {
        &self.flash
    }

    fn config_row(&self) -> Option<&FlashArray> {
        Some(&self.user_row)
    }

    fn blocked(&self, addr: u32) -> bool {
        self.dsu.blocked(addr)
    }

    fn core_in_reset(&self) -> bool {
        self.dsu.in_reset_extension()
    }

    fn hardware_reset(&mut self, extended: bool) {
        self.dsu.hardware_reset(extended);
        self.ctrlb = 0;
        self.intflag = INTFLAG_READY;
        self.status = 0;
        self.page_buffer = [0xFF; PAGE_SIZE];
        self.page_addr = None;
        self.load_fuses();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DummySwd;
    use dapflash_core::dap::DebugTarget;
    use dapflash_core::family::{Samd21, UserRow, USER_ROW_SIZE};
    use dapflash_core::image::{write_binary, ImageOptions, NoProgress};
    use dapflash_core::{Error, FlashTarget};

    fn selected(swd: &mut DummySwd) -> Samd21<'_, DummySwd> {
        let mut target = Samd21::new(DebugTarget::new(swd));
        target.target_connect(1_000_000).unwrap();
        target.select().unwrap().unwrap();
        target
    }

    fn row_with_lock(lock: u16) -> Vec<u8> {
        let word1 = (u32::from(lock) << 16) | (DEFAULT_USER_ROW[1] & 0xFFFF);
        [DEFAULT_USER_ROW[0], word1]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_select_holds_and_releases_reset_extension() {
        let mut swd = DummySwd::new(DummyConfig::samd21());
        {
            let mut target = Samd21::new(DebugTarget::new(&mut swd));
            target.target_connect(1_000_000).unwrap();
            let device = target.select().unwrap().unwrap();
            assert_eq!(device.name, "SAM D21J18A (Rev D)");
            assert_eq!(device.flash_size, 256 * 1024);
            assert!(!device.locked);
        }
        assert!(!swd.core_in_reset());
    }

    #[test]
    fn test_program_round_trip() {
        let mut swd = DummySwd::new(DummyConfig::samd21());
        let image: Vec<u8> = (0..1500u32).map(|i| (i ^ 0x5A) as u8).collect();
        {
            let mut target = selected(&mut swd);
            target.erase().unwrap();
            let base = target.program_start(0x2000, image.len() as u32).unwrap();
            write_binary(&mut target, &image[..], base, ImageOptions::default(), &mut NoProgress)
                .unwrap();
        }
        assert_eq!(&swd.flash()[0x2000..0x2000 + 1500], &image[..]);
    }

    #[test]
    fn test_locked_part_rejects_programming_without_nvm_writes() {
        let config = DummyConfig {
            locked: true,
            ..DummyConfig::samd21()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            assert!(target.device().unwrap().locked);
            assert!(matches!(
                target.program_start(0, 256),
                Err(Error::DeviceLocked)
            ));
            assert!(matches!(target.fuse_read(), Err(Error::DeviceLocked)));
        }
        assert_eq!(swd.flash_writes(), 0);
        assert!(swd
            .bus_writes()
            .iter()
            .all(|(addr, _)| !(CTRLA..=ADDR).contains(addr)));
    }

    #[test]
    fn test_erase_unlocks_then_programs() {
        let config = DummyConfig {
            locked: true,
            ..DummyConfig::samd21()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            target.erase().unwrap();
            assert!(!target.device().unwrap().locked);

            target.program_start(0, 256).unwrap();
            target.program_flash(0, &[0x42; 256], true).unwrap();
        }
        assert_eq!(swd.resets(), 1);
        assert!(!swd.core_in_reset());
        assert_eq!(&swd.flash()[..256], &[0x42; 256]);
    }

    #[test]
    fn test_locked_regions_are_unlocked_per_row() {
        let config = DummyConfig {
            user_row: Some(row_with_lock(0x0000)),
            ..DummyConfig::samd21()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            target.program_start(0x4000, 512).unwrap();
            target.program_flash(0x4000, &[0x11; 512], true).unwrap();
        }
        assert_eq!(&swd.flash()[0x4000..0x4200], &[0x11; 512]);
    }

    #[test]
    fn test_blank_row_skips_bus_writes() {
        let mut swd = DummySwd::new(DummyConfig::samd21());
        {
            let mut target = selected(&mut swd);
            target.program_start(0, 256).unwrap();
            target.program_flash(0, &[0xFF; 256], true).unwrap();
        }
        assert_eq!(swd.flash_writes(), 0);
    }

    #[test]
    fn test_program_requires_row_alignment() {
        let mut swd = DummySwd::new(DummyConfig::samd21());
        let mut target = selected(&mut swd);
        target.program_start(0, 0).unwrap();
        for addr in [0x20, 0x40, 0xC0] {
            assert!(matches!(
                target.program_flash(addr, &[0; 4], false),
                Err(Error::Misaligned { align: 256, .. })
            ));
        }
    }

    #[test]
    fn test_write_straddling_locked_regions_is_rejected() {
        let config = DummyConfig {
            user_row: Some(row_with_lock(0x0000)),
            ..DummyConfig::samd21()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            target.program_start(0x3FC0, 256).unwrap();
            assert!(matches!(
                target.program_flash(0x3FC0, &[0x11; 256], true),
                Err(Error::Misaligned {
                    addr: 0x3FC0,
                    align: 256
                })
            ));

            // The same bytes land when each row is written on its own
            target.program_flash(0x3F00, &[0x11; 512], true).unwrap();
        }
        assert_eq!(&swd.flash()[0x3F00..0x4100], &[0x11; 512]);
    }

    #[test]
    fn test_reset_fuses_clears_bootprot_and_locks() {
        let mut row = row_with_lock(0x00F0);
        // BOOTPROT = 2
        row[0] &= !0x05;
        let config = DummyConfig {
            user_row: Some(row),
            ..DummyConfig::samd21()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            assert!(target.reset_fuses().unwrap());
            let fuses = target.fuse_read().unwrap();
            assert_eq!(fuses.word(0) & 0x7, 0x7);
            assert_eq!(fuses.word(1) >> 16, 0xFFFF);
            assert_eq!(fuses.word(1) & 0xFFFF, DEFAULT_USER_ROW[1] & 0xFFFF);

            // Already at defaults: nothing to write
            assert!(!target.reset_fuses().unwrap());
        }
    }

    #[test]
    fn test_fuse_write_restores_ctrlb() {
        let mut swd = DummySwd::new(DummyConfig::samd21());
        {
            let mut target = selected(&mut swd);
            let mut row = target.fuse_read().unwrap();
            row.set_word(0, row.word(0) & !0x7);
            target.fuse_write(&row).unwrap();
            assert_eq!(target.fuse_read().unwrap(), row);
        }
        let ctrlb: Vec<u32> = swd
            .bus_writes()
            .iter()
            .filter(|(addr, _)| *addr == CTRLB)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(ctrlb, vec![CTRLB_MANW, 0]);
    }

    #[test]
    fn test_invalid_user_row_is_never_written() {
        let mut swd = DummySwd::new(DummyConfig::samd21());
        {
            let mut target = selected(&mut swd);
            for fill in [0x00, 0xFF] {
                let row = UserRow::new([fill; USER_ROW_SIZE]);
                assert!(matches!(
                    target.fuse_write(&row),
                    Err(Error::InvalidUserRow(_))
                ));
            }
        }
        // Nothing after the reset-extension release at the end of select
        assert_eq!(swd.bus_writes().last(), Some(&(0x4100_2100, 0x200)));
    }
}
