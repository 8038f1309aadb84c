//! SAM D5x/E5x model: NVMCTRL with write modes, bootloader protection and
//! the mirrored user page

use dapflash_core::probe::Ack;
use log::debug;

use crate::memory::FlashArray;
use crate::sam::{Dsu, DsuAction};
use crate::{DummyConfig, Peripheral};

const PAGE_SIZE: usize = 512;
const BLOCK_SIZE: usize = 8192;
const QUAD_WORD: usize = 16;
const REGIONS: usize = 32;

const USER_PAGE_ADDR: u32 = 0x0080_4000;
const USER_ROW_HALF: u32 = 32;

const CTRLA: u32 = 0x4100_4000;
const CTRLB: u32 = 0x4100_4004;
const INTFLAG_STATUS: u32 = 0x4100_4010;
const ADDR: u32 = 0x4100_4014;

/// AUTOWS, WMODE = automatic double-word
const CTRLA_RESET: u32 = 0x0014;
const CTRLA_WMODE_SHIFT: u32 = 4;

const STATUS_READY: u32 = 1 << 16;
const INTFLAG_PROGE: u32 = 1 << 2;
const INTFLAG_LOCKE: u32 = 1 << 3;

const CMD_KEY: u32 = 0xA5;
const CMD_EP: u32 = 0x00;
const CMD_EB: u32 = 0x01;
const CMD_WP: u32 = 0x03;
const CMD_WQW: u32 = 0x04;
const CMD_LR: u32 = 0x11;
const CMD_UR: u32 = 0x12;
const CMD_PBC: u32 = 0x15;
const CMD_SBPDIS: u32 = 0x1A;
const CMD_CBPDIS: u32 = 0x1B;

/// Factory user page header, stored at the start of each half
const FACTORY_USER_ROW: [u8; 8] = [0x39, 0x92, 0x9A, 0xFE, 0x80, 0xFF, 0xEC, 0xAE];

pub(crate) struct Samx5Chip {
    dsu: Dsu,
    flash: FlashArray,
    user_page: FlashArray,
    page_buffer: [u8; PAGE_SIZE],
    ctrla: u32,
    addr: u32,
    intflag: u32,
    /// Bit n set: region n is locked
    locks: u32,
    /// Bytes at the start of flash covered by BOOTPROT
    bootprot_size: u32,
    bootprot_disabled: bool,
}

impl Samx5Chip {
    pub(crate) fn new(config: &DummyConfig) -> Self {
        let user_page = match &config.user_row {
            Some(bytes) => FlashArray::with_contents(USER_PAGE_ADDR, PAGE_SIZE, bytes),
            None => {
                let mut row = vec![0xFF; USER_ROW_HALF as usize * 2];
                row[..8].copy_from_slice(&FACTORY_USER_ROW);
                row[USER_ROW_HALF as usize..USER_ROW_HALF as usize + 8]
                    .copy_from_slice(&FACTORY_USER_ROW);
                FlashArray::with_contents(USER_PAGE_ADDR, PAGE_SIZE, &row)
            }
        };
        let mut chip = Self {
            dsu: Dsu::new(config.device_id, config.locked),
            flash: FlashArray::new(0, config.flash_size),
            user_page,
            page_buffer: [0xFF; PAGE_SIZE],
            ctrla: CTRLA_RESET,
            addr: 0,
            intflag: 0,
            locks: 0,
            bootprot_size: 0,
            bootprot_disabled: false,
        };
        chip.load_fuses();
        chip
    }

    /// BOOTPROT from word 0 bits 29:26, region locks from word 2 (0 = locked)
    fn load_fuses(&mut self) {
        let bootprot = (self.user_page.read_word(USER_PAGE_ADDR) >> 26) & 0xF;
        self.bootprot_size = (15 - bootprot) * BLOCK_SIZE as u32;
        self.locks = !self.user_page.read_word(USER_PAGE_ADDR + 8);
        debug!(
            "dummy NVMCTRL: BOOTPROT {} bytes, locks 0x{:08X}",
            self.bootprot_size, self.locks
        );
    }

    fn region(&self, addr: u32) -> usize {
        addr as usize / (self.flash.len() / REGIONS)
    }

    fn is_protected(&self, addr: u32) -> bool {
        if !self.flash.contains(addr) {
            return false;
        }
        let boot = addr < self.bootprot_size && !self.bootprot_disabled;
        boot || self.locks & (1 << self.region(addr)) != 0
    }

    fn wmode(&self) -> u32 {
        (self.ctrla >> CTRLA_WMODE_SHIFT) & 0x3
    }

    fn buffer_write(&mut self, addr: u32, value: u32) {
        let offset = addr as usize % PAGE_SIZE;
        self.page_buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());

        if !self.flash.contains(addr) {
            return;
        }
        // Automatic modes commit once the last word of their unit lands
        let unit = match self.wmode() {
            1 => 8,
            2 => QUAD_WORD,
            3 => PAGE_SIZE,
            _ => return,
        };
        if (offset + 4) % unit == 0 {
            self.commit(addr + 4 - unit as u32, unit);
        }
    }

    /// Program `len` bytes of the page buffer at `addr`
    fn commit(&mut self, addr: u32, len: usize) {
        if self.is_protected(addr) {
            debug!("dummy NVMCTRL: 0x{:08X} is protected", addr);
            self.intflag |= INTFLAG_LOCKE;
            return;
        }
        let target = if self.flash.contains(addr) {
            &mut self.flash
        } else if self.user_page.contains(addr) {
            &mut self.user_page
        } else {
            self.intflag |= INTFLAG_PROGE;
            return;
        };
        let offset = addr as usize % PAGE_SIZE;
        for (i, word) in self.page_buffer[offset..offset + len].chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            target.program_word(addr + (i * 4) as u32, value);
        }
        self.page_buffer[offset..offset + len].fill(0xFF);
    }

    fn command(&mut self, value: u32) {
        if (value >> 8) & 0xFF != CMD_KEY {
            self.intflag |= INTFLAG_PROGE;
            return;
        }
        let addr = self.addr;
        match value & 0x7F {
            CMD_EP if self.user_page.contains(addr) => self.user_page.erase_all(),
            CMD_EB if self.flash.contains(addr) => {
                let block = addr & !(BLOCK_SIZE as u32 - 1);
                if self.is_protected(block) {
                    self.intflag |= INTFLAG_LOCKE;
                } else {
                    self.flash.erase(block, BLOCK_SIZE);
                }
            }
            CMD_WP => self.commit(addr & !(PAGE_SIZE as u32 - 1), PAGE_SIZE),
            CMD_WQW => self.commit(addr & !(QUAD_WORD as u32 - 1), QUAD_WORD),
            CMD_LR if self.flash.contains(addr) => self.locks |= 1 << self.region(addr),
            CMD_UR if self.flash.contains(addr) => self.locks &= !(1 << self.region(addr)),
            CMD_PBC => self.page_buffer = [0xFF; PAGE_SIZE],
            CMD_SBPDIS => self.bootprot_disabled = true,
            CMD_CBPDIS => self.bootprot_disabled = false,
            _ => self.intflag |= INTFLAG_PROGE,
        }
    }
}

impl Peripheral for Samx5Chip {
    fn read(&mut self, addr: u32) -> Option<Result<u32, Ack>> {
        if let Some(value) = self.dsu.read(addr) {
            return Some(Ok(value));
        }
        let value = match addr {
            CTRLA => self.ctrla,
            CTRLB => 0,
            INTFLAG_STATUS => STATUS_READY | self.intflag,
            ADDR => self.addr,
            a if self.flash.contains(a) => self.flash.read_word(a),
            a if self.user_page.contains(a) => self.user_page.read_word(a),
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
            CTRLA => self.ctrla = value & 0xFFFF,
            CTRLB => self.command(value),
            INTFLAG_STATUS => self.intflag &= !(value & 0xFFFF),
            ADDR => self.addr = value,
            a if self.flash.contains(a) || self.user_page.contains(a) => {
                self.buffer_write(a, value)
            }
            _ => return None,
        }
        Some(Ok(()))
    }

    fn is_flash(&self, addr: u32) -> bool {
        self.flash.contains(addr) || self.user_page.contains(addr)
    }

    fn flash(&self) -> &FlashArray {
        &self.flash
    }

    fn config_row(&self) -> Option<&FlashArray> {
        Some(&self.user_page)
    }

    fn blocked(&self, addr: u32) -> bool {
        self.dsu.blocked(addr)
    }

    fn core_in_reset(&self) -> bool {
        self.dsu.in_reset_extension()
    }

    fn hardware_reset(&mut self, extended: bool) {
        self.dsu.hardware_reset(extended);
        self.ctrla = CTRLA_RESET;
        self.intflag = 0;
        self.page_buffer = [0xFF; PAGE_SIZE];
        self.bootprot_disabled = false;
        self.load_fuses();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DummySwd;
    use dapflash_core::dap::DebugTarget;
    use dapflash_core::family::Samx5;
    use dapflash_core::image::{write_binary, ImageOptions, NoProgress};
    use dapflash_core::{Error, FlashTarget};

    fn selected(swd: &mut DummySwd) -> Samx5<'_, DummySwd> {
        let mut target = Samx5::new(DebugTarget::new(swd));
        target.target_connect(1_000_000).unwrap();
        target.select().unwrap().unwrap();
        target
    }

    /// User row with `bootprot` in word 0 and `lock` in word 2 of both halves
    fn user_row(bootprot: u32, lock: u32) -> Vec<u8> {
        let word0 = u32::from_le_bytes([0x39, 0x92, 0x9A, 0xFE]);
        let word0 = (word0 & !(0xF << 26)) | (bootprot << 26);
        let mut half = vec![0xFF; 32];
        half[..4].copy_from_slice(&word0.to_le_bytes());
        half[4..8].copy_from_slice(&FACTORY_USER_ROW[4..]);
        half[8..12].copy_from_slice(&lock.to_le_bytes());
        [half.clone(), half].concat()
    }

    fn ctrla_writes(swd: &DummySwd) -> Vec<u32> {
        swd.bus_writes()
            .iter()
            .filter(|(addr, _)| *addr == CTRLA)
            .map(|(_, v)| *v)
            .collect()
    }

    #[test]
    fn test_program_round_trip() {
        let mut swd = DummySwd::new(DummyConfig::samd51());
        let image: Vec<u8> = (0..1300u32).map(|i| (i % 251) as u8).collect();
        {
            let mut target = selected(&mut swd);
            assert_eq!(target.device().unwrap().name, "SAM D51J19A");
            target.erase().unwrap();
            let base = target.program_start(0x8000, image.len() as u32).unwrap();
            write_binary(&mut target, &image[..], base, ImageOptions::default(), &mut NoProgress)
                .unwrap();
        }
        assert_eq!(&swd.flash()[0x8000..0x8000 + 1300], &image[..]);
        assert_eq!(ctrla_writes(&swd), vec![0x0004]);
    }

    #[test]
    fn test_bootloader_area_needs_sbpdis() {
        let config = DummyConfig {
            user_row: Some(user_row(13, u32::MAX)),
            ..DummyConfig::samd51()
        };
        let mut chip = Samx5Chip::new(&config);
        assert_eq!(chip.bootprot_size, 2 * BLOCK_SIZE as u32);

        chip.write(CTRLA, 0x0004);
        chip.write(0x0000, 0x1234_5678);
        chip.write(ADDR, 0x0000);
        chip.write(CTRLB, (CMD_KEY << 8) | CMD_WQW);
        assert_ne!(chip.intflag & INTFLAG_LOCKE, 0);
        assert_eq!(chip.flash.read_word(0), 0xFFFF_FFFF);

        chip.write(CTRLB, (CMD_KEY << 8) | CMD_SBPDIS);
        chip.write(0x0000, 0x1234_5678);
        chip.write(CTRLB, (CMD_KEY << 8) | CMD_WQW);
        assert_eq!(chip.flash.read_word(0), 0x1234_5678);

        // Protection returns on reset
        chip.hardware_reset(false);
        assert!(chip.is_protected(0));
    }

    #[test]
    fn test_protected_bootloader_programs_through_session() {
        let config = DummyConfig {
            user_row: Some(user_row(13, u32::MAX)),
            ..DummyConfig::samd51()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            target.program_start(0, 512).unwrap();
            target.program_flash(0, &[0x5A; 512], true).unwrap();
        }
        assert_eq!(&swd.flash()[..512], &[0x5A; 512]);
    }

    #[test]
    fn test_locked_regions_are_unlocked_per_page() {
        let config = DummyConfig {
            user_row: Some(user_row(15, 0)),
            ..DummyConfig::samd51()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            target.program_start(0x10000, 1024).unwrap();
            target.program_flash(0x10000, &[0x3C; 1024], true).unwrap();
        }
        assert_eq!(&swd.flash()[0x10000..0x10400], &[0x3C; 1024]);
    }

    #[test]
    fn test_fuse_read_recovers_erased_row() {
        let config = DummyConfig {
            user_row: Some(vec![0xFF; 64]),
            ..DummyConfig::samd51()
        };
        let mut swd = DummySwd::new(config);
        let mut target = selected(&mut swd);

        let row = target.fuse_read().unwrap();
        assert_eq!(&row.as_bytes()[..8], &FACTORY_USER_ROW);
        assert_eq!(&row.as_bytes()[32..40], &FACTORY_USER_ROW);
    }

    #[test]
    fn test_reset_fuses_writes_both_halves() {
        let config = DummyConfig {
            user_row: Some(user_row(12, 0x0000_FFFF)),
            ..DummyConfig::samd51()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            assert!(target.reset_fuses().unwrap());
            let row = target.fuse_read().unwrap();
            for base in [0, 8] {
                assert_eq!(row.word(base) >> 26 & 0xF, 0xF);
                assert_eq!(row.word(base + 2), u32::MAX);
            }
            assert!(!target.reset_fuses().unwrap());
        }
        // Manual mode for the write, then the reset value comes back
        assert_eq!(ctrla_writes(&swd), vec![0x0004, CTRLA_RESET]);
    }

    #[test]
    fn test_reset_fuses_keeps_rest_of_user_page() {
        let mut page = user_row(12, 0x0000_FFFF);
        page.resize(PAGE_SIZE, 0xFF);
        page[100] = 0x42;
        page[200] = 0x24;
        page[300] = 0x11;
        let config = DummyConfig {
            user_row: Some(page),
            ..DummyConfig::samd51()
        };
        let mut swd = DummySwd::new(config);
        {
            let mut target = selected(&mut swd);
            assert!(target.reset_fuses().unwrap());
        }

        let user_page = swd.config_row().unwrap();
        assert_eq!(user_page[100], 0x42);
        assert_eq!(user_page[200], 0x24);
        assert_eq!(user_page[300], 0x11);
        assert_eq!(user_page[3] >> 2 & 0xF, 0xF);
        assert_eq!(user_page[32 + 3] >> 2 & 0xF, 0xF);

        // 16 fixed quad-words plus the one holding byte 300
        let wqw = swd
            .bus_writes()
            .iter()
            .filter(|&&(addr, v)| addr == CTRLB && v == (CMD_KEY << 8) | CMD_WQW)
            .count();
        assert_eq!(wqw, 17);
    }

    #[test]
    fn test_misaligned_page_rejected() {
        let mut swd = DummySwd::new(DummyConfig::samd51());
        let mut target = selected(&mut swd);
        target.program_start(0, 0).unwrap();
        assert!(matches!(
            target.program_flash(0x100, &[0; 16], false),
            Err(Error::Misaligned { addr: 0x100, align: 512 })
        ));
    }
}
