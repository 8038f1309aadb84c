//! nRF52 model: FICR, UICR and the NVMC

use dapflash_core::probe::Ack;
use log::debug;

use crate::memory::FlashArray;
use crate::{DummyConfig, Peripheral};

const PAGE_SIZE: u32 = 4096;

const FICR_CODEPAGESIZE: u32 = 0x1000_0010;
const FICR_CODESIZE: u32 = 0x1000_0014;
const FICR_INFO_PART: u32 = 0x1000_0100;
const FICR_INFO_VARIANT: u32 = 0x1000_0104;

const UICR_BASE: u32 = 0x1000_1000;
const UICR_SIZE: usize = 0x400;

const NVMC_READY: u32 = 0x4001_E400;
const NVMC_CONFIG: u32 = 0x4001_E504;
const NVMC_ERASEALL: u32 = 0x4001_E50C;

const CONFIG_WEN: u32 = 1;
const CONFIG_EEN: u32 = 2;

/// "AAD0"
const VARIANT: u32 = 0x4141_4430;

pub(crate) struct NrfChip {
    part: u32,
    flash: FlashArray,
    uicr: FlashArray,
    config: u32,
}

impl NrfChip {
    pub(crate) fn new(config: &DummyConfig) -> Self {
        Self {
            part: config.device_id,
            flash: FlashArray::new(0, config.flash_size),
            uicr: FlashArray::new(UICR_BASE, UICR_SIZE),
            config: 0,
        }
    }
}

impl Peripheral for NrfChip {
    fn read(&mut self, addr: u32) -> Option<Result<u32, Ack>> {
        let value = match addr {
            FICR_CODEPAGESIZE => PAGE_SIZE,
            FICR_CODESIZE => self.flash.len() as u32 / PAGE_SIZE,
            FICR_INFO_PART => self.part,
            FICR_INFO_VARIANT => VARIANT,
            NVMC_READY => 1,
            NVMC_CONFIG => self.config,
            a if self.flash.contains(a) => self.flash.read_word(a),
            a if self.uicr.contains(a) => self.uicr.read_word(a),
            _ => return None,
        };
        Some(Ok(value))
    }

    fn write(&mut self, addr: u32, value: u32) -> Option<Result<(), Ack>> {
        match addr {
            NVMC_CONFIG => self.config = value & 0x3,
            NVMC_ERASEALL => {
                if self.config == CONFIG_EEN && value & 1 != 0 {
                    debug!("dummy NVMC: erase all");
                    self.flash.erase_all();
                    self.uicr.erase_all();
                }
            }
            a if self.flash.contains(a) || self.uicr.contains(a) => {
                // Writes without WEN are dropped by the NVMC
                if self.config != CONFIG_WEN {
                    return Some(Err(Ack::Fault));
                }
                if self.flash.contains(a) {
                    self.flash.program_word(a, value);
                } else {
                    self.uicr.program_word(a, value);
                }
            }
            _ => return None,
        }
        Some(Ok(()))
    }

    fn is_flash(&self, addr: u32) -> bool {
        self.flash.contains(addr) || self.uicr.contains(addr)
    }

    fn flash(&self) -> &FlashArray {
        &self.flash
    }

    fn config_row(&self) -> Option<&FlashArray> {
        Some(&self.uicr)
    }
}
