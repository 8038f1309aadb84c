//! Nordic nRF52 series
//!
//! Programming goes straight through the NVMC: enable writes, stream 1 KiB
//! blocks into flash, poll READY. There is no region locking.

use log::{debug, info, warn};

use super::user_row::NvmWriteMode;
use crate::dap::DebugTarget;
use crate::device::{lookup, DeviceInfo, DeviceRecord};
use crate::error::Result;
use crate::family::Family;
use crate::flash::{
    check_bounds, program_chunks, ChunkProgrammer, FlashSession, FlashTarget, TargetState,
};
use crate::probe::SwdProbe;

/// UICR word holding the bootloader start address
pub const UICR_BOOTLOADER_ADDR: u32 = 0x1000_1014;
/// UICR word holding the MBR parameter page address
pub const UICR_MBR_PARAMS: u32 = 0x1000_1018;

const FICR_CODEPAGESIZE: u32 = 0x1000_0010;
const FICR_CODESIZE: u32 = 0x1000_0014;
const FICR_INFO_PART: u32 = 0x1000_0100;
const FICR_INFO_VARIANT: u32 = 0x1000_0104;

const NVMC_READY: u32 = 0x4001_E400;
const NVMC_CONFIG: u32 = 0x4001_E504;
const NVMC_ERASEALL: u32 = 0x4001_E50C;

const CONFIG_WEN: u32 = 1;
const CONFIG_EEN: u32 = 2;

const FLASH_START: u32 = 0;
const CHUNK_SIZE: usize = 1024;

/// Known nRF52 parts, keyed by FICR INFO.PART
pub static NRF5X_DEVICES: &[DeviceRecord] = &[
    DeviceRecord::new(0x52805, "nRF52805", 192 * 1024, 4096),
    DeviceRecord::new(0x52810, "nRF52810", 192 * 1024, 4096),
    DeviceRecord::new(0x52811, "nRF52811", 192 * 1024, 4096),
    DeviceRecord::new(0x52820, "nRF52820", 256 * 1024, 4096),
    DeviceRecord::new(0x52832, "nRF52832", 512 * 1024, 4096),
    DeviceRecord::new(0x52833, "nRF52833", 512 * 1024, 4096),
    DeviceRecord::new(0x52840, "nRF52840", 1024 * 1024, 4096),
];

/// nRF52 flash target
pub struct Nrf5x<'a, P: SwdProbe + ?Sized> {
    dap: DebugTarget<'a, P>,
    state: TargetState,
}

impl<'a, P: SwdProbe + ?Sized> Nrf5x<'a, P> {
    /// Wrap a debug link
    pub fn new(dap: DebugTarget<'a, P>) -> Self {
        Self {
            dap,
            state: TargetState::Disconnected,
        }
    }

    /// Write one UICR word with the NVMC in write mode
    pub fn program_uicr(&mut self, addr: u32, value: u32) -> Result<()> {
        self.state.require_selected("program UICR")?;
        debug!("UICR 0x{:08X} <- 0x{:08X}", addr, value);
        let mut nvmc = NvmWriteMode::enter(&mut self.dap, NVMC_CONFIG, |_| CONFIG_WEN)?;
        nvmc.write_word(addr, value)?;
        wait_nvmc(&mut *nvmc)
    }
}

fn wait_nvmc<P: SwdProbe + ?Sized>(dap: &mut DebugTarget<'_, P>) -> Result<()> {
    dap.wait_bits("NVMC ready", NVMC_READY, 1)
}

/// Streams chunks while the NVMC is held in write mode
struct NvmcWriter<'g, 'a, P: SwdProbe + ?Sized> {
    nvmc: NvmWriteMode<'g, 'a, P>,
}

/// INFO.VARIANT holds four ASCII characters, most significant first
fn variant_name(variant: u32) -> String {
    variant
        .to_be_bytes()
        .iter()
        .filter(|b| b.is_ascii_alphanumeric())
        .map(|&b| b as char)
        .collect()
}

impl<P: SwdProbe + ?Sized> FlashTarget for Nrf5x<'_, P> {
    fn family(&self) -> Family {
        Family::Nrf5x
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
        self.dap.prepare()?;
        self.dap.halt_core()?;

        let part = self.dap.read_word(FICR_INFO_PART)?;
        let variant = variant_name(self.dap.read_word(FICR_INFO_VARIANT)?);
        let page_size = self.dap.read_word(FICR_CODEPAGESIZE)?;
        let pages = self.dap.read_word(FICR_CODESIZE)?;
        debug!("FICR: part 0x{:X}, {} pages of {} bytes", part, pages, page_size);

        let Some(record) = lookup(NRF5X_DEVICES, part) else {
            debug!("unknown nRF part 0x{:08X}", part);
            return Ok(None);
        };

        let mut device = DeviceInfo::from_record(Family::Nrf5x, record);
        if !variant.is_empty() {
            device.name = format!("{}_{}", record.name, variant);
        }
        let ficr_size = page_size.saturating_mul(pages);
        if ficr_size != record.flash_size {
            warn!(
                "{}: FICR reports {} bytes of flash, table says {}",
                device.name, ficr_size, record.flash_size
            );
        }

        info!("Found {}", device);
        self.dap.set_device(Some(device.clone()));
        self.state = TargetState::Selected;
        Ok(Some(device))
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
        info!("Erasing all flash");
        let mut nvmc = NvmWriteMode::enter(&mut self.dap, NVMC_CONFIG, |_| CONFIG_EEN)?;
        nvmc.write_word(NVMC_ERASEALL, 1)?;
        wait_nvmc(&mut *nvmc)
    }

    fn program_start(&mut self, offset: u32, size: u32) -> Result<u32> {
        self.state.require_selected("start programming")?;
        check_bounds(self.dap.device(), offset, size)?;
        let base = FLASH_START + offset;
        self.state = TargetState::Programming(FlashSession {
            base,
            size,
            page_size: CHUNK_SIZE as u32,
        });
        Ok(base)
    }

    fn program_flash(&mut self, addr: u32, buf: &[u8], verify: bool) -> Result<()> {
        self.state.require_session("program")?;
        let mut writer = NvmcWriter {
            nvmc: NvmWriteMode::enter(&mut self.dap, NVMC_CONFIG, |_| CONFIG_WEN)?,
        };
        let stats = program_chunks(&mut writer, addr, buf, verify)?;
        debug!(
            "0x{:08X}: {} chunks written, {} blank",
            addr, stats.written, stats.skipped
        );
        Ok(())
    }

    fn read_flash(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_selected("read")?;
        self.dap.read_block(addr, len)
    }
}

impl<P: SwdProbe + ?Sized> ChunkProgrammer for NvmcWriter<'_, '_, P> {
    fn program_unit(&self) -> usize {
        CHUNK_SIZE
    }

    fn write_chunk(&mut self, addr: u32, chunk: &[u8]) -> Result<()> {
        self.nvmc.write_block(addr, chunk)
    }

    fn wait_ready(&mut self, _addr: u32) -> Result<()> {
        wait_nvmc(&mut *self.nvmc)
    }

    fn read_back(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.nvmc.read_block(addr, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_name() {
        assert_eq!(variant_name(0x4141_4430), "AAD0");
        assert_eq!(variant_name(0xFFFF_FFFF), "");
    }
}
