//! ST STM32F4, identification only
//!
//! The part is recognised from DBGMCU_IDCODE and the flash size register,
//! and flash can be read back, but no erase or program algorithm exists.

use log::{debug, info};

use crate::dap::DebugTarget;
use crate::device::{lookup, DeviceInfo, DeviceRecord};
use crate::error::{Error, Result};
use crate::family::Family;
use crate::flash::{FlashTarget, TargetState};
use crate::probe::SwdProbe;

const DBGMCU_IDCODE: u32 = 0xE004_2000;
const DEV_ID_MASK: u32 = 0xFFF;
/// Flash size in KiB lives in the upper half of this word
const FLASH_SIZE_REG: u32 = 0x1FFF_7A20;

/// Known device lines, keyed by DEV_ID; flash size comes from the chip
pub static STM32_DEVICES: &[DeviceRecord] = &[
    DeviceRecord::new(0x413, "STM32F405xx/07xx and STM32F415xx/17xx", 0, 16 * 1024),
    DeviceRecord::new(0x419, "STM32F42xxx and STM32F43xxx", 0, 16 * 1024),
    DeviceRecord::new(0x431, "STM32F411xC/E", 0, 16 * 1024),
    DeviceRecord::new(0x441, "STM32F412", 0, 16 * 1024),
];

/// STM32F4 target
pub struct Stm32<'a, P: SwdProbe + ?Sized> {
    dap: DebugTarget<'a, P>,
    state: TargetState,
}

impl<'a, P: SwdProbe + ?Sized> Stm32<'a, P> {
    /// Wrap a debug link
    pub fn new(dap: DebugTarget<'a, P>) -> Self {
        Self {
            dap,
            state: TargetState::Disconnected,
        }
    }
}

impl<P: SwdProbe + ?Sized> FlashTarget for Stm32<'_, P> {
    fn family(&self) -> Family {
        Family::Stm32
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

        let flash_size = (self.dap.read_word(FLASH_SIZE_REG)? >> 16) * 1024;
        let idcode = self.dap.read_word(DBGMCU_IDCODE)?;
        let dev_id = idcode & DEV_ID_MASK;

        let Some(record) = lookup(STM32_DEVICES, dev_id) else {
            debug!("unknown STM32 DEV_ID 0x{:03X}", dev_id);
            return Ok(None);
        };

        let mut device = DeviceInfo::from_record(Family::Stm32, record);
        device.flash_size = flash_size;
        info!("Found {} (revision 0x{:04X})", device, idcode >> 16);
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
        Err(Error::Unsupported("erase"))
    }

    fn program_start(&mut self, _offset: u32, _size: u32) -> Result<u32> {
        Err(Error::Unsupported("programming"))
    }

    fn program_flash(&mut self, _addr: u32, _buf: &[u8], _verify: bool) -> Result<()> {
        Err(Error::Unsupported("programming"))
    }

    fn read_flash(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.state.require_selected("read")?;
        self.dap.read_block(addr, len)
    }
}
