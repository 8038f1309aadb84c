//! STM32F4 model: identification registers and read-only flash

use dapflash_core::probe::Ack;

use crate::memory::FlashArray;
use crate::{DummyConfig, Peripheral};

const FLASH_BASE: u32 = 0x0800_0000;
const DBGMCU_IDCODE: u32 = 0xE004_2000;
const FLASH_SIZE_REG: u32 = 0x1FFF_7A20;

pub(crate) struct Stm32Chip {
    idcode: u32,
    flash: FlashArray,
}

impl Stm32Chip {
    pub(crate) fn new(config: &DummyConfig) -> Self {
        Self {
            idcode: config.device_id,
            flash: FlashArray::new(FLASH_BASE, config.flash_size),
        }
    }
}

impl Peripheral for Stm32Chip {
    fn read(&mut self, addr: u32) -> Option<Result<u32, Ack>> {
        let value = match addr {
            DBGMCU_IDCODE => self.idcode,
            // F_SIZE is the upper half-word
            FLASH_SIZE_REG => ((self.flash.len() as u32 / 1024) << 16) | 0xFFFF,
            a if self.flash.contains(a) => self.flash.read_word(a),
            _ => return None,
        };
        Some(Ok(value))
    }

    fn write(&mut self, addr: u32, _value: u32) -> Option<Result<(), Ack>> {
        if self.flash.contains(addr) || addr == FLASH_SIZE_REG {
            return Some(Err(Ack::Fault));
        }
        None
    }

    fn is_flash(&self, addr: u32) -> bool {
        self.flash.contains(addr)
    }

    fn flash(&self) -> &FlashArray {
        &self.flash
    }
}

#[cfg(test)]
mod tests {
    use crate::{DummyConfig, DummySwd};
    use dapflash_core::dap::DebugTarget;
    use dapflash_core::family::{detect, Family, Stm32};
    use dapflash_core::{Error, FlashTarget, LinkConfig};

    #[test]
    fn test_identify_only() {
        let mut swd = DummySwd::new(DummyConfig::stm32f405());
        let mut target = Stm32::new(DebugTarget::new(&mut swd));
        target.target_connect(1_000_000).unwrap();

        let device = target.select().unwrap().unwrap();
        assert_eq!(device.family, Family::Stm32);
        assert_eq!(device.name, "STM32F405xx/07xx and STM32F415xx/17xx");
        assert_eq!(device.flash_size, 1024 * 1024);

        assert_eq!(
            target.read_flash(0x0800_0000, 8).unwrap(),
            vec![0xFF; 8]
        );
        assert!(matches!(target.erase(), Err(Error::Unsupported(_))));
        assert!(matches!(
            target.program_start(0, 16),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            target.program_flash(0x0800_0000, &[0; 16], false),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_detect_walks_families() {
        let config = LinkConfig::default();
        for (dummy, family) in [
            (DummyConfig::nrf52840(), Family::Nrf5x),
            (DummyConfig::samd21(), Family::Samd21),
            (DummyConfig::samd51(), Family::Samx5),
            (DummyConfig::stm32f405(), Family::Stm32),
        ] {
            let mut swd = DummySwd::new(dummy);
            let device = detect(&mut swd, config).unwrap().unwrap();
            assert_eq!(device.family, family);
        }
    }

    #[test]
    fn test_detect_unknown_device() {
        let config = DummyConfig {
            device_id: 0x0000_0123,
            ..DummyConfig::stm32f405()
        };
        let mut swd = DummySwd::new(config);
        assert!(detect(&mut swd, LinkConfig::default()).unwrap().is_none());
    }
}
