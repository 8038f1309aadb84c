//! Device family implementations
//!
//! Each family is a flat struct implementing [`FlashTarget`] over its own
//! [`DebugTarget`]; there is no shared base type. SAM D21 and SAM D5x/E5x
//! share DSU and reset helpers through the `sam` module.

mod nrf5x;
mod sam;
mod samd21;
mod samx5;
mod stm32;
mod user_row;

use std::fmt;
use std::str::FromStr;

use log::debug;

pub use nrf5x::{Nrf5x, NRF5X_DEVICES, UICR_BOOTLOADER_ADDR, UICR_MBR_PARAMS};
pub use samd21::{Samd21, SAMD21_DEVICES};
pub use samx5::{Samx5, SAMX5_DEVICES};
pub use stm32::{Stm32, STM32_DEVICES};
pub use user_row::{NvmWriteMode, UserRow, USER_ROW_SIZE};

use crate::config::LinkConfig;
use crate::dap::DebugTarget;
use crate::device::{DeviceInfo, DeviceRecord};
use crate::error::Result;
use crate::flash::FlashTarget;
use crate::probe::SwdProbe;

/// Supported MCU families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Nordic nRF52 series
    Nrf5x,
    /// Microchip SAM D21 and related Cortex-M0+ parts
    Samd21,
    /// Microchip SAM D51 / E5x
    Samx5,
    /// ST STM32F4 (identification only)
    Stm32,
}

impl Family {
    /// Every family, in detection order
    pub const ALL: [Family; 4] = [Family::Nrf5x, Family::Samd21, Family::Samx5, Family::Stm32];

    /// Short name used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Family::Nrf5x => "nrf5x",
            Family::Samd21 => "samd21",
            Family::Samx5 => "samx5",
            Family::Stm32 => "stm32",
        }
    }

    /// Static device table of this family
    pub fn devices(&self) -> &'static [DeviceRecord] {
        match self {
            Family::Nrf5x => NRF5X_DEVICES,
            Family::Samd21 => SAMD21_DEVICES,
            Family::Samx5 => SAMX5_DEVICES,
            Family::Stm32 => STM32_DEVICES,
        }
    }

    /// Wrap `probe` in this family's flash target
    pub fn open<'a, P>(self, probe: &'a mut P, config: LinkConfig) -> Box<dyn FlashTarget + 'a>
    where
        P: SwdProbe + ?Sized + 'a,
    {
        let dap = DebugTarget::with_config(probe, config);
        match self {
            Family::Nrf5x => Box::new(Nrf5x::new(dap)),
            Family::Samd21 => Box::new(Samd21::new(dap)),
            Family::Samx5 => Box::new(Samx5::new(dap)),
            Family::Stm32 => Box::new(Stm32::new(dap)),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Family::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown family '{}', expected one of: {}",
                    s,
                    Family::ALL.map(|f| f.name()).join(", ")
                )
            })
    }
}

/// Try each family in turn until one recognises the device
///
/// Every attempt reconnects the link. Errors from a family's select are
/// treated as "not this family" since reading another family's ID
/// register may fault.
pub fn detect<P>(probe: &mut P, config: LinkConfig) -> Result<Option<DeviceInfo>>
where
    P: SwdProbe + ?Sized,
{
    for family in Family::ALL {
        let mut target = family.open(&mut *probe, config);
        target.target_connect(config.clock_hz)?;
        match target.select() {
            Ok(Some(device)) => {
                target.deselect()?;
                return Ok(Some(device));
            }
            Ok(None) => debug!("{}: no match", family),
            Err(e) => debug!("{}: select failed: {}", family, e),
        }
    }
    Ok(None)
}
