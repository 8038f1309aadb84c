//! nRF UICR word programming

use dapflash_core::dap::DebugTarget;
use dapflash_core::family::{Nrf5x, UICR_BOOTLOADER_ADDR, UICR_MBR_PARAMS};
use dapflash_core::{Family, FlashTarget};

use crate::cli::TargetArgs;

fn describe(addr: u32) -> &'static str {
    match addr {
        UICR_BOOTLOADER_ADDR => " (bootloader address)",
        UICR_MBR_PARAMS => " (MBR parameter page)",
        _ => "",
    }
}

/// Write one UICR word
pub fn run_uicr(args: &TargetArgs, addr: u32, value: u32) -> Result<(), Box<dyn std::error::Error>> {
    let (mut probe, family) = super::open(args)?;
    if family != Family::Nrf5x {
        return Err(format!("UICR is only available on nRF5x, not {}", family).into());
    }

    let mut target = Nrf5x::new(DebugTarget::with_config(&mut *probe, args.link_config()));
    super::select(&mut target, args)?;

    println!("UICR 0x{:08X}{} <- 0x{:08X}", addr, describe(addr), value);
    target.program_uicr(addr, value)?;
    target.deselect()?;
    Ok(())
}
