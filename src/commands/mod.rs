//! CLI command implementations
//!
//! Every command opens a probe, picks a family (detecting it when
//! `--family` is not given) and then drives the family's
//! [`FlashTarget`] through the usual connect / select / ... / deselect
//! sequence.

mod erase;
mod flash;
mod fuses;
mod info;
mod list;
mod progress;
mod uicr;

pub use erase::run_erase;
pub use flash::{run_flash, FlashOptions};
pub use fuses::{run_fuses_reset, run_fuses_show};
pub use info::run_info;
pub use list::{list_devices, list_probes};
pub use uicr::run_uicr;

use dapflash_core::family::detect;
use dapflash_core::probe::SwdProbe;
use dapflash_core::{DeviceInfo, Family, FlashTarget};

use crate::cli::TargetArgs;
use crate::probes;

/// Open the probe named in `args` and resolve the device family
fn open(args: &TargetArgs) -> Result<(Box<dyn SwdProbe>, Family), Box<dyn std::error::Error>> {
    let mut probe = probes::open_probe(&args.probe)?;

    let family = match args.family {
        Some(family) => family,
        None => {
            log::info!("No family given, probing...");
            let device = detect(&mut *probe, args.link_config())?
                .ok_or("No supported device found (use --family to force one)")?;
            log::info!("Detected {}", device);
            device.family
        }
    };
    Ok((probe, family))
}

/// Connect and identify the device, failing if the family does not know it
fn select<T: FlashTarget + ?Sized>(
    target: &mut T,
    args: &TargetArgs,
) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
    target.target_connect(args.clock)?;
    let device = target
        .select()?
        .ok_or_else(|| format!("No {} device found", target.family()))?;
    println!("Found: {}", device);
    Ok(device)
}
