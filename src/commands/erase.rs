//! Chip erase command

use crate::cli::TargetArgs;

/// Erase the whole chip
pub fn run_erase(args: &TargetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (mut probe, family) = super::open(args)?;
    let mut target = family.open(&mut *probe, args.link_config());
    let device = super::select(&mut *target, args)?;

    if device.locked {
        println!("Device is locked, chip erase will unlock it");
    }
    println!("Erasing chip...");
    target.erase()?;
    target.deselect()?;

    println!("Erase complete");
    Ok(())
}
