//! Device identification command

use crate::cli::TargetArgs;

/// Connect, identify the device and print what was found
pub fn run_info(args: &TargetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (mut probe, family) = super::open(args)?;
    let mut target = family.open(&mut *probe, args.link_config());
    let device = super::select(&mut *target, args)?;

    println!();
    println!("Family:          {}", device.family);
    println!("Name:            {}", device.name);
    println!("Device ID:       0x{:08X}", device.id);
    println!(
        "Flash size:      {} bytes ({} KiB)",
        device.flash_size,
        device.flash_size / 1024
    );
    println!("Erase unit:      {} bytes", device.erase_unit);
    println!(
        "Security lock:   {}",
        if device.locked { "locked" } else { "unlocked" }
    );

    target.deselect()?;
    Ok(())
}
