//! SAM user row (fuse) commands

use dapflash_core::dap::DebugTarget;
use dapflash_core::family::{Samd21, Samx5, UserRow};
use dapflash_core::probe::SwdProbe;
use dapflash_core::{Family, FlashTarget};

use crate::cli::TargetArgs;

/// The fuse operations both SAM families provide
trait UserRowAccess: FlashTarget {
    fn read_row(&mut self) -> dapflash_core::Result<UserRow>;
    fn reset_row(&mut self) -> dapflash_core::Result<bool>;
}

impl<P: SwdProbe + ?Sized> UserRowAccess for Samd21<'_, P> {
    fn read_row(&mut self) -> dapflash_core::Result<UserRow> {
        self.fuse_read()
    }

    fn reset_row(&mut self) -> dapflash_core::Result<bool> {
        self.reset_fuses()
    }
}

impl<P: SwdProbe + ?Sized> UserRowAccess for Samx5<'_, P> {
    fn read_row(&mut self) -> dapflash_core::Result<UserRow> {
        self.fuse_read()
    }

    fn reset_row(&mut self) -> dapflash_core::Result<bool> {
        self.reset_fuses()
    }
}

/// Run `op` on a connected and selected SAM target
fn with_sam_target<F>(args: &TargetArgs, op: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&mut dyn UserRowAccess) -> Result<(), Box<dyn std::error::Error>>,
{
    let (mut probe, family) = super::open(args)?;
    let dap = DebugTarget::with_config(&mut *probe, args.link_config());

    let mut target: Box<dyn UserRowAccess + '_> = match family {
        Family::Samd21 => Box::new(Samd21::new(dap)),
        Family::Samx5 => Box::new(Samx5::new(dap)),
        other => return Err(format!("{} has no user row", other).into()),
    };
    super::select(&mut *target, args)?;

    let result = op(&mut *target);
    target.deselect()?;
    result
}

/// Print the user row as little-endian words
pub fn run_fuses_show(args: &TargetArgs) -> Result<(), Box<dyn std::error::Error>> {
    with_sam_target(args, |target| {
        let row = target.read_row()?;
        println!("User row:");
        for (i, line) in row.as_bytes().chunks(16).enumerate() {
            let words: Vec<String> = (0..line.len() / 4)
                .map(|w| format!("{:08X}", row.word(i * 4 + w)))
                .collect();
            println!("  +0x{:02X}: {}", i * 16, words.join(" "));
        }
        Ok(())
    })
}

/// Clear bootloader protection and region locks
pub fn run_fuses_reset(args: &TargetArgs) -> Result<(), Box<dyn std::error::Error>> {
    with_sam_target(args, |target| {
        if target.reset_row()? {
            println!("User row rewritten, power-cycle the device to apply");
        } else {
            println!("User row already at defaults, nothing written");
        }
        Ok(())
    })
}
