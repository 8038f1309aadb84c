//! Flash and verify commands

use std::fs::File;
use std::io::BufReader;

use dapflash_core::image::{self, ImageMode, ImageOptions};
use dapflash_core::FlashTarget;

use super::progress::IndicatifProgress;
use crate::cli::{ImageArgs, ImageFormat, TargetArgs};

/// What `run_flash` should do besides writing
#[derive(Debug, Clone, Copy)]
pub struct FlashOptions {
    /// Program or only compare
    pub mode: ImageMode,
    /// Chip-erase before programming
    pub erase: bool,
    /// Read back every chunk after writing it
    pub verify: bool,
}

impl FlashOptions {
    /// Options for a plain `verify` run
    pub fn verify_only() -> Self {
        Self {
            mode: ImageMode::VerifyOnly,
            erase: false,
            verify: true,
        }
    }
}

/// Program (or verify) an image file
pub fn run_flash(
    target_args: &TargetArgs,
    image_args: &ImageArgs,
    options: FlashOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = image_args.format();
    let file = File::open(&image_args.input)?;
    let file_len = file.metadata()?.len();
    println!(
        "Image {:?}: {} bytes ({:?})",
        image_args.input, file_len, format
    );

    let (mut probe, family) = super::open(target_args)?;
    let mut target = family.open(&mut *probe, target_args.link_config());
    super::select(&mut *target, target_args)?;

    let result = transfer(&mut *target, image_args, format, file, file_len, options);

    // Let the core run again even when the transfer failed
    if let Err(e) = target.deselect() {
        log::warn!("Failed to release the core: {}", e);
    }
    result?;

    match options.mode {
        ImageMode::Program => println!("Flashing complete"),
        ImageMode::VerifyOnly => println!("Verification successful"),
    }
    Ok(())
}

fn transfer(
    target: &mut dyn FlashTarget,
    image_args: &ImageArgs,
    format: ImageFormat,
    file: File,
    file_len: u64,
    options: FlashOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let image_options = ImageOptions {
        mode: options.mode,
        verify: options.verify,
        strict_hex: image_args.strict_hex,
    };

    let base = match options.mode {
        ImageMode::Program => {
            if options.erase {
                println!("Erasing chip...");
                target.erase()?;
            }
            // HEX records carry absolute addresses, so the session starts at 0
            let (offset, size) = match format {
                ImageFormat::Bin => (
                    image_args.base,
                    u32::try_from(file_len).map_err(|_| "Image larger than 4 GiB")?,
                ),
                ImageFormat::Hex => (0, 0),
            };
            let physical = target.program_start(offset, size)?;
            log::debug!("Session opened at 0x{:08X}", physical);
            physical
        }
        ImageMode::VerifyOnly => image_args.base,
    };

    match format {
        ImageFormat::Bin => {
            let mut progress = IndicatifProgress::new(Some(file_len));
            image::write_binary(
                target,
                BufReader::new(file),
                base,
                image_options,
                &mut progress,
            )?;
        }
        ImageFormat::Hex => {
            let mut progress = IndicatifProgress::new(None);
            image::write_hex(target, BufReader::new(file), image_options, &mut progress)?;
        }
    }
    Ok(())
}
