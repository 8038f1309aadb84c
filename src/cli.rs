//! CLI argument parsing

use crate::probes;
use clap::{Parser, Subcommand, ValueEnum};
use dapflash_core::config::{DEFAULT_CLOCK_HZ, DEFAULT_POLL_TIMEOUT};
use dapflash_core::{Family, LinkConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Generate dynamic help text for the probe argument
fn probe_help() -> String {
    format!("Probe to use [available: {}]", probes::probe_names_short())
}

#[derive(Parser)]
#[command(name = "dapflash")]
#[command(author, version, about = "MCU flash programmer over SWD", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Probe and link options shared across commands
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Probe to use, with optional parameters (e.g. dummy:chip=samd21)
    #[arg(short, long, help = probe_help())]
    pub probe: String,

    /// Device family (auto-detected if not specified)
    #[arg(short, long)]
    pub family: Option<Family>,

    /// SWD clock in Hz
    #[arg(long, default_value_t = DEFAULT_CLOCK_HZ)]
    pub clock: u32,

    /// Timeout for each status poll in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_TIMEOUT.as_millis() as u64)]
    pub timeout_ms: u64,
}

impl TargetArgs {
    /// Link configuration from the command-line options
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::default()
            .with_clock(self.clock)
            .with_poll_timeout(Duration::from_millis(self.timeout_ms))
    }
}

/// Image file format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Raw binary written at --base
    Bin,
    /// Intel HEX, addresses taken from the records
    Hex,
}

impl ImageFormat {
    /// Pick the format from the file extension, defaulting to binary
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex") => {
                ImageFormat::Hex
            }
            _ => ImageFormat::Bin,
        }
    }
}

/// Image options shared by flash and verify
#[derive(clap::Args, Debug, Clone)]
pub struct ImageArgs {
    /// Image file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Image format (guessed from the extension if not specified)
    #[arg(long, value_enum)]
    pub format: Option<ImageFormat>,

    /// Flash offset for binary images (hex, e.g., 0x2000)
    #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
    pub base: u32,

    /// Reject HEX records with a bad length or checksum
    #[arg(long)]
    pub strict_hex: bool,
}

impl ImageArgs {
    /// Effective image format
    pub fn format(&self) -> ImageFormat {
        self.format
            .unwrap_or_else(|| ImageFormat::from_path(&self.input))
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Program an image into flash
    #[command(alias = "write")]
    Flash {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        image: ImageArgs,

        /// Don't chip-erase before programming
        #[arg(long)]
        no_erase: bool,

        /// Skip read-back after each chunk
        #[arg(long)]
        no_verify: bool,

        /// Only compare flash against the image, never write
        #[arg(long, conflicts_with_all = ["no_erase", "no_verify"])]
        verify_only: bool,
    },

    /// Compare flash contents against an image
    Verify {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Erase the whole chip
    Erase {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write one nRF UICR word
    Uicr {
        #[command(flatten)]
        target: TargetArgs,

        /// UICR word address (hex, e.g., 0x10001014)
        #[arg(value_parser = parse_hex_u32)]
        addr: u32,

        /// Value to write (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        value: u32,
    },

    /// SAM user row (fuse) operations
    #[command(subcommand)]
    Fuses(FuseCommands),

    /// Identify the connected device
    Info {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List available probes
    ListProbes,

    /// List supported devices
    ListDevices {
        /// Filter by family
        #[arg(long)]
        family: Option<Family>,
    },
}

/// User row subcommands (SAM D21 and SAM D5x/E5x)
#[derive(Subcommand)]
pub enum FuseCommands {
    /// Print the user row
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Clear bootloader protection and region locks
    Reset {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0x2000"), Ok(0x2000));
        assert_eq!(parse_hex_u32("4096"), Ok(4096));
        assert!(parse_hex_u32("0xZZ").is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ImageFormat::from_path(Path::new("bl.hex")), ImageFormat::Hex);
        assert_eq!(ImageFormat::from_path(Path::new("BL.HEX")), ImageFormat::Hex);
        assert_eq!(ImageFormat::from_path(Path::new("bl.bin")), ImageFormat::Bin);
        assert_eq!(ImageFormat::from_path(Path::new("firmware")), ImageFormat::Bin);
    }

    #[test]
    fn test_flash_args() {
        let cli = Cli::try_parse_from([
            "dapflash",
            "flash",
            "--probe",
            "dummy:chip=samd21",
            "--family",
            "samd21",
            "--input",
            "bl.bin",
            "--base",
            "0x2000",
            "--no-verify",
        ])
        .unwrap();
        match cli.command {
            Commands::Flash {
                target,
                image,
                no_verify,
                verify_only,
                ..
            } => {
                assert_eq!(target.family, Some(Family::Samd21));
                assert_eq!(target.link_config(), LinkConfig::default());
                assert_eq!(image.base, 0x2000);
                assert!(no_verify);
                assert!(!verify_only);
            }
            _ => panic!("expected flash command"),
        }
    }
}
