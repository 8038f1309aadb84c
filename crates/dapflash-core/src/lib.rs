//! dapflash-core - Core library for programming MCU flash over SWD
//!
//! This crate drives an ARM Debug Access Port through a probe that speaks
//! the SWD wire protocol, and builds per-family flash programming on top
//! of it.
//!
//! # Layers
//!
//! - [`probe`] - the capability contract a probe backend implements
//! - [`dap`] - debug link handling: line reset, power-up, MEM-AP word and
//!   block access
//! - [`flash`] - the flash algorithm framework shared by all families
//! - [`family`] - nRF5x, SAM D21, SAM D5x/E5x and STM32 implementations
//! - [`image`] - raw binary and Intel HEX ingestion
//!
//! # Example
//!
//! ```ignore
//! use dapflash_core::{family::Family, image, LinkConfig};
//!
//! fn flash_file<P: dapflash_core::probe::SwdProbe>(probe: &mut P, data: &[u8]) {
//!     let config = LinkConfig::default();
//!     let mut target = Family::Samd21.open(probe, config);
//!     target.target_connect(config.clock_hz)?;
//!     let device = target.select()?.ok_or("unknown device")?;
//!     println!("Found: {}", device);
//!     target.erase()?;
//!     let base = target.program_start(0, data.len() as u32)?;
//!     image::write_binary(&mut *target, data, base, Default::default(), &mut image::NoProgress)?;
//!     target.deselect()?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod dap;
pub mod device;
pub mod error;
pub mod family;
pub mod flash;
pub mod image;
pub mod probe;

pub use config::LinkConfig;
pub use device::{DeviceInfo, DeviceRecord};
pub use error::{Error, ImageError, Result};
pub use family::Family;
pub use flash::FlashTarget;
