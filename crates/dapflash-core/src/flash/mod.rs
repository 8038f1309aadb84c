//! Flash algorithm framework
//!
//! Every device family implements [`FlashTarget`], the lifecycle shared by
//! all NVM controllers:
//!
//! ```text
//! Disconnected -> Connected -> Selected -> Programming -> Deselected
//!                                 |  ^
//!                                 erase
//! ```
//!
//! The chunking, padding, blank-skip and read-back policy lives in
//! [`program_chunks`] so each family only supplies its controller
//! primitives through [`ChunkProgrammer`].

mod program;

pub use program::{
    check_aligned, compare, is_erased, pad_chunk, program_chunks, ChunkProgrammer, ProgramStats,
    ERASED,
};

use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::family::Family;

/// Parameters of an open programming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashSession {
    /// Physical start address returned by `program_start`
    pub base: u32,
    /// Number of bytes the caller announced (0 if unknown)
    pub size: u32,
    /// Program unit of the device in bytes
    pub page_size: u32,
}

/// Lifecycle state of a flash target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetState {
    /// No link established
    #[default]
    Disconnected,
    /// Line reset done, device not identified yet
    Connected,
    /// Device identified and core halted
    Selected,
    /// Controller configured for writes
    Programming(FlashSession),
    /// Core released
    Deselected,
}

impl TargetState {
    /// Short name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            TargetState::Disconnected => "disconnected",
            TargetState::Connected => "connected",
            TargetState::Selected => "selected",
            TargetState::Programming(_) => "programming",
            TargetState::Deselected => "deselected",
        }
    }

    /// True once a device has been selected and not yet deselected
    pub fn is_selected(&self) -> bool {
        matches!(self, TargetState::Selected | TargetState::Programming(_))
    }

    /// Open session, if any
    pub fn session(&self) -> Option<&FlashSession> {
        match self {
            TargetState::Programming(session) => Some(session),
            _ => None,
        }
    }

    /// Fail unless a device is selected
    pub fn require_selected(&self, operation: &'static str) -> Result<()> {
        if self.is_selected() {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    /// Fail unless `program_start` has opened a session
    pub fn require_session(&self, operation: &'static str) -> Result<FlashSession> {
        self.session().copied().ok_or_else(|| self.invalid(operation))
    }

    /// Fail unless a link is up
    pub fn require_connected(&self, operation: &'static str) -> Result<()> {
        match self {
            TargetState::Disconnected => Err(self.invalid(operation)),
            _ => Ok(()),
        }
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.name(),
        }
    }
}

/// A device family's flash programming capability
///
/// Call order is `target_connect`, `select`, then any number of `erase`,
/// `program_start` + `program_flash`, `read_flash`, and finally `deselect`.
/// Calls out of order fail with [`Error::InvalidState`].
pub trait FlashTarget {
    /// Family implemented by this target
    fn family(&self) -> Family;

    /// Current lifecycle state
    fn state(&self) -> TargetState;

    /// Device found by the last successful `select`
    fn device(&self) -> Option<&DeviceInfo>;

    /// Reconnect the probe at `clock_hz` and reset the SWD line
    fn target_connect(&mut self, clock_hz: u32) -> Result<()>;

    /// Power up the debug domain, halt the core and identify the device
    ///
    /// Returns `Ok(None)` when the ID register matches nothing in this
    /// family's table, so the caller can try another family.
    fn select(&mut self) -> Result<Option<DeviceInfo>>;

    /// Let the core run again and end the session
    fn deselect(&mut self) -> Result<()>;

    /// Erase the whole chip
    fn erase(&mut self) -> Result<()>;

    /// Open a programming session for `size` bytes at flash offset `offset`
    ///
    /// Returns the physical address that corresponds to `offset`.
    fn program_start(&mut self, offset: u32, size: u32) -> Result<u32>;

    /// Program `buf` at `addr`, chunked to the device's program unit
    fn program_flash(&mut self, addr: u32, buf: &[u8], verify: bool) -> Result<()>;

    /// Read `len` bytes of flash starting at `addr`
    fn read_flash(&mut self, addr: u32, len: usize) -> Result<Vec<u8>>;

    /// Compare flash contents at `addr` with `expected`
    fn verify_flash(&mut self, addr: u32, expected: &[u8]) -> Result<()> {
        let len = expected.len().next_multiple_of(crate::dap::WORD_SIZE as usize);
        let actual = self.read_flash(addr, len)?;
        compare(addr, expected, &actual)
    }
}

/// Check that `[offset, offset + size)` fits in the selected device
pub fn check_bounds(device: Option<&DeviceInfo>, offset: u32, size: u32) -> Result<()> {
    let Some(device) = device else {
        return Ok(());
    };
    if device.flash_size == 0 {
        return Ok(());
    }
    let end = u64::from(offset) + u64::from(size);
    if end > u64::from(device.flash_size) {
        return Err(Error::OutOfBounds {
            addr: offset,
            len: size,
            flash_size: device.flash_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(flash_size: u32) -> DeviceInfo {
        DeviceInfo {
            family: Family::Nrf5x,
            id: 0x52840,
            name: "nRF52840".into(),
            flash_size,
            erase_unit: 4096,
            locked: false,
        }
    }

    #[test]
    fn test_state_guards() {
        let state = TargetState::Connected;
        assert!(state.require_connected("select").is_ok());
        assert!(matches!(
            state.require_selected("erase"),
            Err(Error::InvalidState {
                operation: "erase",
                state: "connected"
            })
        ));
        assert!(TargetState::Disconnected.require_connected("select").is_err());

        let session = FlashSession {
            base: 0x2000,
            size: 0x100,
            page_size: 256,
        };
        let state = TargetState::Programming(session);
        assert!(state.is_selected());
        assert_eq!(state.require_session("program").unwrap(), session);
        assert!(TargetState::Selected.require_session("program").is_err());
    }

    #[test]
    fn test_check_bounds() {
        let dev = device(0x1000);
        assert!(check_bounds(Some(&dev), 0, 0x1000).is_ok());
        assert!(matches!(
            check_bounds(Some(&dev), 0x800, 0x801),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(check_bounds(Some(&device(0)), 0, u32::MAX).is_ok());
        assert!(check_bounds(None, 0, u32::MAX).is_ok());
    }
}
