//! User row (fuse) image and NVM write-mode guard

use std::ops::{Deref, DerefMut};

use log::{debug, warn};

use crate::dap::DebugTarget;
use crate::error::{Error, Result};
use crate::flash::{is_erased, ERASED};
use crate::probe::SwdProbe;

/// Bytes of the user row that are read and rewritten
pub const USER_ROW_SIZE: usize = 64;

/// In-memory copy of a SAM user row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    bytes: [u8; USER_ROW_SIZE],
}

impl UserRow {
    /// Wrap raw row contents
    pub fn new(bytes: [u8; USER_ROW_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build from a slice, padding or truncating to the row size
    pub fn from_slice(data: &[u8]) -> Self {
        let mut bytes = [ERASED; USER_ROW_SIZE];
        let n = data.len().min(USER_ROW_SIZE);
        bytes[..n].copy_from_slice(&data[..n]);
        Self { bytes }
    }

    /// Raw contents
    pub fn as_bytes(&self) -> &[u8; USER_ROW_SIZE] {
        &self.bytes
    }

    /// Little-endian word `index`
    pub fn word(&self, index: usize) -> u32 {
        let b = &self.bytes[index * 4..index * 4 + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Replace little-endian word `index`
    pub fn set_word(&mut self, index: usize, value: u32) {
        self.bytes[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reject rows that would read back as all zeros or all ones
    ///
    /// Either pattern leaves the part with nonsense fuse settings, so such
    /// a row is never committed.
    pub fn validate(&self) -> Result<()> {
        if self.bytes.iter().all(|&b| b == 0x00) {
            return Err(Error::InvalidUserRow("row is all zeros"));
        }
        if is_erased(&self.bytes) {
            return Err(Error::InvalidUserRow("row is all ones"));
        }
        Ok(())
    }

    /// Repair a row stored as two mirrored halves
    ///
    /// If exactly one half is erased it is restored from the other. If both
    /// are erased, `defaults` is written to the start of each half. Returns
    /// true if the row was changed.
    pub fn recover_mirrored(&mut self, defaults: &[u8]) -> bool {
        const HALF: usize = USER_ROW_SIZE / 2;
        let (primary, backup) = self.bytes.split_at_mut(HALF);

        match (is_erased(primary), is_erased(backup)) {
            (true, false) => {
                debug!("user row primary half erased, restoring from backup");
                primary.copy_from_slice(backup);
                true
            }
            (false, true) => {
                debug!("user row backup half erased, restoring from primary");
                backup.copy_from_slice(primary);
                true
            }
            (true, true) => {
                warn!("user row fully erased, using factory defaults");
                let n = defaults.len().min(HALF);
                primary[..n].copy_from_slice(&defaults[..n]);
                backup[..n].copy_from_slice(&defaults[..n]);
                true
            }
            (false, false) => false,
        }
    }
}

/// Scoped NVM controller write-mode override
///
/// On entry the register at `reg` is read, saved and replaced; when the
/// guard drops, on success or failure, the saved value is written back.
pub struct NvmWriteMode<'g, 'a, P: SwdProbe + ?Sized> {
    dap: &'g mut DebugTarget<'a, P>,
    reg: u32,
    saved: u32,
}

impl<'g, 'a, P: SwdProbe + ?Sized> NvmWriteMode<'g, 'a, P> {
    /// Apply `update` to the register at `reg` until the guard drops
    pub fn enter<F>(dap: &'g mut DebugTarget<'a, P>, reg: u32, update: F) -> Result<Self>
    where
        F: FnOnce(u32) -> u32,
    {
        let saved = dap.read_word(reg)?;
        let value = update(saved);
        dap.write_word(reg, value)?;
        debug!("NVM mode 0x{:08X}: 0x{:08X} -> 0x{:08X}", reg, saved, value);
        Ok(Self { dap, reg, saved })
    }
}

impl<'a, P: SwdProbe + ?Sized> Deref for NvmWriteMode<'_, 'a, P> {
    type Target = DebugTarget<'a, P>;

    fn deref(&self) -> &Self::Target {
        &*self.dap
    }
}

impl<'a, P: SwdProbe + ?Sized> DerefMut for NvmWriteMode<'_, 'a, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.dap
    }
}

impl<P: SwdProbe + ?Sized> Drop for NvmWriteMode<'_, '_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.dap.write_word(self.reg, self.saved) {
            warn!(
                "failed to restore NVM mode register 0x{:08X} to 0x{:08X}: {}",
                self.reg, self.saved, e
            );
        }
    }
}
