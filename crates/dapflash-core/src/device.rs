//! Device tables and identification results

use std::fmt;

use crate::family::Family;

/// Static device table entry, keyed by the raw device-ID register value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Device-ID value matched by exact equality
    pub id: u32,
    /// Human-readable part name
    pub name: &'static str,
    /// Main flash size in bytes (0 when read from the chip)
    pub flash_size: u32,
    /// Erase unit size in bytes
    pub erase_unit: u32,
}

impl DeviceRecord {
    /// Build a table entry
    pub const fn new(id: u32, name: &'static str, flash_size: u32, erase_unit: u32) -> Self {
        Self {
            id,
            name,
            flash_size,
            erase_unit,
        }
    }
}

/// Find the entry whose ID equals `id`
pub fn lookup(table: &'static [DeviceRecord], id: u32) -> Option<&'static DeviceRecord> {
    table.iter().find(|r| r.id == id)
}

/// A device identified on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Family that matched
    pub family: Family,
    /// Raw ID register value
    pub id: u32,
    /// Part name, possibly refined with data read from the chip
    pub name: String,
    /// Main flash size in bytes
    pub flash_size: u32,
    /// Erase unit size in bytes
    pub erase_unit: u32,
    /// Whether the device reported a security lock at select time
    pub locked: bool,
}

impl DeviceInfo {
    /// Build from a table entry
    pub fn from_record(family: Family, record: &DeviceRecord) -> Self {
        Self {
            family,
            id: record.id,
            name: record.name.to_string(),
            flash_size: record.flash_size,
            erase_unit: record.erase_unit,
            locked: false,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ID 0x{:08X}, {} KiB flash",
            self.name,
            self.id,
            self.flash_size / 1024
        )?;
        if self.locked {
            write!(f, ", locked")?;
        }
        write!(f, ")")
    }
}
