//! Error types for dapflash-core

use thiserror::Error;

use crate::probe::ProbeError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The probe rejected or failed a transaction
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// A status poll did not see the ready condition before the deadline
    #[error("timed out waiting for {operation} (status register 0x{addr:08X})")]
    Timeout {
        /// What was being waited on
        operation: &'static str,
        /// Register that was polled
        addr: u32,
    },

    /// Debug or system power domain did not acknowledge the power-up request
    #[error("debug power-up not acknowledged (CTRL/STAT = 0x{ctrl_stat:08X})")]
    PowerUp {
        /// Last CTRL/STAT value read
        ctrl_stat: u32,
    },

    /// Operation called in the wrong session state
    #[error("cannot {operation} while target is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the target was in
        state: &'static str,
    },

    /// Address does not satisfy the required alignment
    #[error("address 0x{addr:08X} is not aligned to {align} bytes")]
    Misaligned {
        /// Offending address
        addr: u32,
        /// Required alignment in bytes
        align: u32,
    },

    /// Transfer length does not satisfy the required alignment
    #[error("length {len} is not a multiple of {align} bytes")]
    MisalignedLength {
        /// Offending length
        len: usize,
        /// Required alignment in bytes
        align: u32,
    },

    /// Requested range does not fit in the device's flash
    #[error("range 0x{addr:08X}+0x{len:X} exceeds flash size 0x{flash_size:X}")]
    OutOfBounds {
        /// Start address
        addr: u32,
        /// Length in bytes
        len: u32,
        /// Flash size of the selected device
        flash_size: u32,
    },

    /// The device reports a security lock and must be chip-erased first
    #[error("device is locked, run a chip erase before programming")]
    DeviceLocked,

    /// User row contents failed the sanity check and were not written
    #[error("refusing to write user row: {0}")]
    InvalidUserRow(&'static str),

    /// Read-back did not match what was written
    #[error("verify failed at 0x{addr:08X}: expected 0x{expected:02X}, read 0x{found:02X}")]
    Verify {
        /// Address of the first mismatching byte
        addr: u32,
        /// Byte that was expected
        expected: u8,
        /// Byte that was read back
        found: u8,
    },

    /// Operation is not implemented for this device family
    #[error("{0} is not supported for this device family")]
    Unsupported(&'static str),

    /// Image could not be read or decoded
    #[error(transparent)]
    Image(#[from] ImageError),

    /// A chunk of an image failed to program or verify
    #[error("chunk at 0x{addr:08X} failed: {source}")]
    ChunkFailed {
        /// Start address of the failing chunk
        addr: u32,
        /// Underlying failure
        source: Box<Error>,
    },
}

/// Errors raised while reading an image source
#[derive(Debug, Error)]
pub enum ImageError {
    /// Underlying reader failed
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),

    /// A HEX record was malformed or failed its checksum
    #[error("invalid HEX record on line {line}: {source}")]
    Hex {
        /// 1-based line number
        line: usize,
        /// Decoder error
        source: ihex::ReaderError,
    },

    /// A HEX record was too short for its byte count or not hex at all
    #[error("malformed HEX record on line {line}: {reason}")]
    Record {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: &'static str,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
