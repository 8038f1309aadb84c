//! Probe capability contract
//!
//! A probe executes SWD transactions on behalf of the debug link layer.
//! The link layer never touches USB or GPIO itself; everything it needs
//! from the hardware goes through [`SwdProbe`].

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

/// Acknowledgement returned for a failed SWD transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Target asked the host to retry
    Wait,
    /// Sticky error flagged in CTRL/STAT
    Fault,
    /// Nothing drove the line during the ACK phase
    NoResponse,
    /// Read data failed its parity check
    Parity,
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ack::Wait => "WAIT",
            Ack::Fault => "FAULT",
            Ack::NoResponse => "no response",
            Ack::Parity => "parity error",
        };
        f.write_str(s)
    }
}

/// Errors reported by a probe backend
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The target did not answer with OK
    #[error("SWD transfer failed: {0}")]
    Ack(Ack),
    /// Failure in the host-to-probe transport
    #[error("probe transport error: {0}")]
    Transport(String),
    /// The probe cannot perform the requested operation
    #[error("probe does not support {0}")]
    Unsupported(&'static str),
}

/// Result type for probe operations
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

bitflags! {
    /// SWJ pins that can be driven directly
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Pins: u8 {
        /// SWCLK/TCK
        const SWCLK = 1 << 0;
        /// SWDIO/TMS
        const SWDIO = 1 << 1;
        /// nRESET
        const NRESET = 1 << 4;
    }
}

/// Output driver mode for [`SwdProbe::write_pins`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinDrive {
    /// Actively drive both levels
    #[default]
    PushPull,
    /// Drive low, float high
    OpenDrain,
}

/// SWD probe trait
///
/// Register selectors (`reg`) are the A[3:2] address bits expressed as a
/// byte offset: 0x0, 0x4, 0x8 or 0xC. AP accesses go to the AP and bank
/// chosen by the last DP SELECT write.
///
/// AP reads are posted: the value returned by `read_ap` is the result of
/// the *previous* AP read, and the value of the current one is fetched
/// later through `RDBUFF` or the next AP read.
pub trait SwdProbe {
    /// Claim the probe and enable its SWD interface
    fn connect(&mut self) -> ProbeResult<()>;

    /// Release the SWD interface
    fn disconnect(&mut self) -> ProbeResult<()>;

    /// Set the SWCLK frequency in Hz
    fn set_clock(&mut self, hz: u32) -> ProbeResult<()>;

    /// Clock out `bit_count` bits of `bits` on SWDIO, LSB first
    fn swj_sequence(&mut self, bit_count: u8, bits: u64) -> ProbeResult<()>;

    /// Read a DP register
    fn read_dp(&mut self, reg: u8) -> ProbeResult<u32>;

    /// Write a DP register
    fn write_dp(&mut self, reg: u8, value: u32) -> ProbeResult<()>;

    /// Read an AP register (posted)
    fn read_ap(&mut self, reg: u8) -> ProbeResult<u32>;

    /// Write an AP register
    fn write_ap(&mut self, reg: u8, value: u32) -> ProbeResult<()>;

    /// Write several values to the same AP register
    ///
    /// Probes with a batched transfer command should override this.
    fn write_ap_multiple(&mut self, reg: u8, values: &[u32]) -> ProbeResult<()> {
        for &value in values {
            self.write_ap(reg, value)?;
        }
        Ok(())
    }

    /// Read the same AP register `count` times (each read posted)
    fn read_ap_multiple(&mut self, reg: u8, count: usize) -> ProbeResult<Vec<u32>> {
        (0..count).map(|_| self.read_ap(reg)).collect()
    }

    /// Drive the pins selected by `mask` to the levels in `value`
    fn write_pins(&mut self, mask: Pins, drive: PinDrive, value: Pins) -> ProbeResult<()>;

    /// Pulse the target's hardware reset line
    fn reset(&mut self) -> ProbeResult<()>;
}

impl SwdProbe for Box<dyn SwdProbe> {
    fn connect(&mut self) -> ProbeResult<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> ProbeResult<()> {
        (**self).disconnect()
    }

    fn set_clock(&mut self, hz: u32) -> ProbeResult<()> {
        (**self).set_clock(hz)
    }

    fn swj_sequence(&mut self, bit_count: u8, bits: u64) -> ProbeResult<()> {
        (**self).swj_sequence(bit_count, bits)
    }

    fn read_dp(&mut self, reg: u8) -> ProbeResult<u32> {
        (**self).read_dp(reg)
    }

    fn write_dp(&mut self, reg: u8, value: u32) -> ProbeResult<()> {
        (**self).write_dp(reg, value)
    }

    fn read_ap(&mut self, reg: u8) -> ProbeResult<u32> {
        (**self).read_ap(reg)
    }

    fn write_ap(&mut self, reg: u8, value: u32) -> ProbeResult<()> {
        (**self).write_ap(reg, value)
    }

    fn write_ap_multiple(&mut self, reg: u8, values: &[u32]) -> ProbeResult<()> {
        (**self).write_ap_multiple(reg, values)
    }

    fn read_ap_multiple(&mut self, reg: u8, count: usize) -> ProbeResult<Vec<u32>> {
        (**self).read_ap_multiple(reg, count)
    }

    fn write_pins(&mut self, mask: Pins, drive: PinDrive, value: Pins) -> ProbeResult<()> {
        (**self).write_pins(mask, drive, value)
    }

    fn reset(&mut self) -> ProbeResult<()> {
        (**self).reset()
    }
}
