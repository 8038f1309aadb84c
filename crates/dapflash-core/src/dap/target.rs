//! Debug link to one SWD target

use std::time::Instant;

use log::{debug, trace};

use super::regs::{ap, dp, scs, Abort, CtrlStat, Csw, TAR_WRAP};
use crate::config::LinkConfig;
use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::probe::SwdProbe;

/// Transfer granularity of the MEM-AP
pub const WORD_SIZE: u32 = 4;

/// JTAG-to-SWD switch pattern, sent LSB first
const JTAG_TO_SWD: u64 = 0xE79E;
/// At least 50 cycles with SWDIO high
const LINE_RESET_BITS: u8 = 51;
const LINE_RESET: u64 = (1 << LINE_RESET_BITS) - 1;

/// An attached SWD target
///
/// Holds a borrowed probe for the lifetime of a session and implements the
/// DP/AP protocol on top of it: line reset, power-up, and word or block
/// access to the target's memory map through MEM-AP 0.
pub struct DebugTarget<'a, P: SwdProbe + ?Sized> {
    probe: &'a mut P,
    config: LinkConfig,
    link_reset: bool,
    device: Option<DeviceInfo>,
}

impl<'a, P: SwdProbe + ?Sized> DebugTarget<'a, P> {
    /// Wrap a probe using the default link configuration
    pub fn new(probe: &'a mut P) -> Self {
        Self::with_config(probe, LinkConfig::default())
    }

    /// Wrap a probe with an explicit link configuration
    pub fn with_config(probe: &'a mut P, config: LinkConfig) -> Self {
        Self {
            probe,
            config,
            link_reset: false,
            device: None,
        }
    }

    /// Current link configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Whether a line reset has completed since the last connect
    pub fn is_link_reset(&self) -> bool {
        self.link_reset
    }

    /// Device identified by the last successful select
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Record the selected device
    pub fn set_device(&mut self, device: Option<DeviceInfo>) {
        self.device = device;
    }

    /// Direct access to the probe for pin-level sequencing
    pub fn probe(&mut self) -> &mut P {
        self.probe
    }

    /// Reconnect the probe at `clock_hz` and reset the line
    ///
    /// Returns the DP IDCODE read at the end of the line reset.
    pub fn connect(&mut self, clock_hz: u32) -> Result<u32> {
        self.link_reset = false;
        self.probe.disconnect()?;
        self.probe.connect()?;
        self.probe.set_clock(clock_hz)?;
        self.config.clock_hz = clock_hz;
        debug!("SWD connected at {} Hz", clock_hz);
        self.reset_link()
    }

    /// Line reset, JTAG-to-SWD switch, line reset, idle; then read IDCODE
    pub fn reset_link(&mut self) -> Result<u32> {
        self.link_reset = false;
        self.probe.swj_sequence(LINE_RESET_BITS, LINE_RESET)?;
        self.probe.swj_sequence(16, JTAG_TO_SWD)?;
        self.probe.swj_sequence(LINE_RESET_BITS, LINE_RESET)?;
        self.probe.swj_sequence(8, 0)?;
        let idcode = self.probe.read_dp(dp::IDCODE)?;
        self.link_reset = true;
        debug!("SWD line reset, DPIDR 0x{:08X}", idcode);
        Ok(idcode)
    }

    /// Clear errors, power up the debug and system domains, configure CSW
    pub fn prepare(&mut self) -> Result<()> {
        if !self.link_reset {
            return Err(Error::InvalidState {
                operation: "prepare",
                state: "not line-reset",
            });
        }

        self.probe.write_dp(dp::ABORT, Abort::CLEAR_ALL.bits())?;
        self.probe.write_dp(dp::SELECT, 0)?;
        self.probe.write_dp(
            dp::CTRL_STAT,
            (CtrlStat::POWER_UP_REQ | CtrlStat::MASKLANE).bits(),
        )?;

        let mut ctrl_stat = 0;
        let powered = self.poll(|t| {
            ctrl_stat = t.probe.read_dp(dp::CTRL_STAT)?;
            Ok(CtrlStat::from_bits_retain(ctrl_stat).contains(CtrlStat::POWER_UP_ACK))
        });
        match powered {
            Ok(()) => {}
            Err(Error::Timeout { .. }) => return Err(Error::PowerUp { ctrl_stat }),
            Err(e) => return Err(e),
        }

        self.probe.write_ap(ap::CSW, Csw::DEFAULT.bits())?;
        debug!("debug domain powered up");
        Ok(())
    }

    /// Read one word through the posted-read pipeline
    pub fn read_word(&mut self, addr: u32) -> Result<u32> {
        self.probe.write_ap(ap::TAR, addr)?;
        // Stale value from the previous posted read
        self.probe.read_ap(ap::DRW)?;
        let value = self.probe.read_dp(dp::RDBUFF)?;
        trace!("read  0x{:08X} -> 0x{:08X}", addr, value);
        Ok(value)
    }

    /// Write one word and confirm it through RDBUFF
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        trace!("write 0x{:08X} <- 0x{:08X}", addr, value);
        self.probe.write_ap(ap::TAR, addr)?;
        self.probe.write_ap(ap::DRW, value)?;
        self.probe.read_dp(dp::RDBUFF)?;
        Ok(())
    }

    /// Write a little-endian byte buffer starting at `addr`
    ///
    /// Address and length must be word aligned. The transfer is split at
    /// every 1 KiB boundary where TAR auto-increment stops carrying.
    pub fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        check_block(addr, data.len())?;
        trace!("write block 0x{:08X} ({} bytes)", addr, data.len());

        for (seg_addr, range) in segments(addr, data.len()) {
            let words: Vec<u32> = data[range]
                .chunks_exact(WORD_SIZE as usize)
                .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                .collect();
            self.probe.write_ap(ap::TAR, seg_addr)?;
            self.probe.write_ap_multiple(ap::DRW, &words)?;
            self.probe.read_dp(dp::RDBUFF)?;
        }
        Ok(())
    }

    /// Read exactly `size` bytes starting at `addr`
    ///
    /// Each segment primes the pipeline with one DRW read whose result is
    /// discarded, then drains the final posted value from RDBUFF.
    pub fn read_block(&mut self, addr: u32, size: usize) -> Result<Vec<u8>> {
        check_block(addr, size)?;
        trace!("read block 0x{:08X} ({} bytes)", addr, size);

        let mut out = Vec::with_capacity(size);
        for (seg_addr, range) in segments(addr, size) {
            let count = range.len() / WORD_SIZE as usize;
            self.probe.write_ap(ap::TAR, seg_addr)?;
            self.probe.read_ap(ap::DRW)?;
            let words = self.probe.read_ap_multiple(ap::DRW, count)?;
            self.probe.read_dp(dp::RDBUFF)?;
            out.extend(words.iter().take(count).flat_map(|w| w.to_le_bytes()));
        }
        Ok(out)
    }

    /// Halt the core and arm vector catch on the next reset
    pub fn halt_core(&mut self) -> Result<()> {
        self.write_word(scs::DHCSR, scs::DHCSR_HALT)?;
        self.write_word(scs::DEMCR, scs::DEMCR_VC_CORERESET)?;
        self.write_word(scs::AIRCR, scs::AIRCR_SYSRESETREQ)
    }

    /// Disarm vector catch and reset the core so it runs freely
    pub fn release_core(&mut self) -> Result<()> {
        self.write_word(scs::DEMCR, 0)?;
        self.write_word(scs::AIRCR, scs::AIRCR_SYSRESETREQ)
    }

    /// Poll `ready` until it returns true or the poll timeout elapses
    ///
    /// `addr` names the status register for the timeout error.
    pub fn wait_for<F>(&mut self, operation: &'static str, addr: u32, ready: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<bool>,
    {
        self.poll(ready).map_err(|e| match e {
            Error::Timeout { .. } => Error::Timeout { operation, addr },
            e => e,
        })
    }

    /// Wait until any of the bits in `mask` read back set at `addr`
    pub fn wait_bits(&mut self, operation: &'static str, addr: u32, mask: u32) -> Result<()> {
        self.wait_for(operation, addr, |t| Ok(t.read_word(addr)? & mask != 0))
    }

    fn poll<F>(&mut self, mut ready: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<bool>,
    {
        let deadline = Instant::now() + self.config.poll_timeout;
        loop {
            if ready(self)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                // One last look so a slow host doesn't miss a late ready
                return if ready(self)? {
                    Ok(())
                } else {
                    Err(Error::Timeout {
                        operation: "poll",
                        addr: 0,
                    })
                };
            }
        }
    }
}

fn check_block(addr: u32, len: usize) -> Result<()> {
    if addr % WORD_SIZE != 0 {
        return Err(Error::Misaligned {
            addr,
            align: WORD_SIZE,
        });
    }
    if len % WORD_SIZE as usize != 0 {
        return Err(Error::MisalignedLength {
            len,
            align: WORD_SIZE,
        });
    }
    Ok(())
}

/// Split `[addr, addr + len)` at TAR wrap boundaries
///
/// Yields the segment start address and the matching byte range of the
/// caller's buffer.
fn segments(addr: u32, len: usize) -> impl Iterator<Item = (u32, std::ops::Range<usize>)> {
    let mut offset = 0usize;
    std::iter::from_fn(move || {
        if offset >= len {
            return None;
        }
        let seg_addr = addr.wrapping_add(offset as u32);
        let room = (TAR_WRAP - (seg_addr % TAR_WRAP)) as usize;
        let seg_len = room.min(len - offset);
        let range = offset..offset + seg_len;
        offset += seg_len;
        Some((seg_addr, range))
    })
}
