//! DP, MEM-AP and Cortex-M debug register definitions

use bitflags::bitflags;

/// Debug Port register selectors
pub mod dp {
    /// IDCODE (read)
    pub const IDCODE: u8 = 0x00;
    /// ABORT (write)
    pub const ABORT: u8 = 0x00;
    /// CTRL/STAT when SELECT.CTRLSEL is 0
    pub const CTRL_STAT: u8 = 0x04;
    /// Wire control register when SELECT.CTRLSEL is 1
    pub const WCR: u8 = 0x04;
    /// RESEND (read)
    pub const RESEND: u8 = 0x08;
    /// SELECT (write)
    pub const SELECT: u8 = 0x08;
    /// Read buffer holding the result of the last posted AP read
    pub const RDBUFF: u8 = 0x0C;
}

/// MEM-AP register selectors (bank 0)
pub mod ap {
    /// Control/Status Word
    pub const CSW: u8 = 0x00;
    /// Transfer Address Register
    pub const TAR: u8 = 0x04;
    /// Data Read/Write
    pub const DRW: u8 = 0x0C;
}

/// Cortex-M system control space registers used to stop the core
pub mod scs {
    /// Debug Halting Control and Status
    pub const DHCSR: u32 = 0xE000_EDF0;
    /// Debug Exception and Monitor Control
    pub const DEMCR: u32 = 0xE000_EDFC;
    /// Application Interrupt and Reset Control
    pub const AIRCR: u32 = 0xE000_ED0C;

    /// DBGKEY | C_HALT | C_DEBUGEN
    pub const DHCSR_HALT: u32 = 0xA05F_0003;
    /// VC_CORERESET: halt on the next reset
    pub const DEMCR_VC_CORERESET: u32 = 0x0000_0001;
    /// VECTKEY | SYSRESETREQ
    pub const AIRCR_SYSRESETREQ: u32 = 0x05FA_0004;
}

/// TAR auto-increment only covers the low 10 address bits
pub const TAR_WRAP: u32 = 0x400;

bitflags! {
    /// DP ABORT register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Abort: u32 {
        /// Abort the current AP transaction
        const DAPABORT = 1 << 0;
        /// Clear STICKYCMP
        const STKCMPCLR = 1 << 1;
        /// Clear STICKYERR
        const STKERRCLR = 1 << 2;
        /// Clear WDATAERR
        const WDERRCLR = 1 << 3;
        /// Clear STICKYORUN
        const ORUNERRCLR = 1 << 4;

        /// Every sticky error flag
        const CLEAR_ALL = Self::STKCMPCLR.bits()
            | Self::STKERRCLR.bits()
            | Self::WDERRCLR.bits()
            | Self::ORUNERRCLR.bits();
    }
}

bitflags! {
    /// DP CTRL/STAT register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CtrlStat: u32 {
        /// Overrun detection enable
        const ORUNDETECT = 1 << 0;
        /// Sticky overrun
        const STICKYORUN = 1 << 1;
        /// Sticky compare
        const STICKYCMP = 1 << 4;
        /// Sticky error
        const STICKYERR = 1 << 5;
        /// Last AP read was OK
        const READOK = 1 << 6;
        /// Write data error
        const WDATAERR = 1 << 7;
        /// Byte lane mask for pushed compare/verify
        const MASKLANE = 0xF << 8;
        /// Debug power-up request
        const CDBGPWRUPREQ = 1 << 28;
        /// Debug power-up acknowledge
        const CDBGPWRUPACK = 1 << 29;
        /// System power-up request
        const CSYSPWRUPREQ = 1 << 30;
        /// System power-up acknowledge
        const CSYSPWRUPACK = 1 << 31;

        /// Request both power domains
        const POWER_UP_REQ = Self::CDBGPWRUPREQ.bits() | Self::CSYSPWRUPREQ.bits();
        /// Both power domains acknowledged
        const POWER_UP_ACK = Self::CDBGPWRUPACK.bits() | Self::CSYSPWRUPACK.bits();
    }
}

bitflags! {
    /// MEM-AP Control/Status Word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Csw: u32 {
        /// 32-bit transfers
        const SIZE_WORD = 0b010;
        /// Increment TAR by the transfer size after each DRW access
        const ADDRINC_SINGLE = 0b01 << 4;
        /// Transfers permitted
        const DEVICE_EN = 1 << 6;
        /// HPROT: data access, privileged
        const HPROT = 0x03 << 24;
        /// Master type: debug
        const MASTER_DEBUG = 1 << 29;

        /// Word-sized, auto-incrementing, privileged debug access
        const DEFAULT = Self::SIZE_WORD.bits()
            | Self::ADDRINC_SINGLE.bits()
            | Self::DEVICE_EN.bits()
            | Self::HPROT.bits()
            | Self::MASTER_DEBUG.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_setup_values() {
        assert_eq!(Abort::CLEAR_ALL.bits(), 0x1E);
        assert_eq!(
            (CtrlStat::POWER_UP_REQ | CtrlStat::MASKLANE).bits(),
            0x5000_0F00
        );
        assert_eq!(Csw::DEFAULT.bits(), 0x2300_0052);
    }
}
