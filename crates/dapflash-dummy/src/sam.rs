//! Device Service Unit model shared by the SAM chips

use log::debug;

const DSU_BASE: u32 = 0x4100_2000;
const DSU_END: u32 = 0x4100_4000;
const CTRL_STATUS: u32 = 0x4100_2100;
const DID: u32 = 0x4100_2118;

const CTRL_CE: u32 = 0x0000_0010;
const STATUSA_DONE: u32 = 0x0000_0100;
const STATUSA_CRSTEXT: u32 = 0x0000_0200;
const STATUSA_BERR: u32 = 0x0000_0400;
const STATUSA_MASK: u32 = 0x0000_1F00;
const STATUSB_PROT: u32 = 0x0001_0000;

/// System control space stays reachable while the part is protected
const SCS_BASE: u32 = 0xE000_0000;

/// Side effect the chip has to carry out after a DSU write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DsuAction {
    None,
    ChipErase,
}

/// DSU state: DID, security bit, reset extension and chip-erase status
#[derive(Debug)]
pub(crate) struct Dsu {
    did: u32,
    protected: bool,
    statusa: u32,
    /// Set by a chip erase that cleared the security bit
    needs_reset: bool,
}

impl Dsu {
    pub(crate) fn new(did: u32, protected: bool) -> Self {
        Self {
            did,
            protected,
            statusa: 0,
            needs_reset: false,
        }
    }

    pub(crate) fn decodes(addr: u32) -> bool {
        (DSU_BASE..DSU_END).contains(&addr)
    }

    /// Whether the core is held in reset extension
    pub(crate) fn in_reset_extension(&self) -> bool {
        self.statusa & STATUSA_CRSTEXT != 0
    }

    pub(crate) fn read(&self, addr: u32) -> Option<u32> {
        match addr {
            CTRL_STATUS => {
                let prot = if self.protected { STATUSB_PROT } else { 0 };
                Some(self.statusa | prot)
            }
            DID => Some(self.did),
            a if Self::decodes(a) => Some(0),
            _ => None,
        }
    }

    pub(crate) fn write(&mut self, addr: u32, value: u32) -> DsuAction {
        if addr != CTRL_STATUS {
            return DsuAction::None;
        }
        // STATUSA flags are write-one-to-clear
        self.statusa &= !(value & STATUSA_MASK);
        if value & CTRL_CE == 0 {
            return DsuAction::None;
        }

        debug!("dummy DSU: chip erase");
        self.statusa |= STATUSA_DONE;
        if self.protected {
            self.protected = false;
            self.needs_reset = true;
        }
        DsuAction::ChipErase
    }

    /// Report a bus error on the last DSU operation
    #[cfg(test)]
    pub(crate) fn flag_bus_error(&mut self) {
        self.statusa |= STATUSA_BERR;
    }

    /// Access rules enforced by the DSU security state
    pub(crate) fn blocked(&self, addr: u32) -> bool {
        if Self::decodes(addr) {
            return false;
        }
        if self.needs_reset {
            return true;
        }
        self.protected && addr < SCS_BASE
    }

    pub(crate) fn hardware_reset(&mut self, extended: bool) {
        self.needs_reset = false;
        self.statusa = if extended { STATUSA_CRSTEXT } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_of_protected_part_requires_reset() {
        let mut dsu = Dsu::new(0x1001_0305, true);
        assert!(dsu.blocked(0x0000_0000));
        assert!(!dsu.blocked(0xE000_EDF0));
        assert!(!dsu.blocked(DID));

        assert_eq!(dsu.write(CTRL_STATUS, CTRL_CE), DsuAction::ChipErase);
        assert_eq!(dsu.read(CTRL_STATUS), Some(STATUSA_DONE));
        assert!(dsu.blocked(0xE000_EDF0));

        dsu.hardware_reset(true);
        assert!(dsu.in_reset_extension());
        assert!(!dsu.blocked(0x0000_0000));
        dsu.write(CTRL_STATUS, STATUSA_CRSTEXT);
        assert!(!dsu.in_reset_extension());
    }

    #[test]
    fn test_status_flags_clear_on_write() {
        let mut dsu = Dsu::new(0, false);
        dsu.flag_bus_error();
        assert_eq!(dsu.read(CTRL_STATUS), Some(STATUSA_BERR));
        dsu.write(CTRL_STATUS, STATUSA_MASK);
        assert_eq!(dsu.read(CTRL_STATUS), Some(0));
    }
}
