//! Device Service Unit and reset handling shared by SAM D21 and SAM D5x/E5x

use log::{debug, info, warn};

use crate::dap::DebugTarget;
use crate::device::{lookup, DeviceInfo, DeviceRecord};
use crate::error::Result;
use crate::family::Family;
use crate::probe::{PinDrive, Pins, SwdProbe};

/// CTRL, STATUSA and STATUSB accessed as one word
pub(crate) const DSU_CTRL_STATUS: u32 = 0x4100_2100;
pub(crate) const DSU_DID: u32 = 0x4100_2118;

const DSU_CTRL_CE: u32 = 0x0000_0010;
const DSU_STATUSA_DONE: u32 = 0x0000_0100;
const DSU_STATUSA_CRSTEXT: u32 = 0x0000_0200;
const DSU_STATUSA_BERR: u32 = 0x0000_0400;
const DSU_STATUSA_FLAGS: u32 = 0x0000_1F00;
const DSU_STATUSB_PROT: u32 = 0x0001_0000;

/// Start of the user row on both families
pub(crate) const USER_ROW_ADDR: u32 = 0x0080_4000;

/// Hold the core in reset with SWCLK low, then reconnect
///
/// Releasing nRESET while SWCLK is held low makes the DSU keep the CPU in
/// reset extension until CRSTEXT is cleared.
pub(crate) fn reset_with_extension<P: SwdProbe + ?Sized>(dap: &mut DebugTarget<'_, P>) -> Result<()> {
    let mask = Pins::SWCLK | Pins::NRESET;
    dap.probe().write_pins(mask, PinDrive::PushPull, Pins::empty())?;
    dap.probe().write_pins(mask, PinDrive::PushPull, Pins::NRESET)?;
    dap.probe().write_pins(mask, PinDrive::PushPull, mask)?;

    let clock_hz = dap.config().clock_hz;
    dap.connect(clock_hz)?;
    dap.prepare()
}

/// Halt the core and release the reset extension
pub(crate) fn finish_reset<P: SwdProbe + ?Sized>(dap: &mut DebugTarget<'_, P>) -> Result<()> {
    dap.halt_core()?;
    dap.write_word(DSU_CTRL_STATUS, DSU_STATUSA_CRSTEXT)
}

/// Read DID and the security bit, and look the part up in `table`
pub(crate) fn identify<P: SwdProbe + ?Sized>(
    dap: &mut DebugTarget<'_, P>,
    family: Family,
    table: &'static [DeviceRecord],
) -> Result<Option<DeviceInfo>> {
    let did = dap.read_word(DSU_DID)?;
    let Some(record) = lookup(table, did) else {
        debug!("{}: unknown DSU DID 0x{:08X}", family, did);
        return Ok(None);
    };

    let mut device = DeviceInfo::from_record(family, record);
    device.locked = dap.read_word(DSU_CTRL_STATUS)? & DSU_STATUSB_PROT != 0;
    if device.locked {
        warn!("{} is locked, a chip erase is required before programming", device.name);
    }
    info!("Found {}", device);
    Ok(Some(device))
}

/// Select sequence common to both SAM families
pub(crate) fn select<P: SwdProbe + ?Sized>(
    dap: &mut DebugTarget<'_, P>,
    family: Family,
    table: &'static [DeviceRecord],
) -> Result<Option<DeviceInfo>> {
    reset_with_extension(dap)?;
    let Some(device) = identify(dap, family, table)? else {
        return Ok(None);
    };
    finish_reset(dap)?;
    dap.set_device(Some(device.clone()));
    Ok(Some(device))
}

/// Chip erase through the DSU
///
/// Erasing a locked part clears its security bit, after which the DAP
/// must be reset before any further access.
pub(crate) fn chip_erase<P: SwdProbe + ?Sized>(dap: &mut DebugTarget<'_, P>) -> Result<()> {
    info!("Erasing chip");
    dap.write_word(DSU_CTRL_STATUS, DSU_STATUSA_FLAGS)?;
    dap.write_word(DSU_CTRL_STATUS, DSU_CTRL_CE)?;
    dap.wait_for("chip erase", DSU_CTRL_STATUS, |t| {
        Ok(t.read_word(DSU_CTRL_STATUS)? & DSU_STATUSA_DONE != 0)
    })?;

    let status = dap.read_word(DSU_CTRL_STATUS)?;
    if status & DSU_STATUSA_BERR != 0 {
        warn!("DSU reported a bus error during chip erase");
    }

    let was_locked = dap.device().is_some_and(|d| d.locked);
    if was_locked {
        debug!("device was locked, resetting after erase");
        dap.probe().reset()?;
        reset_with_extension(dap)?;
        finish_reset(dap)?;
        let device = dap.device().cloned().map(|mut d| {
            d.locked = false;
            d
        });
        dap.set_device(device);
    }
    Ok(())
}

/// Fail if the selected device still reports a security lock
pub(crate) fn check_unlocked<P: SwdProbe + ?Sized>(dap: &DebugTarget<'_, P>) -> Result<()> {
    if dap.device().is_some_and(|d| d.locked) {
        return Err(crate::error::Error::DeviceLocked);
    }
    Ok(())
}
