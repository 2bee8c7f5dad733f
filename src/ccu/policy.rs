//! CCU policy engine
//!
//! A CCU runs one of four policies (deep sleep, economy, normal, turbo).
//! Each clock with a policy bit has one mask register per policy saying
//! whether it runs under that policy. The engine must be stopped while the
//! masks change, then restarted with a GO request.

use embedded_hal::delay::DelayNs;

use super::Io;
use crate::clk::{Bit, ClockPolicy};
use crate::error::{Error, Result};
use crate::regs::RegisterWindow;

/// Number of policies, and of consecutive mask registers per clock.
pub const CCU_POLICY_COUNT: u32 = 4;
/// Mask value enabling every clock under a policy.
pub const CCU_POLICY_ENABLE_ALL: u32 = 0x7FFF_FFFF;
/// Peripheral voltage slots in the peripheral voltage register.
pub const CCU_PERI_VOLT_COUNT: u32 = 2;

/// Policy control register: GO plus its active-load/auto-copy qualifiers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PolicyCtl {
    pub offset: u32,
    pub go_bit: u32,
    pub ac_bit: u32,
    pub atl_bit: u32,
}

impl PolicyCtl {
    pub const fn new(offset: u32, go_bit: u32, ac_bit: u32, atl_bit: u32) -> Self {
        Self {
            offset,
            go_bit,
            ac_bit,
            atl_bit,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CcuPolicy {
    /// Software update enable ("LVM_EN"); stops the engine.
    pub lvm_en: Option<Bit>,
    pub control: Option<PolicyCtl>,
    pub mask1: Option<u32>,
    pub mask2: Option<u32>,
}

const fn nonzero(offset: u32) -> Option<u32> {
    if offset == 0 {
        None
    } else {
        Some(offset)
    }
}

impl CcuPolicy {
    /// No policy engine.
    pub const NONE: Self = Self {
        lvm_en: None,
        control: None,
        mask1: None,
        mask2: None,
    };

    /// Offsets of 0 leave the corresponding register out.
    pub const fn new(lvm_en: Bit, control: PolicyCtl, mask1: u32, mask2: u32) -> Self {
        Self {
            lvm_en: if lvm_en.offset == 0 { None } else { Some(lvm_en) },
            control: if control.offset == 0 { None } else { Some(control) },
            mask1: nonzero(mask1),
            mask2: nonzero(mask2),
        }
    }

    pub const fn exists(&self) -> bool {
        self.lvm_en.is_some()
    }
}

/// Voltage ids per policy: 4 bit ids, 8 bits apart, slots 0..=3 in
/// `offset1` and 4..=7 in `offset2`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CcuVoltage {
    pub offset1: u32,
    pub offset2: Option<u32>,
    pub table: &'static [u8],
}

impl CcuVoltage {
    pub const fn new(offset1: u32, offset2: u32, table: &'static [u8]) -> Self {
        Self {
            offset1,
            offset2: nonzero(offset2),
            table,
        }
    }
}

/// Peripheral voltage ids: 4 bit ids, 8 bits apart.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CcuPeriVolt {
    pub offset: u32,
    pub table: &'static [u8],
}

impl CcuPeriVolt {
    pub const fn new(offset: u32, table: &'static [u8]) -> Self {
        Self { offset, table }
    }
}

/// Frequency ids per policy: 3 bit ids, 8 bits apart.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FreqPolicy {
    pub offset: u32,
    pub table: &'static [u8],
}

impl FreqPolicy {
    pub const fn new(offset: u32, table: &'static [u8]) -> Self {
        Self { offset, table }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CcuInterrupt {
    pub enable_offset: u32,
    pub status_offset: u32,
}

impl CcuInterrupt {
    pub const fn new(enable_offset: u32, status_offset: u32) -> Self {
        Self {
            enable_offset,
            status_offset,
        }
    }
}

/// CCU interrupt sources. The discriminant is the bit number.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum InterruptSource {
    /// Target policy reached.
    Target = 0,
    /// Active policy changed.
    Active = 1,
}

/// How a restarted engine applies the target policy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartMode {
    /// Select the active load and wait for voltage and frequency to settle.
    Sync,
    /// Ramp in the background and auto-copy the target load when stable.
    Async,
}

/// Stop the policy engine so policy registers can be updated.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn engine_stop<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, policy: &CcuPolicy) -> Result<()> {
    let Some(lvm) = policy.lvm_en else {
        return Ok(());
    };

    if !io.wait_bit(lvm.offset, lvm.bit, false) {
        error!("ccu {} policy engine already stopped", io.name);
        return Err(Error::PolicyEngineStall);
    }

    // no read-modify-write
    io.write(lvm.offset, lvm.mask());

    if !io.wait_bit(lvm.offset, lvm.bit, false) {
        error!("ccu {} policy engine never stopped", io.name);
        return Err(Error::PolicyEngineStall);
    }
    Ok(())
}

/// Restart the policy engine.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn engine_start<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    policy: &CcuPolicy,
    mode: StartMode,
) -> Result<()> {
    let Some(ctl) = policy.control else {
        return Ok(());
    };

    if !io.wait_bit(ctl.offset, ctl.go_bit, false) {
        error!("ccu {} policy engine wouldn't go idle", io.name);
        return Err(Error::PolicyEngineStall);
    }

    let mut mask = 1 << ctl.go_bit;
    mask |= match mode {
        StartMode::Sync => 1 << ctl.atl_bit,
        StartMode::Async => 1 << ctl.ac_bit,
    };
    io.write(ctl.offset, mask);

    if !io.wait_bit(ctl.offset, ctl.go_bit, false) {
        error!("ccu {} policy engine never started", io.name);
        return Err(Error::PolicyEngineStall);
    }
    Ok(())
}

/// Enable a clock under all four policies.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn clock_policy_init<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    ccu_policy: &CcuPolicy,
    policy: &ClockPolicy,
) -> Result<()> {
    engine_stop(io, ccu_policy).inspect_err(|_| {
        error!("unable to stop CCU {} policy engine", io.name);
    })?;

    // TODO: take per-policy enables from the clock description instead of enabling all four
    let mask = 1 << policy.bit;
    for i in 0..CCU_POLICY_COUNT {
        io.modify(policy.offset + 4 * i, |r| r | mask);
    }

    engine_start(io, ccu_policy, StartMode::Sync).inspect_err(|_| {
        error!("unable to restart CCU {} policy engine", io.name);
    })
}

/// Program every policy mask register with [`CCU_POLICY_ENABLE_ALL`].
pub(crate) fn enable_all_policies<W: RegisterWindow, D>(io: &mut Io<W, D>, policy: &CcuPolicy) {
    for i in 0..CCU_POLICY_COUNT {
        if let Some(mask1) = policy.mask1 {
            io.write(mask1 + 4 * i, CCU_POLICY_ENABLE_ALL);
        }
        if let Some(mask2) = policy.mask2 {
            io.write(mask2 + 4 * i, CCU_POLICY_ENABLE_ALL);
        }
    }
}

pub(crate) fn set_voltage<W: RegisterWindow, D>(io: &mut Io<W, D>, voltage: &CcuVoltage, slot: u8, id: u8) -> Result<()> {
    let (offset, shift) = match (slot, voltage.offset2) {
        (0..=3, _) => (voltage.offset1, slot as u32 * 8),
        (4..=7, Some(offset2)) => (offset2, (slot as u32 - 4) * 8),
        _ => return Err(Error::Unsupported),
    };
    let id = id as u32 & 0xf;
    io.modify(offset, |r| (r & !(0xf << shift)) | (id << shift));
    Ok(())
}

pub(crate) fn set_peri_voltage<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    peri_volt: &CcuPeriVolt,
    slot: u8,
    id: u8,
) -> Result<()> {
    if slot as u32 >= CCU_PERI_VOLT_COUNT {
        return Err(Error::Unsupported);
    }
    let shift = slot as u32 * 8;
    let id = id as u32 & 0xf;
    io.modify(peri_volt.offset, |r| (r & !(0xf << shift)) | (id << shift));
    Ok(())
}

pub(crate) fn set_freq_policy<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    freq_policy: &FreqPolicy,
    slot: u8,
    id: u8,
) -> Result<()> {
    if slot as u32 >= CCU_POLICY_COUNT {
        return Err(Error::Unsupported);
    }
    let shift = slot as u32 * 8;
    let id = id as u32 & 0x7;
    io.modify(freq_policy.offset, |r| (r & !(0x7 << shift)) | (id << shift));
    Ok(())
}

pub(crate) fn set_interrupt<W: RegisterWindow, D>(io: &mut Io<W, D>, int: &CcuInterrupt, source: InterruptSource, on: bool) {
    let mask = 1 << source as u32;
    io.modify(int.enable_offset, |r| if on { r | mask } else { r & !mask });
}
