//! Clock gates and gate hysteresis
//!
//! A gate may be controlled by hardware, by software, or by either with a
//! select bit choosing which. Only gates currently under software control
//! ("software managed") are ever switched by this crate; for the others we
//! only program who is in charge.

use embedded_hal::delay::DelayNs;

use super::Bit;
use crate::ccu::Io;
use crate::error::{Error, Result};
use crate::regs::RegisterWindow;

/// Who drives a gate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateControl {
    /// Hardware only, software can't touch it.
    HwOnly,
    /// Software only.
    SwOnly,
    /// Hardware capable, software currently in control.
    HwSw,
    /// Hardware capable, hardware currently in control.
    HwSwAuto,
    /// Hardware in control, and the gate can't be disabled by software.
    HwEnable,
}

impl GateControl {
    pub const fn is_hw_controllable(self) -> bool {
        !matches!(self, GateControl::SwOnly)
    }

    pub const fn is_sw_controllable(self) -> bool {
        !matches!(self, GateControl::HwOnly)
    }

    pub const fn is_sw_managed(self) -> bool {
        matches!(self, GateControl::SwOnly | GateControl::HwSw)
    }

    pub const fn is_no_disable(self) -> bool {
        matches!(self, GateControl::HwEnable)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gate {
    pub offset: u32,
    pub status_bit: u32,
    pub en_bit: u32,
    pub hw_sw_sel_bit: u32,
    pub control: GateControl,
    pub(crate) enabled: bool,
}

impl Gate {
    const fn new(offset: u32, status_bit: u32, en_bit: u32, hw_sw_sel_bit: u32, control: GateControl) -> Self {
        Self {
            offset,
            status_bit,
            en_bit,
            hw_sw_sel_bit,
            control,
            // software managed gates start out enabled
            enabled: control.is_sw_managed(),
        }
    }

    /// Hardware/software gate, software in control.
    pub const fn hw_sw(offset: u32, status_bit: u32, en_bit: u32, hw_sw_sel_bit: u32) -> Self {
        Self::new(offset, status_bit, en_bit, hw_sw_sel_bit, GateControl::HwSw)
    }

    /// Hardware/software gate left to hardware ("autogate").
    pub const fn hw_sw_auto(offset: u32, status_bit: u32, en_bit: u32, hw_sw_sel_bit: u32) -> Self {
        Self::new(offset, status_bit, en_bit, hw_sw_sel_bit, GateControl::HwSwAuto)
    }

    /// Hardware controlled gate that software may not disable.
    pub const fn hw_enable(offset: u32, status_bit: u32, en_bit: u32, hw_sw_sel_bit: u32) -> Self {
        Self::new(offset, status_bit, en_bit, hw_sw_sel_bit, GateControl::HwEnable)
    }

    pub const fn sw_only(offset: u32, status_bit: u32, en_bit: u32) -> Self {
        Self::new(offset, status_bit, en_bit, 0, GateControl::SwOnly)
    }

    pub const fn hw_only(offset: u32, status_bit: u32) -> Self {
        Self::new(offset, status_bit, 0, 0, GateControl::HwOnly)
    }

    /// Desired state of a software managed gate.
    pub fn wants_enabled(&self) -> bool {
        self.enabled
    }

    fn status(&self) -> Bit {
        Bit::new(self.offset, self.status_bit)
    }
}

/// Gate hysteresis: a turn-off delay. When present both bits are set (high delay).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hyst {
    pub offset: u32,
    pub en_bit: u32,
    pub val_bit: u32,
}

impl Hyst {
    pub const fn new(offset: u32, en_bit: u32, val_bit: u32) -> Self {
        Self { offset, en_bit, val_bit }
    }
}

/// Gate status as reported by hardware. No gate means always running.
pub(crate) fn is_enabled<W: RegisterWindow, D>(io: &mut Io<W, D>, gate: Option<&Gate>) -> bool {
    match gate {
        Some(gate) => gate.status().is_set(io),
        None => true,
    }
}

/// Push the desired gate state to hardware.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn commit<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, gate: &Gate) -> bool {
    let control = gate.control;
    if !control.is_sw_controllable() {
        return true;
    }

    let mut reg_val = io.read(gate.offset);

    if control.is_hw_controllable() {
        let mask = 1 << gate.hw_sw_sel_bit;
        if control.is_sw_managed() {
            reg_val |= mask;
        } else {
            reg_val &= !mask;
        }
    }

    // A no-disable gate wants a 0 in its enable bit, it runs anyway.
    let mask = 1 << gate.en_bit;
    let enabled = control.is_sw_managed() && gate.enabled;
    if enabled && !control.is_no_disable() {
        reg_val |= mask;
    } else {
        reg_val &= !mask;
    }

    io.write(gate.offset, reg_val);

    if !control.is_sw_managed() {
        return true;
    }
    io.wait_bit(gate.offset, gate.status_bit, enabled)
}

/// Switch a software managed gate, reverting the shadow state if hardware didn't follow.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn set_enabled<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    gate: Option<&mut Gate>,
    enable: bool,
) -> Result<()> {
    let Some(gate) = gate else {
        return Ok(());
    };
    if !gate.control.is_sw_managed() {
        return Ok(());
    }
    if !enable && gate.control.is_no_disable() {
        warn!("ignoring disable request for no-disable gate");
        return Ok(());
    }
    if gate.enabled == enable {
        return Ok(());
    }

    gate.enabled = enable;
    if commit(io, gate) {
        Ok(())
    } else {
        gate.enabled = !enable;
        Err(Error::GatingFailure)
    }
}

pub(crate) fn init<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, gate: Option<&Gate>) -> Result<()> {
    match gate {
        Some(gate) if !commit(io, gate) => Err(Error::GatingFailure),
        _ => Ok(()),
    }
}

pub(crate) fn hyst_init<W: RegisterWindow, D>(io: &mut Io<W, D>, hyst: Option<&Hyst>) {
    if let Some(hyst) = hyst {
        let mask = (1 << hyst.en_bit) | (1 << hyst.val_bit);
        io.modify(hyst.offset, |r| r | mask);
    }
}
