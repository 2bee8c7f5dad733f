//! Fixed, integer and fractional dividers
//!
//! Dividers are handled in "scaled" form: the register value plus
//! `2^frac_width`, which is the divisor multiplied by `2^frac_width`.
//! A field of 0 therefore divides by exactly 1, and with `frac_width`
//! fractional bits every step is `1 / 2^frac_width`.

use embedded_hal::delay::DelayNs;

use super::gate::{self, Gate};
use super::trigger::{self, Trigger};
use super::{div_round_closest, Field};
use crate::ccu::Io;
use crate::error::Result;
use crate::regs::RegisterWindow;
use crate::time::Hertz;

const BILLION: u64 = 1_000_000_000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Divider {
    /// Divides by a constant. Its scaled value is the constant itself.
    Fixed(u32),
    Variable(VariableDivider),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VariableDivider {
    pub field: Field,
    pub frac_width: u32,
    /// Shadow scaled divisor. `None` until read back from hardware.
    pub(crate) scaled: Option<u64>,
}

impl Divider {
    pub const fn fixed(value: u32) -> Self {
        Divider::Fixed(value)
    }

    pub const fn variable(offset: u32, shift: u32, width: u32) -> Self {
        Self::fractional(offset, shift, width, 0)
    }

    pub const fn fractional(offset: u32, shift: u32, width: u32, frac_width: u32) -> Self {
        Divider::Variable(VariableDivider {
            field: Field::new(offset, shift, width),
            frac_width,
            scaled: None,
        })
    }

    /// Initial scaled divisor, committed at init. Ignored for fixed dividers.
    pub const fn with_scaled(self, scaled: u64) -> Self {
        match self {
            Divider::Variable(v) => Divider::Variable(VariableDivider {
                scaled: Some(scaled),
                ..v
            }),
            fixed => fixed,
        }
    }

    pub const fn is_fixed(&self) -> bool {
        matches!(self, Divider::Fixed(_))
    }

    pub fn min_scaled(&self) -> u64 {
        match self {
            Divider::Fixed(v) => *v as u64,
            Divider::Variable(v) => v.scaled_value(0),
        }
    }

    pub fn max_scaled(&self) -> u64 {
        match self {
            Divider::Fixed(v) => *v as u64,
            Divider::Variable(v) => v.scaled_value(crate::bitfield::mask(0, v.field.width)),
        }
    }

    /// Scale a rate for division by this divider's scaled value.
    fn scale_rate(&self, rate: u64) -> u64 {
        match self {
            Divider::Fixed(_) => rate,
            Divider::Variable(v) => rate << v.frac_width,
        }
    }

    /// Scaled divisor closest to `whole + billionths / 1e9`.
    pub fn build_scaled(&self, whole: u32, billionths: u32) -> u64 {
        debug_assert!(whole != 0);
        debug_assert!((billionths as u64) < BILLION);

        let frac_width = match self {
            Divider::Fixed(_) => 0,
            Divider::Variable(v) => v.frac_width,
        };
        let combined = (whole as u64 * BILLION + billionths as u64) << frac_width;
        div_round_closest(combined, BILLION)
    }

    /// Shadow scaled divisor, if known.
    pub fn scaled(&self) -> Option<u64> {
        match self {
            Divider::Fixed(v) => Some(*v as u64),
            Divider::Variable(v) => v.scaled,
        }
    }
}

impl VariableDivider {
    pub(crate) const fn scaled_value(&self, reg_div: u32) -> u64 {
        reg_div as u64 + (1 << self.frac_width)
    }

    fn reg_value(&self, scaled: u64) -> u32 {
        debug_assert!(scaled >= self.scaled_value(0));
        debug_assert!(scaled <= self.scaled_value(crate::bitfield::mask(0, self.field.width)));
        (scaled - (1 << self.frac_width)) as u32
    }
}

/// Scaled divisor currently programmed in hardware.
pub(crate) fn read_scaled<W: RegisterWindow, D>(io: &mut Io<W, D>, div: &Divider) -> u64 {
    match div {
        Divider::Fixed(v) => *v as u64,
        Divider::Variable(v) => v.scaled_value(v.field.get(io)),
    }
}

/// Push the shadow divisor to hardware, enabling the gate around the change.
///
/// An unknown shadow value is read back from hardware instead. Caller holds
/// the lock with write access enabled.
pub(crate) fn commit<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    mut gate: Option<&mut Gate>,
    div: &mut VariableDivider,
    trig: Option<&Trigger>,
) -> Result<()> {
    let Some(scaled) = div.scaled else {
        div.scaled = Some(div.scaled_value(div.field.get(io)));
        return Ok(());
    };
    let reg_div = div.reg_value(scaled);

    // The clock has to run while its rate changes.
    let enabled = gate::is_enabled(io, gate.as_deref());
    if !enabled {
        gate::set_enabled(io, gate.as_deref_mut(), true)?;
    }

    div.field.set(io, reg_div);

    let fired = trigger::fire(io, trig);

    let restored = if enabled {
        Ok(())
    } else {
        gate::set_enabled(io, gate, false)
    };

    fired.and(restored)
}

pub(crate) fn init<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    gate: Option<&mut Gate>,
    div: Option<&mut Divider>,
    trig: Option<&Trigger>,
) -> Result<()> {
    match div {
        Some(Divider::Variable(v)) => commit(io, gate, v, trig),
        _ => Ok(()),
    }
}

/// Change a divider to `scaled`, inside its own write-access bracket.
///
/// The shadow value is restored if the commit fails.
pub(crate) fn write<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    gate: Option<&mut Gate>,
    div: &mut VariableDivider,
    trig: Option<&Trigger>,
    scaled: u64,
) -> Result<()> {
    let previous = div.scaled;
    if previous == Some(scaled) {
        return Ok(());
    }
    div.scaled = Some(scaled);

    io.write_enable();
    let res = commit(io, gate, div, trig);
    io.write_disable();

    if res.is_err() {
        div.scaled = previous;
    }
    res
}

/// Parent rate after the pre-divider, still scaled for `div`.
fn scaled_parent_rate<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    div: &Divider,
    pre_div: Option<&Divider>,
    parent_rate: Hertz,
) -> u64 {
    let parent = parent_rate.0 as u64;
    match pre_div {
        Some(pre_div) => {
            // Scale by both dividers before dividing by the pre-divider.
            let scaled_rate = div.scale_rate(pre_div.scale_rate(parent));
            div_round_closest(scaled_rate, read_scaled(io, pre_div))
        }
        None => div.scale_rate(parent),
    }
}

/// Output rate of a divider (and optional pre-divider) fed with `parent_rate`.
pub(crate) fn recalc_rate<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    div: Option<&Divider>,
    pre_div: Option<&Divider>,
    parent_rate: Hertz,
) -> Hertz {
    let Some(div) = div else {
        return parent_rate;
    };
    let scaled_parent = scaled_parent_rate(io, div, pre_div, parent_rate);
    let scaled_div = read_scaled(io, div);
    Hertz::saturating(div_round_closest(scaled_parent, scaled_div))
}

/// Closest achievable rate to `rate`, and the scaled divisor producing it.
///
/// The output rate falls as the divisor grows, so the best divisor is one of
/// the two bracketing `scaled_parent / rate`. Ties go to the smaller divisor.
/// A fixed divider reports what its current divisor gives.
pub(crate) fn round_rate<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    div: &Divider,
    pre_div: Option<&Divider>,
    rate: Hertz,
    parent_rate: Hertz,
) -> (Hertz, u64) {
    let scaled_parent = scaled_parent_rate(io, div, pre_div, parent_rate);
    let best = match div {
        Divider::Fixed(_) => read_scaled(io, div),
        Divider::Variable(_) => {
            let target = rate.0.max(1) as u64;
            let (min, max) = (div.min_scaled(), div.max_scaled());
            let low = (scaled_parent / target).clamp(min, max);
            let high = (low + 1).min(max);
            let error = |scaled| div_round_closest(scaled_parent, scaled).abs_diff(target);
            if error(high) < error(low) {
                high
            } else {
                low
            }
        }
    };
    (Hertz::saturating(div_round_closest(scaled_parent, best)), best)
}
