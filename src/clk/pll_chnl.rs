//! PLL output channels
//!
//! Each channel divides its PLL by an integer `mdiv`. New divider values
//! only take effect once the load bit is set.

use super::{div_round_closest, Bit, Field, RATE_TOLERANCE_HZ};
use crate::ccu::Io;
use crate::error::{Error, Result};
use crate::regs::RegisterWindow;
use crate::time::Hertz;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllChannel {
    pub enable: Bit,
    pub load: Bit,
    pub mdiv: Field,
    pub parent: &'static str,
}

impl PllChannel {
    pub const fn new(parent: &'static str, enable: Bit, load: Bit, mdiv: Field) -> Self {
        Self {
            enable,
            load,
            mdiv,
            parent,
        }
    }

    /// Divider closest to `parent / rate`, in `1..=2^width`.
    pub fn best_mdiv(&self, rate: Hertz, parent_rate: Hertz) -> u32 {
        let target = rate.0.max(1) as u64;
        div_round_closest(parent_rate.0 as u64, target).clamp(1, self.mdiv.span() as u64) as u32
    }
}

pub(crate) fn enable<W: RegisterWindow, D>(io: &mut Io<W, D>, chnl: &PllChannel) {
    io.write_enable();
    chnl.enable.set(io);
    chnl.load.set(io);
    io.write_disable();
}

pub(crate) fn disable<W: RegisterWindow, D>(io: &mut Io<W, D>, chnl: &PllChannel) {
    io.write_enable();
    chnl.enable.clear(io);
    io.write_disable();
}

pub(crate) fn is_enabled<W: RegisterWindow, D>(io: &mut Io<W, D>, chnl: &PllChannel) -> bool {
    chnl.enable.is_set(io)
}

pub(crate) fn recalc_rate<W: RegisterWindow, D>(io: &mut Io<W, D>, chnl: &PllChannel, parent_rate: Hertz) -> Hertz {
    let mdiv = match chnl.mdiv.get(io) {
        0 => chnl.mdiv.span(),
        m => m,
    };
    parent_rate / mdiv
}

pub(crate) fn round_rate(chnl: &PllChannel, rate: Hertz, parent_rate: Hertz) -> Hertz {
    parent_rate / chnl.best_mdiv(rate, parent_rate)
}

pub(crate) fn set_rate<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    name: &str,
    chnl: &PllChannel,
    rate: Hertz,
    parent_rate: Hertz,
) -> Result<()> {
    let mdiv = chnl.best_mdiv(rate, parent_rate);
    if (parent_rate / mdiv).abs_diff(rate) > RATE_TOLERANCE_HZ {
        error!("invalid clock rate {} for PLL channel clock {}", rate.0, name);
        return Err(Error::InvalidRateRequest);
    }

    io.write_enable();
    // 2^width doesn't fit and is written as 0
    chnl.mdiv.set(io, mdiv & crate::bitfield::mask(0, chnl.mdiv.width));
    chnl.load.set(io);
    io.write_disable();
    Ok(())
}
