//! Clock descriptors and the per-kind clock engines
//!
//! A CCU's clocks are described by a `const` table of [`ClockDesc`]. The
//! descriptors double as the shadow state: the CCU keeps a mutable copy and
//! the engines in the submodules update it as they commit to hardware.

use crate::bitfield;
use crate::ccu::Io;
use crate::regs::RegisterWindow;
use crate::time::Hertz;

pub mod core;
pub mod divider;
pub mod gate;
pub mod peri;
pub mod pll;
pub mod pll_chnl;
pub mod selector;
pub mod trigger;

pub use self::core::CoreClock;
pub use divider::{Divider, VariableDivider};
pub use gate::{Gate, GateControl, Hyst};
pub use peri::PeriClock;
pub use pll::{Desense, DesenseTarget, PllClock, PllConfigTable, PLL_CFG_THOLD_MAX};
pub use pll_chnl::PllChannel;
pub use selector::Selector;
pub use trigger::Trigger;

/// Largest rate error, in Hz, tolerated by the PLL and PLL channel engines.
pub const RATE_TOLERANCE_HZ: u32 = 100;

/// A register bitfield.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    pub offset: u32,
    pub shift: u32,
    pub width: u32,
}

impl Field {
    pub const fn new(offset: u32, shift: u32, width: u32) -> Self {
        Self { offset, shift, width }
    }

    /// `2^width`: the value a zero field stands for in "zero means max" encodings.
    pub const fn span(&self) -> u32 {
        1 << self.width
    }

    pub(crate) fn get<W: RegisterWindow, D>(&self, io: &mut Io<W, D>) -> u32 {
        bitfield::extract(io.read(self.offset), self.shift, self.width)
    }

    /// Read-modify-write of the field only.
    pub(crate) fn set<W: RegisterWindow, D>(&self, io: &mut Io<W, D>, val: u32) {
        let (shift, width) = (self.shift, self.width);
        io.modify(self.offset, |r| bitfield::replace(r, shift, width, val));
    }
}

/// A single control or status bit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bit {
    pub offset: u32,
    pub bit: u32,
}

impl Bit {
    pub const fn new(offset: u32, bit: u32) -> Self {
        Self { offset, bit }
    }

    pub const fn mask(&self) -> u32 {
        1 << self.bit
    }

    pub(crate) fn is_set<W: RegisterWindow, D>(&self, io: &mut Io<W, D>) -> bool {
        io.read(self.offset) & self.mask() != 0
    }

    pub(crate) fn set<W: RegisterWindow, D>(&self, io: &mut Io<W, D>) {
        let mask = self.mask();
        io.modify(self.offset, |r| r | mask);
    }

    pub(crate) fn clear<W: RegisterWindow, D>(&self, io: &mut Io<W, D>) {
        let mask = self.mask();
        io.modify(self.offset, |r| r & !mask);
    }
}

/// Per-clock policy bit: the first of four consecutive policy mask registers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockPolicy {
    pub offset: u32,
    pub bit: u32,
}

impl ClockPolicy {
    pub const fn new(offset: u32, bit: u32) -> Self {
        Self { offset, bit }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ClockKind {
    /// Gate and hysteresis only.
    Bus(PeriClock),
    Core(CoreClock),
    Peri(PeriClock),
    Pll(PllClock),
    PllChannel(PllChannel),
}

/// One clock of a CCU.
#[derive(Clone, Copy, Debug)]
pub struct ClockDesc {
    pub name: &'static str,
    pub kind: ClockKind,
}

impl ClockDesc {
    pub const fn bus(name: &'static str, data: PeriClock) -> Self {
        Self {
            name,
            kind: ClockKind::Bus(data),
        }
    }

    pub const fn peri(name: &'static str, data: PeriClock) -> Self {
        Self {
            name,
            kind: ClockKind::Peri(data),
        }
    }

    pub const fn core(name: &'static str, data: CoreClock) -> Self {
        Self {
            name,
            kind: ClockKind::Core(data),
        }
    }

    pub const fn pll(name: &'static str, data: PllClock) -> Self {
        Self {
            name,
            kind: ClockKind::Pll(data),
        }
    }

    pub const fn pll_channel(name: &'static str, data: PllChannel) -> Self {
        Self {
            name,
            kind: ClockKind::PllChannel(data),
        }
    }

    /// Parent clock names, in selector index order.
    pub fn parents(&self) -> &[&'static str] {
        match &self.kind {
            ClockKind::Bus(d) | ClockKind::Peri(d) => d.parents,
            ClockKind::Core(c) => ::core::slice::from_ref(&c.pll_chnl),
            ClockKind::Pll(p) => ::core::slice::from_ref(&p.xtal),
            ClockKind::PllChannel(c) => ::core::slice::from_ref(&c.parent),
        }
    }
}

/// A rate negotiation request, filled in by `determine_rate`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RateRequest {
    /// Requested rate on the way in, best achievable rate on the way out.
    pub rate: Hertz,
    /// Index of the parent that achieves `rate`, if it differs from the current one.
    pub best_parent: Option<u8>,
    pub best_parent_rate: Hertz,
    /// Caller asks not to reparent. Not honoured, only warned about.
    pub no_reparent: bool,
}

impl RateRequest {
    pub const fn new(rate: Hertz) -> Self {
        Self {
            rate,
            best_parent: None,
            best_parent_rate: Hertz(0),
            no_reparent: false,
        }
    }
}

/// Round-to-nearest unsigned division.
#[inline]
pub(crate) const fn div_round_closest(n: u64, d: u64) -> u64 {
    (n + d / 2) / d
}
