//! Clock control units
//!
//! A [`Ccu`] owns one register window and every clock living in it. All
//! register traffic goes through the CCU lock; every mutating sequence is
//! additionally bracketed by the write-access password handshake.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;

use crate::clk::{core as core_clk, peri, pll, pll_chnl, ClockDesc, ClockKind, PllChannel, PllClock, RateRequest};
use crate::error::{Error, Result};
use crate::poll::{poll_until, Poll};
use crate::regs::{RegisterWindow, WR_ACCESS_OFFSET};
use crate::time::Hertz;

pub mod policy;

use policy::{CcuInterrupt, CcuPeriVolt, CcuPolicy, CcuVoltage, FreqPolicy, InterruptSource, StartMode};

/// Written to the access register to unlock (`| 1`) or lock CCU registers.
pub const CCU_ACCESS_PASSWORD: u32 = 0xA5A500;

/// Most clocks a single CCU may describe.
pub const MAX_CLOCKS: usize = 64;

/// CCU runtime configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct Config {
    pub access_password: u32,
    /// Gate status, trigger and policy engine polls.
    pub gate_poll: Poll,
    /// PLL lock poll.
    pub lock_poll: Poll,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_password: CCU_ACCESS_PASSWORD,
            gate_poll: Poll::new(2000, 1),
            lock_poll: Poll::new(1000, 1),
        }
    }
}

/// Register access for one CCU. Only ever used with the CCU lock held.
pub struct Io<W, D> {
    pub(crate) window: W,
    pub(crate) delay: D,
    pub(crate) config: Config,
    pub(crate) name: &'static str,
    write_enabled: bool,
}

impl<W: RegisterWindow, D> Io<W, D> {
    fn new(name: &'static str, window: W, delay: D, config: Config) -> Self {
        Self {
            window,
            delay,
            config,
            name,
            write_enabled: false,
        }
    }

    #[inline]
    pub(crate) fn read(&mut self, offset: u32) -> u32 {
        self.window.read(offset)
    }

    #[inline]
    pub(crate) fn write(&mut self, offset: u32, value: u32) {
        self.window.write(offset, value)
    }

    #[inline]
    pub(crate) fn modify(&mut self, offset: u32, f: impl FnOnce(u32) -> u32) {
        self.window.modify(offset, f)
    }

    pub(crate) fn write_enable(&mut self) {
        if self.write_enabled {
            error!("access already enabled for {}", self.name);
            return;
        }
        self.write_enabled = true;
        let password = self.config.access_password;
        self.write(WR_ACCESS_OFFSET, password | 1);
    }

    pub(crate) fn write_disable(&mut self) {
        if !self.write_enabled {
            error!("access wasn't enabled for {}", self.name);
            return;
        }
        self.write_enabled = false;
        let password = self.config.access_password;
        self.write(WR_ACCESS_OFFSET, password);
    }
}

impl<W: RegisterWindow, D: DelayNs> Io<W, D> {
    /// Poll until `bit` of the register at `offset` reads as `want`.
    pub(crate) fn wait_bit(&mut self, offset: u32, bit: u32, want: bool) -> bool {
        let mask = 1 << bit;
        let Io {
            window, delay, config, ..
        } = &mut *self;
        let done = poll_until(delay, config.gate_poll, || (window.read(offset) & mask != 0) == want);
        if !done {
            warn!(
                "{}/0x{:x} bit {} was never {}",
                self.name,
                offset,
                bit,
                if want { "set" } else { "clear" }
            );
        }
        done
    }
}

/// A register value applied once at the end of CCU bring-up.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fixup {
    pub offset: u32,
    /// Bits OR-ed into the register.
    pub set: u32,
}

impl Fixup {
    pub const fn new(offset: u32, set: u32) -> Self {
        Self { offset, set }
    }
}

/// Static description of a CCU and its clocks.
#[derive(Clone, Copy, Debug)]
pub struct CcuDesc {
    pub name: &'static str,
    pub policy: CcuPolicy,
    pub voltage: Option<CcuVoltage>,
    pub peri_volt: Option<CcuPeriVolt>,
    pub freq_policy: Option<FreqPolicy>,
    pub interrupt: Option<CcuInterrupt>,
    pub fixups: &'static [Fixup],
    pub clocks: &'static [ClockDesc],
}

impl CcuDesc {
    pub const fn new(name: &'static str, clocks: &'static [ClockDesc]) -> Self {
        Self {
            name,
            policy: CcuPolicy::NONE,
            voltage: None,
            peri_volt: None,
            freq_policy: None,
            interrupt: None,
            fixups: &[],
            clocks,
        }
    }

    pub const fn policy(self, policy: CcuPolicy) -> Self {
        Self { policy, ..self }
    }

    pub const fn voltage(self, voltage: CcuVoltage) -> Self {
        Self {
            voltage: Some(voltage),
            ..self
        }
    }

    pub const fn peri_volt(self, peri_volt: CcuPeriVolt) -> Self {
        Self {
            peri_volt: Some(peri_volt),
            ..self
        }
    }

    pub const fn freq_policy(self, freq_policy: FreqPolicy) -> Self {
        Self {
            freq_policy: Some(freq_policy),
            ..self
        }
    }

    pub const fn interrupt(self, interrupt: CcuInterrupt) -> Self {
        Self {
            interrupt: Some(interrupt),
            ..self
        }
    }

    pub const fn fixups(self, fixups: &'static [Fixup]) -> Self {
        Self { fixups, ..self }
    }
}

struct State<W, D> {
    io: Io<W, D>,
    /// Shadow copies of the clock descriptors.
    clocks: heapless::Vec<ClockDesc, MAX_CLOCKS>,
}

/// A clock control unit.
///
/// Clocks are addressed by their index in [`CcuDesc::clocks`].
pub struct Ccu<M: RawMutex, W, D> {
    desc: &'static CcuDesc,
    state: Mutex<M, RefCell<State<W, D>>>,
}

impl<M: RawMutex, W: RegisterWindow, D: DelayNs> Ccu<M, W, D> {
    /// Take ownership of a CCU's register window. Nothing is written until [`Ccu::init`].
    pub fn new(desc: &'static CcuDesc, window: W, delay: D, config: Config) -> Result<Self> {
        let clocks = heapless::Vec::from_slice(desc.clocks).map_err(|_| Error::RegistryFull)?;
        Ok(Self {
            desc,
            state: Mutex::new(RefCell::new(State {
                io: Io::new(desc.name, window, delay, config),
                clocks,
            })),
        })
    }

    /// Give back the register window and delay provider.
    pub fn release(self) -> (W, D) {
        let state = self.state.into_inner().into_inner();
        (state.io.window, state.io.delay)
    }

    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    pub fn desc(&self) -> &'static CcuDesc {
        self.desc
    }

    /// Index of the clock called `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.desc.clocks.iter().position(|c| c.name == name)
    }

    pub fn clock(&self, idx: usize) -> Result<&'static ClockDesc> {
        self.desc.clocks.get(idx).ok_or(Error::UnknownClock)
    }

    pub fn parents(&self, idx: usize) -> Result<&'static [&'static str]> {
        self.clock(idx).map(|c| c.parents())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State<W, D>) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    fn with_clock<R>(&self, idx: usize, f: impl FnOnce(&mut Io<W, D>, &'static str, &mut ClockKind) -> Result<R>) -> Result<R> {
        self.with_state(|state| {
            let clk = state.clocks.get_mut(idx).ok_or(Error::UnknownClock)?;
            f(&mut state.io, clk.name, &mut clk.kind)
        })
    }

    /// One-time bring-up: policy engine, voltage and frequency tables,
    /// interrupts, then every clock in declaration order.
    ///
    /// `rate_of` resolves PLL reference clocks by name. A clock failing to
    /// initialise doesn't stop the others; the first failure is returned.
    pub fn init(&self, mut rate_of: impl FnMut(&str) -> Option<Hertz>) -> Result<()> {
        let mut xtals: heapless::Vec<Option<Hertz>, MAX_CLOCKS> = heapless::Vec::new();
        for clk in self.desc.clocks {
            let xtal = match &clk.kind {
                ClockKind::Pll(p) => rate_of(p.xtal),
                _ => None,
            };
            // never overflows, `new` checked the clock count
            let _ = xtals.push(xtal);
        }

        let desc = self.desc;
        self.with_state(|state| {
            let State { io, clocks } = state;
            io.write_enable();

            let res = ccu_setup(io, desc);

            let mut first_err = None;
            for (clk, xtal) in clocks.iter_mut().zip(xtals.iter()) {
                if let Err(e) = clock_init(io, desc, clk, *xtal) {
                    error!("{}: failed to initialize {}", desc.name, clk.name);
                    first_err.get_or_insert(e);
                }
            }

            for fixup in desc.fixups {
                let set = fixup.set;
                io.modify(fixup.offset, |r| r | set);
            }

            io.write_disable();
            trace!("{}: initialized", desc.name);

            match first_err {
                Some(e) => Err(e),
                None => res,
            }
        })
    }

    pub fn enable(&self, idx: usize) -> Result<()> {
        self.with_clock(idx, |io, name, kind| match kind {
            ClockKind::Bus(clk) | ClockKind::Peri(clk) => peri::enable(io, name, clk),
            ClockKind::Pll(pll) => pll::enable(io, pll),
            ClockKind::PllChannel(chnl) => {
                pll_chnl::enable(io, chnl);
                Ok(())
            }
            ClockKind::Core(_) => Ok(()),
        })
    }

    /// Disabling a clock that can't be disabled succeeds quietly.
    pub fn disable(&self, idx: usize) -> Result<()> {
        self.with_clock(idx, |io, name, kind| match kind {
            ClockKind::Bus(clk) | ClockKind::Peri(clk) => peri::disable(io, name, clk),
            ClockKind::Pll(pll) => {
                pll::disable(io, pll);
                Ok(())
            }
            ClockKind::PllChannel(chnl) => {
                pll_chnl::disable(io, chnl);
                Ok(())
            }
            ClockKind::Core(_) => Ok(()),
        })
    }

    pub fn is_enabled(&self, idx: usize) -> Result<bool> {
        self.with_clock(idx, |io, _, kind| {
            Ok(match kind {
                ClockKind::Bus(clk) | ClockKind::Peri(clk) => peri::is_enabled(io, clk),
                ClockKind::Pll(pll) => pll::is_enabled(io, pll),
                ClockKind::PllChannel(chnl) => pll_chnl::is_enabled(io, chnl),
                ClockKind::Core(_) => true,
            })
        })
    }

    /// Current rate given the current parent's rate.
    pub fn recalc_rate(&self, idx: usize, parent_rate: Hertz) -> Result<Hertz> {
        self.with_clock(idx, |io, _, kind| {
            Ok(match kind {
                ClockKind::Peri(clk) => peri::recalc_rate(io, clk, parent_rate),
                ClockKind::Pll(pll) => pll::recalc_rate(io, pll, parent_rate),
                ClockKind::PllChannel(chnl) => pll_chnl::recalc_rate(io, chnl, parent_rate),
                ClockKind::Bus(_) | ClockKind::Core(_) => parent_rate,
            })
        })
    }

    /// Closest achievable rate from a parent running at `parent_rate`.
    pub fn round_rate(&self, idx: usize, rate: Hertz, parent_rate: Hertz) -> Result<Hertz> {
        self.with_clock(idx, |io, _, kind| {
            Ok(match kind {
                ClockKind::Peri(clk) => peri::round_rate(io, clk, rate, parent_rate),
                ClockKind::Pll(pll) => pll::round_rate(pll, rate, parent_rate),
                ClockKind::PllChannel(chnl) => pll_chnl::round_rate(chnl, rate, parent_rate),
                ClockKind::Bus(_) | ClockKind::Core(_) => parent_rate,
            })
        })
    }

    /// Pick the parent giving the smallest rate error.
    ///
    /// The current parent is kept unless another is strictly better.
    /// `parent_rate_of` maps a parent index to its rate; it's called without
    /// the CCU lock held. Parents it can't rate are skipped.
    pub fn determine_rate(
        &self,
        idx: usize,
        req: &mut RateRequest,
        mut parent_rate_of: impl FnMut(u8) -> Option<Hertz>,
    ) -> Result<()> {
        let clk = self.clock(idx)?;
        if req.no_reparent {
            warn!("{}: reparent restriction isn't honoured", clk.name);
        }

        let current = self.get_parent(idx)?;
        let current_rate = parent_rate_of(current).ok_or(Error::UnknownClock)?;
        let target = req.rate;

        let mut best_rate = self.round_rate(idx, target, current_rate)?;
        let mut best_delta = best_rate.abs_diff(target);
        req.best_parent = None;
        req.best_parent_rate = current_rate;

        let parent_count = clk.parents().len();
        if parent_count >= 2 {
            for which in 0..parent_count as u8 {
                if which == current {
                    continue;
                }
                let Some(parent_rate) = parent_rate_of(which) else {
                    continue;
                };
                let rate = self.round_rate(idx, target, parent_rate)?;
                let delta = rate.abs_diff(target);
                if delta < best_delta {
                    best_delta = delta;
                    best_rate = rate;
                    req.best_parent = Some(which);
                    req.best_parent_rate = parent_rate;
                }
            }
        }

        req.rate = best_rate;
        Ok(())
    }

    /// Re-rate a peripheral, PLL or PLL channel clock.
    ///
    /// Core clocks go through [`Ccu::set_core_rate`].
    pub fn set_rate(&self, idx: usize, rate: Hertz, parent_rate: Hertz) -> Result<()> {
        self.with_clock(idx, |io, name, kind| match kind {
            ClockKind::Peri(clk) => peri::set_rate(io, name, clk, rate, parent_rate),
            ClockKind::Pll(pll) => pll::set_rate(io, name, pll, rate, parent_rate).map(|_| ()),
            ClockKind::PllChannel(chnl) => pll_chnl::set_rate(io, name, chnl, rate, parent_rate),
            ClockKind::Bus(_) | ClockKind::Core(_) => Err(Error::Unsupported),
        })
    }

    /// Re-rate a core clock and the PLL channel and PLL feeding it.
    ///
    /// `xtal` is the PLL's reference rate.
    pub fn set_core_rate(&self, idx: usize, rate: Hertz, xtal: Hertz) -> Result<()> {
        let ClockKind::Core(core) = &self.clock(idx)?.kind else {
            return Err(Error::Unsupported);
        };
        let (chnl_name, chnl) = self.pll_channel(core.pll_chnl)?;
        let (pll_name, pll) = self.pll(chnl.parent)?;
        let freq_policy = self.desc.freq_policy.as_ref();

        self.with_state(|state| {
            core_clk::set_rate(&mut state.io, freq_policy, core, (pll_name, pll), (chnl_name, chnl), rate, xtal)
        })
    }

    fn pll_channel(&self, name: &str) -> Result<(&'static str, &'static PllChannel)> {
        match self.clock_named(name) {
            Some(ClockDesc {
                name,
                kind: ClockKind::PllChannel(chnl),
            }) => Ok((*name, chnl)),
            _ => Err(Error::UnknownClock),
        }
    }

    fn pll(&self, name: &str) -> Result<(&'static str, &'static PllClock)> {
        match self.clock_named(name) {
            Some(ClockDesc {
                name,
                kind: ClockKind::Pll(pll),
            }) => Ok((*name, pll)),
            _ => Err(Error::UnknownClock),
        }
    }

    fn clock_named(&self, name: &str) -> Option<&'static ClockDesc> {
        self.desc.clocks.iter().find(|c| c.name == name)
    }

    /// Index of the current parent in [`Ccu::parents`].
    pub fn get_parent(&self, idx: usize) -> Result<u8> {
        self.with_clock(idx, |io, _, kind| {
            Ok(match kind {
                ClockKind::Peri(clk) => peri::get_parent(io, clk),
                _ => 0,
            })
        })
    }

    pub fn set_parent(&self, idx: usize, index: u8) -> Result<()> {
        self.with_clock(idx, |io, name, kind| match kind {
            ClockKind::Peri(clk) => peri::set_parent(io, name, clk, index),
            _ => Err(Error::Unsupported),
        })
    }

    pub fn policy_engine_stop(&self) -> Result<()> {
        let policy = &self.desc.policy;
        self.with_state(|state| {
            let io = &mut state.io;
            io.write_enable();
            let res = policy::engine_stop(io, policy);
            io.write_disable();
            res
        })
    }

    pub fn policy_engine_start(&self, mode: StartMode) -> Result<()> {
        let policy = &self.desc.policy;
        self.with_state(|state| {
            let io = &mut state.io;
            io.write_enable();
            let res = policy::engine_start(io, policy, mode);
            io.write_disable();
            res
        })
    }

    /// Select frequency `id` for policy `slot` (0..=3).
    pub fn set_freq_policy(&self, slot: u8, id: u8) -> Result<()> {
        let fp = self.desc.freq_policy.as_ref().ok_or(Error::Unsupported)?;
        if slot as u32 >= policy::CCU_POLICY_COUNT {
            return Err(Error::Unsupported);
        }
        self.with_state(|state| {
            let io = &mut state.io;
            io.write_enable();
            let res = policy::set_freq_policy(io, fp, slot, id);
            io.write_disable();
            res
        })
    }

    pub fn set_interrupt_enabled(&self, source: InterruptSource, on: bool) -> Result<()> {
        let int = self.desc.interrupt.as_ref().ok_or(Error::Unsupported)?;
        self.with_state(|state| {
            let io = &mut state.io;
            io.write_enable();
            policy::set_interrupt(io, int, source, on);
            io.write_disable();
        });
        Ok(())
    }

    /// Raw interrupt status register.
    pub fn interrupt_status(&self) -> Result<u32> {
        let int = self.desc.interrupt.as_ref().ok_or(Error::Unsupported)?;
        Ok(self.with_state(|state| state.io.read(int.status_offset)))
    }
}

/// CCU-wide part of bring-up. Caller holds the lock with write access enabled.
fn ccu_setup<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, desc: &CcuDesc) -> Result<()> {
    let mut res = Ok(());

    if desc.policy.exists() {
        if let Err(e) = policy::engine_stop(io, &desc.policy) {
            error!("{}: could not stop policy engine", desc.name);
            res = Err(e);
        }
        policy::enable_all_policies(io, &desc.policy);
    }

    if let Some(voltage) = desc.voltage.as_ref() {
        for (slot, &id) in (0..=u8::MAX).zip(voltage.table) {
            if policy::set_voltage(io, voltage, slot, id).is_err() {
                error!("{}: no register for voltage slot {}", desc.name, slot);
            }
        }
    }

    if let Some(peri_volt) = desc.peri_volt.as_ref() {
        for (slot, &id) in (0..=u8::MAX).zip(peri_volt.table) {
            if policy::set_peri_voltage(io, peri_volt, slot, id).is_err() {
                error!("{}: no register for peripheral voltage slot {}", desc.name, slot);
            }
        }
    }

    if let Some(fp) = desc.freq_policy.as_ref() {
        for (slot, &id) in (0..=u8::MAX).zip(fp.table) {
            if policy::set_freq_policy(io, fp, slot, id).is_err() {
                error!("{}: no register for frequency policy slot {}", desc.name, slot);
            }
        }
    }

    if desc.policy.exists() {
        if let Err(e) = policy::engine_start(io, &desc.policy, StartMode::Sync) {
            error!("{}: could not start policy engine", desc.name);
            res = res.and(Err(e));
        }
    }

    if let Some(int) = desc.interrupt.as_ref() {
        policy::set_interrupt(io, int, InterruptSource::Active, false);
        policy::set_interrupt(io, int, InterruptSource::Target, false);
    }

    res
}

/// Caller holds the lock with write access enabled.
fn clock_init<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    desc: &CcuDesc,
    clk: &mut ClockDesc,
    xtal: Option<Hertz>,
) -> Result<()> {
    let name = clk.name;
    match &mut clk.kind {
        ClockKind::Bus(bus) => peri::bus_init(io, name, bus),
        ClockKind::Peri(peri) => peri::init(io, &desc.policy, name, peri),
        ClockKind::Pll(pll) => {
            let Some(xtal) = xtal else {
                error!("{}: unknown reference clock {}", name, pll.xtal);
                return Err(Error::UnknownClock);
            };
            pll::init(io, name, pll, xtal)
        }
        ClockKind::PllChannel(_) => Ok(()),
        ClockKind::Core(core) => core_clk::init(io, desc.freq_policy.as_ref(), core).inspect_err(|_| {
            error!("{}: no frequency policy slot {}", name, core.policy);
        }),
    }
}
