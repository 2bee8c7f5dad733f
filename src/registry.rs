//! Clock registry
//!
//! Owns every CCU plus the fixed-rate reference sources feeding them, and
//! resolves clocks by name across CCUs. Rates are computed by walking the
//! parent chain from the clock up to a source.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;

use crate::ccu::{Ccu, CcuDesc, Config};
use crate::clk::{ClockKind, RateRequest};
use crate::error::{Error, Result};
use crate::regs::RegisterWindow;
use crate::time::Hertz;

pub const MAX_CCUS: usize = 8;
pub const MAX_SOURCES: usize = 8;
/// Longest parent chain walked before giving up.
pub const MAX_DEPTH: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CcuHandle(usize);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockHandle {
    /// A fixed-rate reference source.
    Source(usize),
    /// Clock `clock` of CCU `ccu`.
    Ccu { ccu: usize, clock: usize },
}

pub struct Registry<M: RawMutex, W, D> {
    sources: heapless::Vec<(&'static str, Hertz), MAX_SOURCES>,
    ccus: heapless::Vec<Ccu<M, W, D>, MAX_CCUS>,
}

impl<M: RawMutex, W: RegisterWindow, D: DelayNs> Default for Registry<M, W, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, W: RegisterWindow, D: DelayNs> Registry<M, W, D> {
    pub const fn new() -> Self {
        Self {
            sources: heapless::Vec::new(),
            ccus: heapless::Vec::new(),
        }
    }

    /// Add a fixed-rate reference clock, e.g. the crystal.
    pub fn add_source(&mut self, name: &'static str, rate: Hertz) -> Result<()> {
        self.sources.push((name, rate)).map_err(|_| Error::RegistryFull)
    }

    /// Take over a CCU and bring it up.
    ///
    /// Clock initialisation failures are logged; the CCU is registered anyway.
    pub fn register(&mut self, desc: &'static CcuDesc, window: W, delay: D, config: Config) -> Result<CcuHandle> {
        if self.ccus.is_full() {
            return Err(Error::RegistryFull);
        }

        let ccu = Ccu::new(desc, window, delay, config)?;
        if ccu.init(|name| self.rate_of(name)).is_err() {
            error!("{} initialization had errors", desc.name);
        } else {
            debug!("{} initialized", desc.name);
        }

        let handle = CcuHandle(self.ccus.len());
        self.ccus.push(ccu).map_err(|_| Error::RegistryFull)?;
        Ok(handle)
    }

    pub fn ccu(&self, handle: CcuHandle) -> Option<&Ccu<M, W, D>> {
        self.ccus.get(handle.0)
    }

    /// Sources shadow CCU clocks of the same name; earlier CCUs shadow later ones.
    pub fn lookup(&self, name: &str) -> Option<ClockHandle> {
        if let Some(i) = self.sources.iter().position(|(n, _)| *n == name) {
            return Some(ClockHandle::Source(i));
        }
        self.ccus.iter().enumerate().find_map(|(ccu, c)| {
            c.find(name).map(|clock| ClockHandle::Ccu { ccu, clock })
        })
    }

    fn source(&self, i: usize) -> Result<&(&'static str, Hertz)> {
        self.sources.get(i).ok_or(Error::UnknownClock)
    }

    fn ccu_at(&self, i: usize) -> Result<&Ccu<M, W, D>> {
        self.ccus.get(i).ok_or(Error::UnknownClock)
    }

    pub fn name(&self, handle: ClockHandle) -> Result<&'static str> {
        match handle {
            ClockHandle::Source(i) => Ok(self.source(i)?.0),
            ClockHandle::Ccu { ccu, clock } => Ok(self.ccu_at(ccu)?.clock(clock)?.name),
        }
    }

    /// Handle of the current parent; `None` for sources and parentless clocks.
    pub fn parent(&self, handle: ClockHandle) -> Result<Option<ClockHandle>> {
        let (ccu, clock) = match handle {
            ClockHandle::Source(i) => {
                self.source(i)?;
                return Ok(None);
            }
            ClockHandle::Ccu { ccu, clock } => (self.ccu_at(ccu)?, clock),
        };

        let parents = ccu.parents(clock)?;
        if parents.is_empty() {
            return Ok(None);
        }
        let index = ccu.get_parent(clock)?;
        let name = parents.get(index as usize).ok_or(Error::InvalidParent)?;
        self.lookup(name).map(Some).ok_or(Error::UnknownClock)
    }

    /// Current rate, computed from the root of the parent chain down.
    pub fn rate(&self, handle: ClockHandle) -> Result<Hertz> {
        let mut chain: heapless::Vec<(usize, usize), MAX_DEPTH> = heapless::Vec::new();
        let mut node = handle;
        let base = loop {
            match node {
                ClockHandle::Source(i) => break self.source(i)?.1,
                ClockHandle::Ccu { ccu, clock } => {
                    chain.push((ccu, clock)).map_err(|_| Error::TreeTooDeep)?;
                    match self.parent(node)? {
                        Some(parent) => node = parent,
                        None => break Hertz(0),
                    }
                }
            }
        };

        chain
            .iter()
            .rev()
            .try_fold(base, |rate, &(ccu, clock)| self.ccu_at(ccu)?.recalc_rate(clock, rate))
    }

    fn rate_of(&self, name: &str) -> Option<Hertz> {
        self.lookup(name).and_then(|h| self.rate(h).ok())
    }

    pub fn enable(&self, handle: ClockHandle) -> Result<()> {
        match handle {
            ClockHandle::Source(i) => self.source(i).map(|_| ()),
            ClockHandle::Ccu { ccu, clock } => self.ccu_at(ccu)?.enable(clock),
        }
    }

    pub fn disable(&self, handle: ClockHandle) -> Result<()> {
        match handle {
            ClockHandle::Source(i) => self.source(i).map(|_| ()),
            ClockHandle::Ccu { ccu, clock } => self.ccu_at(ccu)?.disable(clock),
        }
    }

    pub fn is_enabled(&self, handle: ClockHandle) -> Result<bool> {
        match handle {
            ClockHandle::Source(i) => self.source(i).map(|_| true),
            ClockHandle::Ccu { ccu, clock } => self.ccu_at(ccu)?.is_enabled(clock),
        }
    }

    pub fn get_parent(&self, handle: ClockHandle) -> Result<u8> {
        match handle {
            ClockHandle::Source(i) => self.source(i).map(|_| 0),
            ClockHandle::Ccu { ccu, clock } => self.ccu_at(ccu)?.get_parent(clock),
        }
    }

    pub fn set_parent(&self, handle: ClockHandle, index: u8) -> Result<()> {
        match handle {
            ClockHandle::Source(_) => Err(Error::Unsupported),
            ClockHandle::Ccu { ccu, clock } => self.ccu_at(ccu)?.set_parent(clock, index),
        }
    }

    /// Closest rate the clock can produce from its current parent.
    pub fn round_rate(&self, handle: ClockHandle, rate: Hertz) -> Result<Hertz> {
        match handle {
            ClockHandle::Source(i) => Ok(self.source(i)?.1),
            ClockHandle::Ccu { ccu, clock } => {
                let parent_rate = match self.parent(handle)? {
                    Some(parent) => self.rate(parent)?,
                    None => Hertz(0),
                };
                self.ccu_at(ccu)?.round_rate(clock, rate, parent_rate)
            }
        }
    }

    /// Closest rate over all of the clock's parents. See [`Ccu::determine_rate`].
    pub fn determine_rate(&self, handle: ClockHandle, req: &mut RateRequest) -> Result<()> {
        let ClockHandle::Ccu { ccu, clock } = handle else {
            req.rate = self.round_rate(handle, req.rate)?;
            req.best_parent = None;
            return Ok(());
        };
        let ccu = self.ccu_at(ccu)?;
        let parents = ccu.parents(clock)?;
        ccu.determine_rate(clock, req, |i| {
            parents.get(i as usize).and_then(|name| self.rate_of(name))
        })
    }

    /// Change a clock's rate, switching to a better parent first when one exists.
    ///
    /// Core clocks re-rate their PLL from its reference clock.
    pub fn set_rate(&self, handle: ClockHandle, rate: Hertz) -> Result<()> {
        let ClockHandle::Ccu { ccu: ccu_idx, clock } = handle else {
            return Err(Error::Unsupported);
        };
        let ccu = self.ccu_at(ccu_idx)?;

        if let ClockKind::Core(core) = &ccu.clock(clock)?.kind {
            // core -> PLL channel -> PLL -> reference
            let chnl = ccu.find(core.pll_chnl).ok_or(Error::UnknownClock)?;
            let pll_name = ccu.parents(chnl)?.first().ok_or(Error::UnknownClock)?;
            let pll = ccu.find(pll_name).ok_or(Error::UnknownClock)?;
            let xtal_name = ccu.parents(pll)?.first().ok_or(Error::UnknownClock)?;
            let xtal = self.rate_of(xtal_name).ok_or(Error::UnknownClock)?;
            return ccu.set_core_rate(clock, rate, xtal);
        }

        let mut req = RateRequest::new(rate);
        self.determine_rate(handle, &mut req)?;
        if req.best_parent.is_none() && req.rate == self.rate(handle)? {
            return Ok(());
        }
        if let Some(index) = req.best_parent {
            ccu.set_parent(clock, index)?;
        }
        ccu.set_rate(clock, req.rate, req.best_parent_rate)
    }
}
