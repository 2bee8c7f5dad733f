//! Fractional-N PLLs
//!
//! `rate = xtal * (ndiv + nfrac / 2^nfrac_width) / pdiv`
//!
//! A field value of 0 in `ndiv` or `pdiv` stands for `2^width`.

use embedded_hal::delay::DelayNs;

use super::{Bit, Field, RATE_TOLERANCE_HZ};
use crate::bitfield;
use crate::ccu::Io;
use crate::error::{Error, Result};
use crate::poll::delay_then_poll;
use crate::regs::RegisterWindow;
use crate::time::Hertz;

/// Config table threshold that matches any rate.
pub const PLL_CFG_THOLD_MAX: u32 = u32::MAX;

/// Software offset mode bit of the desense register.
const PLL_OFFSET_MODE: u32 = 1 << 28;
const PLL_OFFSET_NDIV_SHIFT: u32 = 20;
const PLL_OFFSET_NDIV_WIDTH: u32 = 9;
const PLL_OFFSET_NFRAC_SHIFT: u32 = 0;
const PLL_OFFSET_NFRAC_WIDTH: u32 = 20;

/// Rate dependent PLL configuration: rows of `(threshold_hz, value)`.
///
/// The first row whose threshold is above the new rate wins.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllConfigTable {
    pub field: Field,
    pub table: &'static [(u32, u32)],
}

impl PllConfigTable {
    pub const fn new(offset: u32, shift: u32, width: u32, table: &'static [(u32, u32)]) -> Self {
        Self {
            field: Field::new(offset, shift, width),
            table,
        }
    }

    fn value_for(&self, rate: Hertz) -> Option<u32> {
        self.table
            .iter()
            .find(|&&(thold, _)| thold > rate.0 || thold == PLL_CFG_THOLD_MAX)
            .map(|&(_, value)| value)
    }
}

/// Which PLL divider components the desense offset drives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DesenseTarget {
    Ndiv,
    Nfrac,
    Both,
}

impl DesenseTarget {
    fn ndiv(self) -> bool {
        matches!(self, DesenseTarget::Ndiv | DesenseTarget::Both)
    }

    fn nfrac(self) -> bool {
        matches!(self, DesenseTarget::Nfrac | DesenseTarget::Both)
    }
}

/// PLL desense: run the PLL at a small offset from its programmed rate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Desense {
    pub offset: u32,
    /// Offset from the current rate, in Hz.
    pub delta: i32,
    /// `None` leaves the offset to hardware.
    pub target: Option<DesenseTarget>,
}

impl Desense {
    pub const fn ndiv(offset: u32, delta: i32) -> Self {
        Self {
            offset,
            delta,
            target: Some(DesenseTarget::Ndiv),
        }
    }

    pub const fn nfrac(offset: u32, delta: i32) -> Self {
        Self {
            offset,
            delta,
            target: Some(DesenseTarget::Nfrac),
        }
    }

    pub const fn both(offset: u32, delta: i32) -> Self {
        Self {
            offset,
            delta,
            target: Some(DesenseTarget::Both),
        }
    }

    pub const fn hardware(offset: u32) -> Self {
        Self {
            offset,
            delta: 0,
            target: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerDown {
    pub offset: u32,
    pub pwrdwn_bit: u32,
    pub idle_override_bit: Option<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reset {
    pub offset: u32,
    pub reset_bit: u32,
    pub post_reset_bit: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllClock {
    pub cfg: Option<PllConfigTable>,
    pub desense: Option<Desense>,
    pub pwrdwn: PowerDown,
    pub reset: Reset,
    pub lock: Bit,
    pub pdiv: Field,
    pub ndiv: Field,
    pub nfrac: Field,
    /// Hardware gates the PLL; software never powers it up or down.
    pub autogated: bool,
    /// Lock may be reported late; a lock timeout isn't an error.
    pub delayed_lock: bool,
    pub xtal: &'static str,
}

/// Divider values for one PLL rate, in register encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllDivs {
    pub pdiv: u32,
    pub ndiv: u32,
    pub nfrac: u32,
}

impl PllClock {
    /// PLL with the given divider fields, powered and reset through the given bits.
    pub const fn new(
        xtal: &'static str,
        pwrdwn: (u32, u32, Option<u32>),
        reset: (u32, u32, u32),
        lock: (u32, u32),
        pdiv: Field,
        ndiv: Field,
        nfrac: Field,
    ) -> Self {
        Self {
            cfg: None,
            desense: None,
            pwrdwn: PowerDown {
                offset: pwrdwn.0,
                pwrdwn_bit: pwrdwn.1,
                idle_override_bit: pwrdwn.2,
            },
            reset: Reset {
                offset: reset.0,
                reset_bit: reset.1,
                post_reset_bit: reset.2,
            },
            lock: Bit::new(lock.0, lock.1),
            pdiv,
            ndiv,
            nfrac,
            autogated: false,
            delayed_lock: false,
            xtal,
        }
    }

    pub const fn cfg(self, cfg: PllConfigTable) -> Self {
        Self { cfg: Some(cfg), ..self }
    }

    pub const fn desense(self, desense: Desense) -> Self {
        Self {
            desense: Some(desense),
            ..self
        }
    }

    pub const fn autogated(self) -> Self {
        Self { autogated: true, ..self }
    }

    pub const fn delayed_lock(self) -> Self {
        Self {
            delayed_lock: true,
            ..self
        }
    }

    fn frac_div(&self) -> u64 {
        1u64 << self.nfrac.width
    }

    fn raw_rate(&self, pdiv: u64, ndiv: u64, nfrac: u64, xtal: Hertz) -> Hertz {
        let frac_div = self.frac_div();
        Hertz::saturating(xtal.0 as u64 * (ndiv * frac_div + nfrac) / (pdiv * frac_div))
    }

    /// Forward rate for divider values in register encoding.
    pub fn compute_rate(&self, pdiv: u32, ndiv: u32, nfrac: u32, xtal: Hertz) -> Hertz {
        let pdiv = if pdiv == 0 { self.pdiv.span() } else { pdiv };
        let ndiv = if ndiv == 0 { self.ndiv.span() } else { ndiv };
        self.raw_rate(pdiv as u64, ndiv as u64, nfrac as u64, xtal)
    }

    /// Divider values for the achievable rate closest to `target`, and that rate.
    pub fn compute_divs(&self, target: Hertz, xtal: Hertz) -> (Hertz, PllDivs) {
        let frac_div = self.frac_div();
        let max_ndiv = self.ndiv.span();
        let pdiv = 1;
        if xtal.0 == 0 {
            return (Hertz(0), PllDivs { pdiv, ndiv: 0, nfrac: 0 });
        }
        let rate = |ndiv: u32, nfrac: u32| self.raw_rate(pdiv as u64, ndiv as u64, nfrac as u64, xtal);

        let ndiv = (target.0 / xtal.0).min(max_ndiv);
        let remainder = (target.0 as u64).saturating_sub(ndiv as u64 * xtal.0 as u64);
        let mut nfrac = ((remainder * frac_div / xtal.0 as u64) & (frac_div - 1)) as u32;

        let mut calc = rate(ndiv, nfrac);
        if calc != target {
            // Walk nfrac up to the first rate above target, then keep the closer neighbour.
            let last = (frac_div - 1) as u32;
            while nfrac < last && rate(ndiv, nfrac) <= target {
                nfrac += 1;
            }
            calc = rate(ndiv, nfrac);
            if calc > target && nfrac > 0 {
                let below = rate(ndiv, nfrac - 1);
                if calc.abs_diff(target) > target.abs_diff(below) {
                    nfrac -= 1;
                }
            }
            calc = rate(ndiv, nfrac);
        }

        let ndiv = if ndiv == max_ndiv { 0 } else { ndiv };
        (calc, PllDivs { pdiv, ndiv, nfrac })
    }

    fn read_divs<W: RegisterWindow, D>(&self, io: &mut Io<W, D>) -> PllDivs {
        PllDivs {
            pdiv: self.pdiv.get(io),
            ndiv: self.ndiv.get(io),
            nfrac: self.nfrac.get(io),
        }
    }
}

/// Pulse the reset bits and, when the PLL is running, wait for lock.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn reset<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, pll: &PllClock) -> Result<()> {
    let mask = (1 << pll.reset.reset_bit) | (1 << pll.reset.post_reset_bit);
    io.modify(pll.reset.offset, |r| r | mask);

    let powered = io.read(pll.pwrdwn.offset) & (1 << pll.pwrdwn.pwrdwn_bit) == 0;
    if !(pll.autogated || powered) {
        return Ok(());
    }

    let lock = pll.lock;
    let budget = io.config.lock_poll;
    let Io { window, delay, .. } = io;
    let locked = delay_then_poll(delay, budget, || window.read(lock.offset) & lock.mask() != 0);
    if locked {
        Ok(())
    } else if pll.delayed_lock {
        debug!("PLL lock delayed");
        Ok(())
    } else {
        warn!("PLL never locked");
        Err(Error::LockTimeout)
    }
}

pub(crate) fn recalc_rate<W: RegisterWindow, D>(io: &mut Io<W, D>, pll: &PllClock, xtal: Hertz) -> Hertz {
    let divs = pll.read_divs(io);
    pll.compute_rate(divs.pdiv, divs.ndiv, divs.nfrac, xtal)
}

pub(crate) fn round_rate(pll: &PllClock, rate: Hertz, xtal: Hertz) -> Hertz {
    pll.compute_divs(rate, xtal).0
}

/// Program a new rate. Returns the rate actually achieved.
pub(crate) fn set_rate<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    name: &str,
    pll: &PllClock,
    rate: Hertz,
    xtal: Hertz,
) -> Result<Hertz> {
    let (new_rate, divs) = pll.compute_divs(rate, xtal);
    if new_rate.abs_diff(rate) > RATE_TOLERANCE_HZ {
        error!("invalid rate {} for PLL clock {}", rate.0, name);
        return Err(Error::InvalidRateRequest);
    }

    io.write_enable();

    if let Some(cfg) = pll.cfg.as_ref() {
        if let Some(value) = cfg.value_for(new_rate) {
            io.write(cfg.field.offset, value << cfg.field.shift);
        }
    }
    pll.nfrac.set(io, divs.nfrac);
    pll.ndiv.set(io, divs.ndiv);
    pll.pdiv.set(io, divs.pdiv);

    let res = reset(io, pll);

    io.write_disable();

    res.map(|_| new_rate)
}

pub(crate) fn enable<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, pll: &PllClock) -> Result<()> {
    if pll.autogated {
        return Ok(());
    }
    io.write_enable();
    Bit::new(pll.pwrdwn.offset, pll.pwrdwn.pwrdwn_bit).clear(io);
    let res = reset(io, pll);
    io.write_disable();
    res
}

pub(crate) fn disable<W: RegisterWindow, D>(io: &mut Io<W, D>, pll: &PllClock) {
    if pll.autogated {
        return;
    }
    io.write_enable();
    Bit::new(pll.pwrdwn.offset, pll.pwrdwn.pwrdwn_bit).set(io);
    io.write_disable();
}

pub(crate) fn is_enabled<W: RegisterWindow, D>(io: &mut Io<W, D>, pll: &PllClock) -> bool {
    pll.autogated || !Bit::new(pll.pwrdwn.offset, pll.pwrdwn.pwrdwn_bit).is_set(io)
}

/// Apply the desense offset to the current rate.
fn desense_set_offset<W: RegisterWindow, D>(
    io: &mut Io<W, D>,
    pll: &PllClock,
    desense: &Desense,
    target: DesenseTarget,
    xtal: Hertz,
) -> Result<()> {
    let current = recalc_rate(io, pll, xtal);
    let offset_rate = Hertz((current.0 as i64 + desense.delta as i64).clamp(0, u32::MAX as i64) as u32);

    let (new_rate, off) = pll.compute_divs(offset_rate, xtal);
    if new_rate.abs_diff(offset_rate) > RATE_TOLERANCE_HZ {
        error!("offset {} not supported for rate {}", desense.delta, current.0);
        return Err(Error::InvalidRateRequest);
    }

    let divs = pll.read_divs(io);
    let mut val = io.read(desense.offset);

    if target.ndiv() {
        val = bitfield::replace(val, PLL_OFFSET_NDIV_SHIFT, PLL_OFFSET_NDIV_WIDTH, off.ndiv);
    } else if divs.ndiv != off.ndiv {
        error!("desense would change ndiv, which it doesn't control");
        return Err(Error::InvalidRateRequest);
    }

    if target.nfrac() {
        val = bitfield::replace(val, PLL_OFFSET_NFRAC_SHIFT, PLL_OFFSET_NFRAC_WIDTH, off.nfrac);
    } else if divs.nfrac != off.nfrac {
        error!("desense would change nfrac, which it doesn't control");
        return Err(Error::InvalidRateRequest);
    }

    io.write(desense.offset, val);
    Ok(())
}

fn desense_init<W: RegisterWindow, D>(io: &mut Io<W, D>, pll: &PllClock, desense: &Desense, xtal: Hertz) -> Result<()> {
    let target = desense.target;
    io.modify(desense.offset, |r| {
        if target.is_some() {
            r | PLL_OFFSET_MODE
        } else {
            r & !PLL_OFFSET_MODE
        }
    });

    match target {
        Some(target) => desense_set_offset(io, pll, desense, target, xtal),
        None => Ok(()),
    }
}

/// Bring a PLL to its initial state.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn init<W: RegisterWindow, D>(io: &mut Io<W, D>, name: &str, pll: &PllClock, xtal: Hertz) -> Result<()> {
    if let Some(bit) = pll.pwrdwn.idle_override_bit {
        let mask = 1 << bit;
        let autogated = pll.autogated;
        io.modify(pll.pwrdwn.offset, |r| if autogated { r | mask } else { r & !mask });
    }

    if let Some(desense) = pll.desense.as_ref() {
        desense_init(io, pll, desense, xtal).inspect_err(|_| {
            error!("error initializing desense for {}", name);
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccu::tests::io;
    use crate::testing::SimWindow;

    const XTAL: Hertz = Hertz(26_000_000);
    const CTL: u32 = 0x0c00;
    const FRAC: u32 = 0x0c04;
    const CFG: u32 = 0x0c18;
    const DESENSE: u32 = 0x0c24;

    const A7: PllClock = PllClock::new(
        "ref_crystal",
        (CTL, 3, Some(4)),
        (CTL, 0, 1),
        (CTL, 28),
        Field::new(CTL, 24, 3),
        Field::new(CTL, 8, 9),
        Field::new(FRAC, 0, 20),
    )
    .cfg(PllConfigTable::new(CFG, 0, 28, &[(1_750_000_000, 0x800_0000), (PLL_CFG_THOLD_MAX, 0x800_2000)]));

    #[test]
    fn forward_rate() {
        assert_eq!(A7.compute_rate(1, 38, 0, XTAL), Hertz(988_000_000));
        assert_eq!(A7.compute_rate(1, 38, 1 << 19, XTAL), Hertz(1_001_000_000));
        // zero pdiv is 2^3
        assert_eq!(A7.compute_rate(0, 40, 0, XTAL), Hertz(130_000_000));
        // zero ndiv is 2^9: 13.3 GHz doesn't fit, saturate instead of wrapping
        assert_eq!(A7.compute_rate(1, 0, 0, XTAL), Hertz(u32::MAX));
        assert_eq!(A7.compute_rate(1, 165, 0, XTAL), Hertz(4_290_000_000));
        assert_eq!(A7.compute_rate(1, 166, 0, XTAL), Hertz(u32::MAX));
    }

    #[test]
    fn divs_for_998_4_mhz() {
        let (rate, divs) = A7.compute_divs(Hertz(998_400_000), XTAL);
        assert_eq!(divs.pdiv, 1);
        assert_eq!(divs.ndiv, 38);
        assert!(rate.abs_diff(Hertz(998_400_000)) <= 100);
        assert_eq!(A7.compute_rate(divs.pdiv, divs.ndiv, divs.nfrac, XTAL), rate);
    }

    #[test]
    fn exact_rates_skip_the_scan() {
        let (rate, divs) = A7.compute_divs(Hertz(1_001_000_000), XTAL);
        assert_eq!(rate, Hertz(1_001_000_000));
        assert_eq!(divs, PllDivs { pdiv: 1, ndiv: 38, nfrac: 1 << 19 });
    }

    #[test]
    fn max_ndiv_is_encoded_as_zero() {
        let pll = PllClock::new(
            "xtal",
            (CTL, 3, None),
            (CTL, 0, 1),
            (CTL, 28),
            Field::new(CTL, 24, 3),
            Field::new(CTL, 8, 2),
            Field::new(FRAC, 0, 4),
        );
        // out of range: ndiv saturates and the nfrac scan stops at its last step
        let (rate, divs) = pll.compute_divs(Hertz(200), Hertz(10));
        assert_eq!(divs, PllDivs { pdiv: 1, ndiv: 0, nfrac: 15 });
        assert_eq!(rate, Hertz(49));
    }

    #[test]
    fn config_row_selection() {
        let cfg = A7.cfg.unwrap();
        assert_eq!(cfg.value_for(Hertz(1_000_000_000)), Some(0x800_0000));
        assert_eq!(cfg.value_for(Hertz(1_750_000_000)), Some(0x800_2000));
        assert_eq!(cfg.value_for(Hertz(2_000_000_000)), Some(0x800_2000));
    }

    #[test]
    fn set_rate_programs_dividers_and_locks() {
        let sim = SimWindow::new();
        sim.preset(CTL, 1 << 28);
        let mut io = io(&sim);

        let rate = set_rate(&mut io, "a7_pll", &A7, Hertz(1_001_000_000), XTAL).unwrap();
        assert_eq!(rate, Hertz(1_001_000_000));
        assert_eq!(recalc_rate(&mut io, &A7, XTAL), rate);
        assert_eq!(sim.peek(CFG), 0x800_0000);
        // reset and post-reset bits
        assert_eq!(sim.peek(CTL) & 0b11, 0b11);
        assert!(!sim.write_access_enabled());

        let offsets: std::vec::Vec<u32> = sim.writes().into_iter().map(|(o, _)| o).collect();
        assert_eq!(offsets, [0, CFG, FRAC, CTL, CTL, CTL, 0]);
    }

    #[test]
    fn unreachable_rate_is_rejected() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        // 4 bit nfrac: 26 MHz / 16 steps
        let coarse = PllClock { nfrac: Field::new(FRAC, 0, 4), ..A7 };
        let res = set_rate(&mut io, "pll", &coarse, Hertz(1_000_000_000), XTAL);
        assert_eq!(res, Err(Error::InvalidRateRequest));
        assert_eq!(sim.write_count(), 0);
    }

    #[test]
    fn lock_timeout() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        io.write_enable();
        assert_eq!(reset(&mut io, &A7), Err(Error::LockTimeout));
        assert_eq!(io.delay.total_us(), 1000);
        assert_eq!(reset(&mut io, &A7.delayed_lock()), Ok(()));

        // powered down and not autogated: no wait at all
        sim.preset(CTL, 1 << 3);
        let delay_before = io.delay.total_ns;
        assert_eq!(reset(&mut io, &A7), Ok(()));
        assert_eq!(io.delay.total_ns, delay_before);
    }

    #[test]
    fn power_control() {
        let sim = SimWindow::new();
        sim.preset(CTL, (1 << 3) | (1 << 28));
        let mut io = io(&sim);
        assert!(!is_enabled(&mut io, &A7));
        enable(&mut io, &A7).unwrap();
        assert!(is_enabled(&mut io, &A7));
        disable(&mut io, &A7);
        assert!(!is_enabled(&mut io, &A7));

        let auto = A7.autogated();
        sim.clear_log();
        assert!(is_enabled(&mut io, &auto));
        enable(&mut io, &auto).unwrap();
        disable(&mut io, &auto);
        assert_eq!(sim.write_count(), 0);
    }

    #[test]
    fn init_sets_idle_override_for_autogated() {
        let sim = SimWindow::new();
        let mut io = io(&sim);
        io.write_enable();
        init(&mut io, "a7_pll", &A7.autogated(), XTAL).unwrap();
        assert_eq!(sim.peek(CTL), 1 << 4);
        init(&mut io, "a7_pll", &A7, XTAL).unwrap();
        assert_eq!(sim.peek(CTL), 0);
    }

    #[test]
    fn desense_offsets_both_components() {
        let sim = SimWindow::new();
        // pdiv 1, ndiv 38, nfrac 0: 988 MHz
        sim.preset(CTL, (1 << 24) | (38 << 8));
        let mut io = io(&sim);
        io.write_enable();
        let pll = A7.desense(Desense::both(DESENSE, -13_000_000));
        init(&mut io, "a7_pll", &pll, XTAL).unwrap();

        // 975 MHz = 26 MHz * 37.5
        let val = sim.peek(DESENSE);
        assert_ne!(val & PLL_OFFSET_MODE, 0);
        assert_eq!(bitfield::extract(val, 20, 9), 37);
        assert_eq!(bitfield::extract(val, 0, 20), 1 << 19);
    }

    #[test]
    fn desense_rejects_uncontrolled_component() {
        let sim = SimWindow::new();
        sim.preset(CTL, (1 << 24) | (38 << 8));
        let mut io = io(&sim);
        io.write_enable();
        // crossing an integer boundary with only nfrac under control
        let pll = A7.desense(Desense::nfrac(DESENSE, -13_000_000));
        assert_eq!(init(&mut io, "a7_pll", &pll, XTAL), Err(Error::InvalidRateRequest));

        // staying within ndiv 38 is fine
        let pll = A7.desense(Desense::nfrac(DESENSE, 13_000_000));
        assert_eq!(init(&mut io, "a7_pll", &pll, XTAL), Ok(()));
        assert_eq!(bitfield::extract(sim.peek(DESENSE), 0, 20), 1 << 19);
    }

    #[test]
    fn hardware_desense_clears_mode() {
        let sim = SimWindow::new();
        sim.preset(DESENSE, PLL_OFFSET_MODE | 5);
        let mut io = io(&sim);
        io.write_enable();
        init(&mut io, "a7_pll", &A7.desense(Desense::hardware(DESENSE)), XTAL).unwrap();
        assert_eq!(sim.peek(DESENSE), 5);
    }
}
