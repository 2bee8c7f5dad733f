//! Peripheral and bus clocks
//!
//! A peripheral clock is any combination of policy bit, gate, hysteresis,
//! divider (with optional pre-divider), parent selector and triggers. A bus
//! clock uses the same description but only its gate and hysteresis.

use embedded_hal::delay::DelayNs;

use super::divider::{self, Divider};
use super::gate::{self, Gate, Hyst};
use super::selector::{self, Selector};
use super::trigger::Trigger;
use super::ClockPolicy;
use crate::ccu::policy::{self, CcuPolicy};
use crate::ccu::Io;
use crate::error::{Error, Result};
use crate::regs::RegisterWindow;
use crate::time::Hertz;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeriClock {
    pub policy: Option<ClockPolicy>,
    pub gate: Option<Gate>,
    pub hyst: Option<Hyst>,
    pub pre_trig: Option<Trigger>,
    pub pre_div: Option<Divider>,
    pub trig: Option<Trigger>,
    pub div: Option<Divider>,
    pub sel: Option<Selector>,
    pub parents: &'static [&'static str],
}

impl PeriClock {
    pub const fn new() -> Self {
        Self {
            policy: None,
            gate: None,
            hyst: None,
            pre_trig: None,
            pre_div: None,
            trig: None,
            div: None,
            sel: None,
            parents: &[],
        }
    }

    pub const fn policy(self, offset: u32, bit: u32) -> Self {
        Self {
            policy: Some(ClockPolicy::new(offset, bit)),
            ..self
        }
    }

    pub const fn gate(self, gate: Gate) -> Self {
        Self { gate: Some(gate), ..self }
    }

    pub const fn hyst(self, hyst: Hyst) -> Self {
        Self { hyst: Some(hyst), ..self }
    }

    pub const fn pre_trig(self, trig: Trigger) -> Self {
        Self {
            pre_trig: Some(trig),
            ..self
        }
    }

    pub const fn pre_div(self, div: Divider) -> Self {
        Self {
            pre_div: Some(div),
            ..self
        }
    }

    pub const fn trig(self, trig: Trigger) -> Self {
        Self { trig: Some(trig), ..self }
    }

    pub const fn div(self, div: Divider) -> Self {
        Self { div: Some(div), ..self }
    }

    pub const fn sel(self, sel: Selector) -> Self {
        Self { sel: Some(sel), ..self }
    }

    pub const fn parents(self, parents: &'static [&'static str]) -> Self {
        Self { parents, ..self }
    }

    /// The pre-divider and selector use the pre-trigger when there is one.
    fn sel_trig(&self) -> Option<&Trigger> {
        self.pre_trig.as_ref().or(self.trig.as_ref())
    }
}

impl Default for PeriClock {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn enable<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, name: &str, clk: &mut PeriClock) -> Result<()> {
    set_gate(io, name, clk, true)
}

/// Disabling a clock that can't be disabled is a quiet success.
pub(crate) fn disable<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, name: &str, clk: &mut PeriClock) -> Result<()> {
    set_gate(io, name, clk, false)
}

fn set_gate<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, name: &str, clk: &mut PeriClock, enable: bool) -> Result<()> {
    let Some(gate) = clk.gate.as_mut() else {
        return Ok(());
    };
    if !gate.control.is_sw_managed() || (!enable && gate.control.is_no_disable()) {
        return Ok(());
    }

    io.write_enable();
    let res = gate::set_enabled(io, Some(gate), enable);
    io.write_disable();

    if res.is_err() {
        error!("failed to {} gate for {}", if enable { "enable" } else { "disable" }, name);
    }
    res
}

pub(crate) fn is_enabled<W: RegisterWindow, D>(io: &mut Io<W, D>, clk: &PeriClock) -> bool {
    gate::is_enabled(io, clk.gate.as_ref())
}

pub(crate) fn recalc_rate<W: RegisterWindow, D>(io: &mut Io<W, D>, clk: &PeriClock, parent_rate: Hertz) -> Hertz {
    divider::recalc_rate(io, clk.div.as_ref(), clk.pre_div.as_ref(), parent_rate)
}

/// Without a divider the clock runs at its parent's rate whatever is asked.
pub(crate) fn round_rate<W: RegisterWindow, D>(io: &mut Io<W, D>, clk: &PeriClock, rate: Hertz, parent_rate: Hertz) -> Hertz {
    match clk.div.as_ref() {
        Some(div) => divider::round_rate(io, div, clk.pre_div.as_ref(), rate, parent_rate).0,
        None => parent_rate,
    }
}

pub(crate) fn set_rate<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    name: &str,
    clk: &mut PeriClock,
    rate: Hertz,
    parent_rate: Hertz,
) -> Result<()> {
    if rate == recalc_rate(io, clk, parent_rate) {
        return Ok(());
    }

    // A fixed divider (or none) can't change; only a no-op request is fine.
    let div = match clk.div.as_mut() {
        Some(Divider::Variable(div)) => div,
        _ if rate == parent_rate => return Ok(()),
        _ => return Err(Error::InvalidRateRequest),
    };

    let (_, scaled) = divider::round_rate(
        io,
        &Divider::Variable(*div),
        clk.pre_div.as_ref(),
        rate,
        parent_rate,
    );

    // The pre-divider never changes here, so the regular trigger applies.
    let res = divider::write(io, clk.gate.as_mut(), div, clk.trig.as_ref(), scaled);
    match res {
        Err(Error::GatingFailure) => error!("gating failure for {}", name),
        Err(Error::TriggerTimeout) => error!("trigger failed for {}", name),
        _ => {}
    }
    res
}

/// Current parent index. A bad selector reading reports parent 0.
pub(crate) fn get_parent<W: RegisterWindow, D>(io: &mut Io<W, D>, clk: &PeriClock) -> u8 {
    selector::read_index(io, clk.sel.as_ref()).unwrap_or(0)
}

pub(crate) fn set_parent<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    name: &str,
    clk: &mut PeriClock,
    index: u8,
) -> Result<()> {
    if index as usize >= clk.parents.len().max(1) {
        return Err(Error::InvalidParent);
    }
    let pre = clk.pre_trig.is_some();
    let trig = clk.pre_trig.or(clk.trig);
    let res = selector::write(io, clk.gate.as_mut(), clk.sel.as_mut(), trig.as_ref(), index);
    match res {
        Err(Error::GatingFailure) => error!("gating failure for {}", name),
        Err(Error::TriggerTimeout) => error!("{}trigger failed for {}", if pre { "pre-" } else { "" }, name),
        _ => {}
    }
    res
}

/// Bring a peripheral clock to its initial state.
///
/// Caller holds the lock with write access enabled.
pub(crate) fn init<W: RegisterWindow, D: DelayNs>(
    io: &mut Io<W, D>,
    ccu_policy: &CcuPolicy,
    name: &str,
    clk: &mut PeriClock,
) -> Result<()> {
    if let Some(p) = clk.policy.as_ref() {
        policy::clock_policy_init(io, ccu_policy, p).inspect_err(|_| {
            error!("error initializing policy for {}", name);
        })?;
    }
    gate::init(io, clk.gate.as_ref()).inspect_err(|_| {
        error!("error initializing gate for {}", name);
    })?;
    gate::hyst_init(io, clk.hyst.as_ref());

    divider::init(io, clk.gate.as_mut(), clk.div.as_mut(), clk.trig.as_ref()).inspect_err(|_| {
        error!("error initializing divider for {}", name);
    })?;

    let trig = clk.sel_trig().copied();
    divider::init(io, clk.gate.as_mut(), clk.pre_div.as_mut(), trig.as_ref()).inspect_err(|_| {
        error!("error initializing pre-divider for {}", name);
    })?;
    selector::init(io, clk.gate.as_mut(), clk.sel.as_mut(), trig.as_ref()).inspect_err(|_| {
        error!("error initializing selector for {}", name);
    })
}

/// Bus clocks only bring up their gate and hysteresis.
pub(crate) fn bus_init<W: RegisterWindow, D: DelayNs>(io: &mut Io<W, D>, name: &str, clk: &mut PeriClock) -> Result<()> {
    gate::init(io, clk.gate.as_ref()).inspect_err(|_| {
        error!("error initializing gate for {}", name);
    })?;
    gate::hyst_init(io, clk.hyst.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccu::tests::io;
    use crate::testing::SimWindow;

    const GATE: u32 = 0x0400;
    const DIV: u32 = 0x0a28;
    const SEL: u32 = 0x0a10;
    const TRIG: u32 = 0x0afc;

    const UARTB: PeriClock = PeriClock::new()
        .gate(Gate::hw_sw(GATE, 16, 0, 1))
        .hyst(Hyst::new(GATE, 9, 8))
        .sel(Selector::new(SEL, 0, 2, &[0, 1, 3]))
        .div(Divider::fractional(DIV, 4, 14, 8))
        .trig(Trigger::new(TRIG, 2))
        .parents(&["ref_crystal", "var_156m", "ref_156m"]);

    fn sim() -> SimWindow {
        let sim = SimWindow::new();
        sim.mirror(GATE, 0, 16).self_clearing(TRIG, 2);
        sim
    }

    #[test]
    fn builder_fills_fields() {
        assert!(UARTB.policy.is_none());
        assert_eq!(UARTB.parents.len(), 3);
        assert_eq!(UARTB.sel_trig(), Some(&Trigger::new(TRIG, 2)));
        let with_pre = UARTB.pre_trig(Trigger::new(TRIG, 3));
        assert_eq!(with_pre.sel_trig(), Some(&Trigger::new(TRIG, 3)));
    }

    #[test]
    fn init_reads_back_and_enables() {
        let sim = sim();
        sim.preset(SEL, 1).preset(DIV, 0x300 << 4);
        let mut io = io(&sim);
        let mut clk = UARTB;
        io.write_enable();
        init(&mut io, &CcuPolicy::NONE, "uartb", &mut clk).unwrap();
        io.write_disable();

        assert_eq!(clk.sel.and_then(|s| s.index()), Some(1));
        assert_eq!(clk.div.and_then(|d| d.scaled()), Some(0x400));
        assert_eq!(sim.peek(GATE), (1 << 16) | 0x300 | 0b11);
        assert_eq!(sim.violations(), 0);
    }

    #[test]
    fn divider_rates() {
        let sim = sim();
        // scaled 0x100 + 0x100: divide by 2
        sim.preset(DIV, 0x100 << 4);
        let mut io = io(&sim);
        let mut clk = UARTB;
        io.write_enable();
        init(&mut io, &CcuPolicy::NONE, "uartb", &mut clk).unwrap();
        io.write_disable();

        let parent = Hertz(156_000_000);
        assert_eq!(recalc_rate(&mut io, &clk, parent), Hertz(78_000_000));
        assert_eq!(round_rate(&mut io, &clk, Hertz(48_000_000), parent), Hertz(48_000_000));

        set_rate(&mut io, "uartb", &mut clk, Hertz(48_000_000), parent).unwrap();
        // 156 / 48 = 3.25, 0x340 scaled
        assert_eq!(clk.div.and_then(|d| d.scaled()), Some(0x340));
        assert_eq!(recalc_rate(&mut io, &clk, parent), Hertz(48_000_000));
        assert_eq!(sim.writes_to(TRIG), 1);
    }

    #[test]
    fn no_divider_follows_parent() {
        let sim = sim();
        let mut io = io(&sim);
        let mut clk = PeriClock::new().parents(&["ref_crystal"]);
        let parent = Hertz(26_000_000);
        assert_eq!(round_rate(&mut io, &clk, Hertz(1), parent), parent);
        assert_eq!(set_rate(&mut io, "x", &mut clk, parent, parent), Ok(()));
        assert_eq!(set_rate(&mut io, "x", &mut clk, Hertz(13_000_000), parent), Err(Error::InvalidRateRequest));
    }

    #[test]
    fn parent_rate_keeps_divide_by_one() {
        let sim = sim();
        let mut io = io(&sim);
        let mut clk = PeriClock::new().div(Divider::variable(DIV, 4, 14));
        io.write_enable();
        init(&mut io, &CcuPolicy::NONE, "x", &mut clk).unwrap();
        io.write_disable();
        assert_eq!(clk.div.and_then(|d| d.scaled()), Some(1));

        sim.clear_log();
        let parent = Hertz(26_000_000);
        set_rate(&mut io, "x", &mut clk, parent, parent).unwrap();
        assert_eq!(sim.write_count(), 0);
        assert_eq!(sim.peek(DIV), 0);
    }

    #[test]
    fn fixed_divider_rejects_changes() {
        let sim = sim();
        let mut io = io(&sim);
        let mut clk = PeriClock::new().div(Divider::fixed(2));
        let parent = Hertz(26_000_000);
        assert_eq!(recalc_rate(&mut io, &clk, parent), Hertz(13_000_000));
        assert_eq!(round_rate(&mut io, &clk, Hertz(1), parent), Hertz(13_000_000));
        assert_eq!(set_rate(&mut io, "x", &mut clk, Hertz(13_000_000), parent), Ok(()));
        assert_eq!(set_rate(&mut io, "x", &mut clk, Hertz(6_500_000), parent), Err(Error::InvalidRateRequest));
    }

    #[test]
    fn parent_switch() {
        let sim = sim();
        let mut io = io(&sim);
        let mut clk = UARTB;
        io.write_enable();
        init(&mut io, &CcuPolicy::NONE, "uartb", &mut clk).unwrap();
        io.write_disable();
        assert_eq!(get_parent(&mut io, &clk), 0);

        set_parent(&mut io, "uartb", &mut clk, 2).unwrap();
        assert_eq!(sim.peek(SEL) & 0b11, 3);
        assert_eq!(get_parent(&mut io, &clk), 2);
        assert_eq!(set_parent(&mut io, "uartb", &mut clk, 3), Err(Error::InvalidParent));

        // unmapped hardware code reads as parent 0
        sim.preset(SEL, 2);
        assert_eq!(get_parent(&mut io, &clk), 0);
    }

    #[test]
    fn enable_disable_bracketed() {
        let sim = sim();
        let mut io = io(&sim);
        let mut clk = UARTB;
        disable(&mut io, "uartb", &mut clk).unwrap();
        assert!(!is_enabled(&mut io, &clk));
        enable(&mut io, "uartb", &mut clk).unwrap();
        assert!(is_enabled(&mut io, &clk));
        assert_eq!(sim.violations(), 0);
        assert!(!sim.write_access_enabled());
    }

    #[test]
    fn bus_init_skips_divider() {
        let sim = sim();
        sim.preset(SEL, 2);
        let mut io = io(&sim);
        let mut clk = UARTB;
        io.write_enable();
        // the selector reading is bad, but a bus clock never looks at it
        assert_eq!(bus_init(&mut io, "uartb", &mut clk), Ok(()));
        assert_eq!(clk.sel.and_then(|s| s.index()), None);
    }
}
